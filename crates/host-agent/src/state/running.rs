//! `Running` (spec.md 4.F): steady state. Refreshes status periodically and
//! watches for the cleanup annotation.

use std::time::Duration;

use async_trait::async_trait;
use host_lifecycle::annotations::CLEANUP_ANNOTATION;
use host_lifecycle::types::Host;
use kube::api::{Api, Meta};
use tracing::{info, instrument};

use super::Cleanup;
use crate::context::AgentContext;
use crate::registry;
use host_lifecycle::state::{State, Transition};

const POLL_INTERVAL: Duration = Duration::from_secs(15);

#[derive(Debug, Default)]
pub struct Running;

#[async_trait]
impl State<AgentContext> for Running {
    #[instrument(level = "debug", skip(self, ctx), fields(host = %ctx.config.host_name))]
    async fn next(
        self: Box<Self>,
        ctx: &mut AgentContext,
    ) -> anyhow::Result<Transition<Box<dyn State<AgentContext>>>> {
        let hosts: Api<Host> = Api::all(ctx.client.clone());
        let host = hosts.get(&ctx.config.host_name).await?;

        if host.meta().annotations.as_ref().map_or(false, |a| a.contains_key(CLEANUP_ANNOTATION)) {
            info!("cleanup requested");
            return Ok(Transition::Next(Box::new(Cleanup)));
        }

        if let Err(e) = registry::refresh_status(&ctx.client, &ctx.config.host_name).await {
            tracing::warn!(error = %e, "periodic status refresh failed");
        }

        tokio::time::sleep(POLL_INTERVAL).await;
        Ok(Transition::Next(Box::new(Running)))
    }

    fn name(&self) -> &'static str {
        "Running"
    }
}
