//! `WaitForClaim` (spec.md 4.F): poll our own `Host` object until a
//! Machine Controller has set `status.machine_ref`, or a cleanup annotation
//! tells us to skip straight to teardown (zombie detection, spec.md 4.F
//! edge cases: "a Host can be annotated for cleanup before the agent ever
//! observes a claim").

use std::time::Duration;

use async_trait::async_trait;
use host_lifecycle::annotations::CLEANUP_ANNOTATION;
use host_lifecycle::state::{State, Transition};
use host_lifecycle::types::Host;
use kube::api::{Api, Meta};
use tracing::{debug, info, instrument};

use super::{Cleanup, InstallComponents};
use crate::context::AgentContext;

const POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Default)]
pub struct WaitForClaim;

#[async_trait]
impl State<AgentContext> for WaitForClaim {
    #[instrument(level = "debug", skip(self, ctx), fields(host = %ctx.config.host_name))]
    async fn next(
        self: Box<Self>,
        ctx: &mut AgentContext,
    ) -> anyhow::Result<Transition<Box<dyn State<AgentContext>>>> {
        let api: Api<Host> = Api::all(ctx.client.clone());
        let host = api.get(&ctx.config.host_name).await?;

        if host.meta().annotations.as_ref().map_or(false, |a| a.contains_key(CLEANUP_ANNOTATION)) {
            info!("cleanup requested before claim observed, skipping to cleanup");
            return Ok(Transition::Next(Box::new(Cleanup)));
        }

        if let Some(machine_ref) = host.status.as_ref().and_then(|s| s.machine_ref.as_ref()) {
            info!(machine = %machine_ref.name, "claim observed, proceeding to install");
            crate::local_state::record(&ctx.config.data_dir, &machine_ref.uid).await?;
            return Ok(Transition::Next(Box::new(InstallComponents)));
        }

        debug!("no claim yet, sleeping");
        tokio::time::sleep(POLL_INTERVAL).await;
        Ok(Transition::Next(Box::new(WaitForClaim)))
    }

    fn name(&self) -> &'static str {
        "WaitForClaim"
    }
}
