//! `BootstrapNode` (spec.md 4.F): joins the node to the cluster, dispatching
//! on `Host.spec.join_mode` to the kubeadm or TLS-bootstrap path.

mod kubeadm;
mod tls;

use async_trait::async_trait;
use host_lifecycle::types::host::{HostConditionType, JoinMode};
use host_lifecycle::types::Host;
use kube::api::Api;
use tracing::{info, instrument};

use super::condition;
use super::Running;
use crate::context::AgentContext;
use host_lifecycle::state::{State, Transition};

#[derive(Debug, Default)]
pub struct BootstrapNode;

#[async_trait]
impl State<AgentContext> for BootstrapNode {
    #[instrument(level = "info", skip(self, ctx), fields(host = %ctx.config.host_name))]
    async fn next(
        self: Box<Self>,
        ctx: &mut AgentContext,
    ) -> anyhow::Result<Transition<Box<dyn State<AgentContext>>>> {
        let hosts: Api<Host> = Api::all(ctx.client.clone());
        let host = hosts.get(&ctx.config.host_name).await?;

        match host.spec.join_mode {
            JoinMode::Kubeadm => kubeadm::join(ctx, &host).await?,
            JoinMode::TlsBootstrap => tls::join(ctx, &host).await?,
        }

        condition::upsert(
            &hosts,
            &ctx.config.host_name,
            HostConditionType::NodeBootstrapped,
            "JoinSucceeded",
        )
        .await?;
        crate::local_state::mark_bootstrap_complete(&ctx.config.data_dir).await?;

        info!("node bootstrapped");
        Ok(Transition::Next(Box::new(Running)))
    }

    fn name(&self) -> &'static str {
        "BootstrapNode"
    }
}
