//! `InstallComponents` (spec.md 4.F): fetches the bootstrap secret's install
//! payload and runs it, honoring `download_mode` (spec.md §3: `Offline`
//! means no component may reach the network during this step).

use async_trait::async_trait;
use host_lifecycle::annotations::CLEANUP_ANNOTATION;
use host_lifecycle::types::host::{DownloadMode, HostConditionType};
use host_lifecycle::types::Host;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Meta};
use tracing::{info, instrument, warn};

use super::condition;
use super::{BootstrapNode, Cleanup};
use crate::context::AgentContext;
use host_lifecycle::state::{State, Transition};

#[derive(Debug, Default)]
pub struct InstallComponents;

#[async_trait]
impl State<AgentContext> for InstallComponents {
    #[instrument(level = "info", skip(self, ctx), fields(host = %ctx.config.host_name))]
    async fn next(
        self: Box<Self>,
        ctx: &mut AgentContext,
    ) -> anyhow::Result<Transition<Box<dyn State<AgentContext>>>> {
        let hosts: Api<Host> = Api::all(ctx.client.clone());
        let host = hosts.get(&ctx.config.host_name).await?;

        if host.meta().annotations.as_ref().map_or(false, |a| a.contains_key(CLEANUP_ANNOTATION)) {
            info!("cleanup requested during install, aborting to cleanup");
            return Ok(Transition::Next(Box::new(Cleanup)));
        }

        if host.spec.download_mode == DownloadMode::Offline {
            info!("offline download mode: assuming components are pre-staged");
        } else if let Some(secret_name) = host.spec.bootstrap_secret_ref.as_deref() {
            if let Err(e) = run_install_script(ctx, secret_name).await {
                warn!(error = %e, "install script failed");
                return Err(e.into());
            }
        }

        condition::upsert(
            &hosts,
            &ctx.config.host_name,
            HostConditionType::ComponentsInstalled,
            "InstallScriptSucceeded",
        )
        .await?;
        info!("components installed");
        Ok(Transition::Next(Box::new(BootstrapNode)))
    }

    fn name(&self) -> &'static str {
        "InstallComponents"
    }
}

async fn run_install_script(ctx: &AgentContext, secret_name: &str) -> host_lifecycle::Result<()> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), "kube-system");
    let secret = secrets
        .get(secret_name)
        .await
        .map_err(host_lifecycle::Error::Kube)?;

    let script = secret
        .data
        .as_ref()
        .and_then(|d| d.get("install.sh"))
        .ok_or_else(|| host_lifecycle::Error::NotFound(format!("secret {secret_name} has no install.sh key")))?;

    let decoded = String::from_utf8(script.0.clone())
        .map_err(|e| host_lifecycle::Error::Validation(format!("install.sh is not valid UTF-8: {e}")))?;

    let script_path = ctx.config.data_dir.join("install.sh");
    tokio::fs::create_dir_all(&ctx.config.data_dir).await?;
    tokio::fs::write(&script_path, decoded).await?;

    host_lifecycle::command::run(
        "sh",
        &[script_path.to_str().expect("data_dir path is valid UTF-8")],
        std::time::Duration::from_secs(600),
    )
    .await?;
    Ok(())
}
