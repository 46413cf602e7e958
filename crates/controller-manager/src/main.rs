//! `controller-manager`: runs the Host Controller (4.D), Machine Controller
//! (4.E), Bootstrap Credential Mint (4.B), and CSR Auto-Approver (4.C) as
//! independent loops sharing one `kube::Client`.

mod bootstrap_credential_controller;
mod config;
mod context;
mod csr_approver;
mod host_controller;
mod machine_controller;

use clap::Parser;
use host_lifecycle::webserver::{self, Metrics};
use tracing::error;

use context::ControllerContext;
use machine_controller::McParams;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = config::Opts::parse();
    let config = config::Config::from_opts(opts)?;

    let client = kube::Client::try_default().await?;
    let ctx = ControllerContext::new(client, config.identity.clone());

    let metrics = Metrics::new("controller-manager", env!("CARGO_PKG_VERSION"))?;
    let metrics_server = {
        let metrics = metrics.clone();
        let addr = config.metrics_addr;
        let port = config.metrics_port;
        tokio::spawn(async move { webserver::start(metrics, addr, port).await })
    };

    let host_controller_task = tokio::spawn(host_controller::run(ctx.clone(), config.cleanup_timeout));

    let mc_params = McParams {
        control_plane_endpoint: config.control_plane_endpoint.clone(),
        bundle_registry: config.bundle_registry.clone(),
    };
    let machine_controller_task = tokio::spawn(machine_controller::run(ctx.clone(), mc_params));

    let bootstrap_credential_task = tokio::spawn(bootstrap_credential_controller::run(ctx.clone()));

    let csr_approver_task = tokio::spawn(csr_approver::run(ctx.clone()));

    tokio::select! {
        res = metrics_server => {
            if let Err(e) = res {
                error!(error = %e, "metrics server task panicked");
            }
        }
        res = host_controller_task => {
            if let Err(e) = res {
                error!(error = %e, "host controller task panicked");
            }
        }
        res = machine_controller_task => {
            if let Err(e) = res {
                error!(error = %e, "machine controller task panicked");
            }
        }
        res = bootstrap_credential_task => {
            if let Err(e) = res {
                error!(error = %e, "bootstrap credential controller task panicked");
            }
        }
        res = csr_approver_task => {
            if let Err(e) = res {
                error!(error = %e, "csr approver task panicked");
            }
        }
    }

    Ok(())
}
