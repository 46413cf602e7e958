//! `host-agent`: registers this machine as a `Host` and drives its local
//! install/bootstrap/cleanup state machine (spec.md 4.A, 4.F, 4.G).

mod capacity;
mod config;
mod context;
mod drift;
mod local_state;
mod network;
mod registry;
mod state;
mod zombie;

use std::time::Duration;

use clap::Parser;
use host_lifecycle::state::State;
use host_lifecycle::webserver::{self, Metrics};
use tracing::{error, info, instrument};

use context::AgentContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let opts = config::Opts::parse();
    let config = config::Config::from_opts(opts)?;

    let client = kube::Client::try_default().await?;
    let ctx = AgentContext::new(client, config.clone());

    registry::register(&ctx.client, &ctx.config.host_name).await?;

    let metrics = Metrics::new("host-agent", env!("CARGO_PKG_VERSION"))?;
    let metrics_server = {
        let metrics = metrics.clone();
        let addr = config.metrics_addr;
        let port = config.metrics_port;
        tokio::spawn(async move { webserver::start(metrics, addr, port).await })
    };

    let drift_task = tokio::spawn(drift::run(ctx.clone(), Duration::from_secs(config.drift_interval_secs)));

    let reconcile_task = tokio::spawn(run_reconcile_loop(ctx, metrics));

    tokio::select! {
        res = metrics_server => {
            if let Err(e) = res {
                error!(error = %e, "metrics server task panicked");
            }
        }
        res = drift_task => {
            if let Err(e) = res {
                error!(error = %e, "drift detector task panicked");
            }
        }
        res = reconcile_task => {
            if let Err(e) = res {
                error!(error = %e, "reconcile loop task panicked");
            }
        }
    }

    Ok(())
}

/// Drives the local state machine to completion over and over: each
/// completed `Cleanup` loops back to a fresh `WaitForClaim`, matching
/// spec.md 4.F's description of the Host Reconciler as a loop rather than a
/// one-shot run.
#[instrument(skip(ctx, metrics))]
async fn run_reconcile_loop(mut ctx: AgentContext, metrics: std::sync::Arc<Metrics>) {
    loop {
        let start_state = match zombie::determine_start_state(&ctx).await {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "failed to determine start state, retrying in 10s");
                tokio::time::sleep(Duration::from_secs(10)).await;
                continue;
            }
        };

        if let Err(e) = drive(start_state, &mut ctx, &metrics).await {
            error!(error = %e, "reconcile loop iteration failed");
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }
}

async fn drive(
    mut state: Box<dyn State<AgentContext>>,
    ctx: &mut AgentContext,
    metrics: &std::sync::Arc<Metrics>,
) -> anyhow::Result<()> {
    loop {
        info!(state = state.name(), "entering state");
        match state.next(ctx).await? {
            host_lifecycle::state::Transition::Next(next) => state = next,
            host_lifecycle::state::Transition::Complete => {
                metrics.heartbeat.set(now_unix());
                return Ok(());
            }
        }
    }
}

fn now_unix() -> f64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
