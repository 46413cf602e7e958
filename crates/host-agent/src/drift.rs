//! Drift Detector (spec.md 4.G): a periodic background sweep enforcing OS
//! invariants independent of the claim state machine — it runs for the
//! whole lifetime of the agent process, not just while `Running`, since a
//! host can drift out of compliance while still mid-bootstrap.

use std::time::Duration;

use tracing::{info, instrument, warn};

use crate::context::AgentContext;

/// Runs forever, sweeping every `interval`. Intended to be spawned as its
/// own task alongside the claim state machine (spec.md 4.G: "runs
/// independently of, and concurrently with, the Host Reconciler").
#[instrument(level = "info", skip(ctx))]
pub async fn run(ctx: AgentContext, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = sweep(&ctx).await {
            warn!(error = %e, "drift sweep failed");
        }
    }
}

/// One sweep: check and, if needed, re-enforce each OS invariant this
/// system cares about. Kept intentionally small (spec.md's Non-goals rule
/// out a general configuration-management engine) — swap-disabled and
/// kubelet-service-enabled are the two invariants spec.md 4.G names.
async fn sweep(ctx: &AgentContext) -> host_lifecycle::Result<()> {
    enforce_swap_disabled().await?;
    enforce_kubelet_enabled(ctx).await?;
    Ok(())
}

async fn enforce_swap_disabled() -> host_lifecycle::Result<()> {
    let status = host_lifecycle::command::run("swapon", &["--show", "--noheadings"], Duration::from_secs(5)).await?;
    if !status.stdout.is_empty() {
        info!("swap detected, disabling");
        host_lifecycle::command::run("swapoff", &["-a"], Duration::from_secs(10)).await?;
    }
    Ok(())
}

async fn enforce_kubelet_enabled(_ctx: &AgentContext) -> host_lifecycle::Result<()> {
    let status = host_lifecycle::command::run(
        "systemctl",
        &["is-enabled", "kubelet"],
        Duration::from_secs(5),
    )
    .await;

    match status {
        Ok(out) if out.status.success() => Ok(()),
        _ => {
            info!("kubelet service not enabled, re-enabling");
            host_lifecycle::command::run("systemctl", &["enable", "kubelet"], Duration::from_secs(10)).await?;
            Ok(())
        }
    }
}
