//! Host Controller (spec.md 4.D): watches `Host` objects and drives the
//! cleanup-timeout / force-release state machine. A plain
//! `kube_runtime::watcher` stream, `try_next`-polled, no admission webhook
//! machinery since this system never needed one.

use std::time::Duration;

use futures::TryStreamExt;
use host_lifecycle::annotations::{
    CLEANUP_ANNOTATION, CLEANUP_STARTED_ANNOTATION, FORCE_CLEANUP_AUDIT_ANNOTATION,
};
use host_lifecycle::types::Host;
use kube::api::{Api, ListParams, Meta, Patch, PatchParams};
use kube_runtime::watcher;
use tracing::{info, instrument, warn};

use crate::context::ControllerContext;

const FIELD_MANAGER: &str = "hostlet-host-controller";

#[instrument(level = "info", skip(ctx))]
pub async fn run(ctx: ControllerContext, cleanup_timeout: Duration) {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let mut stream = watcher(api, ListParams::default()).boxed();

    loop {
        match stream.try_next().await {
            Ok(Some(watcher::Event::Applied(host))) => {
                if let Err(e) = reconcile_host(&ctx, &host, cleanup_timeout).await {
                    warn!(host = %host.name(), error = %e, "host reconcile failed");
                }
            }
            Ok(Some(watcher::Event::Restarted(hosts))) => {
                for host in hosts {
                    if let Err(e) = reconcile_host(&ctx, &host, cleanup_timeout).await {
                        warn!(host = %host.name(), error = %e, "host reconcile failed on resync");
                    }
                }
            }
            Ok(Some(watcher::Event::Deleted(_))) => {}
            Ok(None) => break,
            Err(e) => warn!(error = %e, "error streaming host events"),
        }
    }
}

/// Applies the per-host cleanup/force-release decision (spec.md 4.D).
#[instrument(level = "debug", skip(ctx, host), fields(host = %host.name()))]
async fn reconcile_host(ctx: &ControllerContext, host: &Host, cleanup_timeout: Duration) -> host_lifecycle::Result<()> {
    let annotations = host.meta().annotations.clone().unwrap_or_default();
    if annotations.get(CLEANUP_ANNOTATION).is_none() {
        return Ok(());
    }

    if host.status.as_ref().map_or(true, |s| s.cleanup_completed) {
        return Ok(());
    }

    let started_at = match annotations.get(CLEANUP_STARTED_ANNOTATION) {
        Some(ts) => chrono::DateTime::parse_from_rfc3339(ts)
            .map(|d| d.with_timezone(&chrono::Utc))
            .map_err(|e| host_lifecycle::Error::Validation(format!("malformed {CLEANUP_STARTED_ANNOTATION}: {e}")))?,
        None => {
            stamp_cleanup_started(ctx, host).await?;
            return Ok(());
        }
    };

    let elapsed = chrono::Utc::now().signed_duration_since(started_at);
    if elapsed.to_std().unwrap_or(Duration::ZERO) < cleanup_timeout {
        return Ok(());
    }

    force_release(ctx, host, elapsed.num_seconds(), cleanup_timeout).await
}

async fn stamp_cleanup_started(ctx: &ControllerContext, host: &Host) -> host_lifecycle::Result<()> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({
        "metadata": {
            "annotations": {
                CLEANUP_STARTED_ANNOTATION: chrono::Utc::now().to_rfc3339(),
            }
        }
    });
    api.patch(&host.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(host_lifecycle::Error::Kube)?;
    Ok(())
}

/// Force-releases a Host whose agent did not complete cleanup in time
/// (spec.md 4.D `[ForceReleased]`): deletes the workload Node directly,
/// clears `status.machine_ref`, marks cleanup completed, clears the
/// cleanup/cleanup-started annotations, and writes an audit annotation
/// recording why.
async fn force_release(
    ctx: &ControllerContext,
    host: &Host,
    elapsed_secs: i64,
    timeout: Duration,
) -> host_lifecycle::Result<()> {
    warn!(host = %host.name(), elapsed_secs, "force-releasing host past cleanup timeout");
    let api: Api<Host> = Api::all(ctx.client.clone());

    host_lifecycle::node::delete(&ctx.client, &host.name()).await?;

    let audit = format!(
        "timestamp={},reason=agent_unavailable,timeout={}s,elapsed={}s",
        chrono::Utc::now().to_rfc3339(),
        timeout.as_secs(),
        elapsed_secs
    );

    let patch = serde_json::json!({
        "metadata": {
            "annotations": {
                FORCE_CLEANUP_AUDIT_ANNOTATION: audit,
                CLEANUP_ANNOTATION: serde_json::Value::Null,
                CLEANUP_STARTED_ANNOTATION: serde_json::Value::Null,
            }
        }
    });
    api.patch(&host.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(host_lifecycle::Error::Kube)?;

    let status_patch = serde_json::json!({
        "status": {
            "machine_ref": serde_json::Value::Null,
            "cleanup_completed": true,
        }
    });
    api.patch_status(&host.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status_patch))
        .await
        .map_err(host_lifecycle::Error::Kube)?;

    info!(host = %host.name(), "host force-released");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn audit_string_contains_required_fields() {
        let audit = format!(
            "timestamp={},reason=agent_unavailable,timeout={}s,elapsed={}s",
            chrono::Utc::now().to_rfc3339(),
            300,
            301
        );
        assert!(audit.contains("reason=agent_unavailable"));
        assert!(audit.contains("timeout=300s"));
        assert!(audit.contains("elapsed=301s"));
    }
}
