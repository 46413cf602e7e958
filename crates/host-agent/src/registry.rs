//! Host Registry (spec.md 4.A): creates or adopts this machine's `Host`
//! object and keeps its capacity/network status current.

use host_lifecycle::annotations::FORCE_CLEANUP_AUDIT_ANNOTATION;
use host_lifecycle::types::host::{HostDetails, HostSpec};
use host_lifecycle::types::{Host, NetworkStatus};
use kube::api::{Api, Meta, Patch, PatchParams, PostParams};
use kube::error::ErrorResponse;
use tracing::{info, instrument, warn};

use crate::capacity;
use crate::network;
use crate::state::cleanup::reset_node;

const FIELD_MANAGER: &str = "hostlet-agent";

/// Registers `host_name` if it doesn't already exist, probing capacity and
/// network interfaces for the initial spec/status (spec.md 4.A steps 1-3).
/// If the Host already exists (agent restart, or a previous crash after
/// creation but before the first status patch), this only refreshes
/// status — the spec fields set at creation time are left alone, since a
/// controller may already have claimed the Host by then.
#[instrument(level = "info", skip(client), fields(host_name))]
pub async fn register(client: &kube::Client, host_name: &str) -> host_lifecycle::Result<()> {
    let api: Api<Host> = Api::all(client.clone());

    match api.get(host_name).await {
        Ok(host) => {
            info!("host already registered, refreshing status");
            if host
                .meta()
                .annotations
                .as_ref()
                .map_or(false, |a| a.contains_key(FORCE_CLEANUP_AUDIT_ANNOTATION))
            {
                recover_from_force_cleanup(&api, host_name).await?;
            }
        }
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => {
            info!("registering new host");
            let probed_capacity = capacity::probe()?;
            let host = Host::new(
                host_name,
                HostSpec {
                    capacity: probed_capacity,
                    ..Default::default()
                },
            );
            api.create(&PostParams::default(), &host).await?;
        }
        Err(e) => return Err(host_lifecycle::Error::Kube(e)),
    }

    refresh_status(client, host_name).await
}

/// Re-probes capacity/network/OS details and patches `status` (spec.md
/// 4.A step 2, re-run periodically so a Host's advertised capacity stays
/// accurate across kernel/driver changes without requiring re-registration).
#[instrument(level = "debug", skip(client))]
pub async fn refresh_status(client: &kube::Client, host_name: &str) -> host_lifecycle::Result<()> {
    let api: Api<Host> = Api::all(client.clone());
    let interfaces = network::probe()?;
    let details = probe_host_details();

    // A targeted merge patch, not a full `HostStatus`: the Machine and Host
    // Controllers own `machine_ref`/`conditions`/`cleanup_*` and a full-struct
    // patch would clobber them back to their zero values.
    let patch = serde_json::json!({
        "status": {
            "network": NetworkStatus { interfaces },
            "host_details": details,
        }
    });

    match api
        .patch_status(host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(e) => {
            warn!(host_name, error = %e, "failed to refresh host status");
            Err(host_lifecycle::Error::Kube(e))
        }
    }
}

/// spec.md 4.A step 4: the Host Controller may have force-released this
/// host out from under a crashed or unreachable agent, leaving kubeadm
/// state behind. On the next startup we see, best-effort tear it back down
/// and clear the audit annotation so a fresh claim starts clean.
async fn recover_from_force_cleanup(api: &Api<Host>, host_name: &str) -> host_lifecycle::Result<()> {
    info!("force-cleanup audit annotation present, performing post-force cleanup");
    if let Err(e) = reset_node().await {
        warn!(host_name, error = %e, "post-force cleanup reset failed, continuing");
    }

    let patch = serde_json::json!({
        "metadata": {
            "annotations": { FORCE_CLEANUP_AUDIT_ANNOTATION: serde_json::Value::Null }
        }
    });
    api.patch(host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(host_lifecycle::Error::Kube)?;
    Ok(())
}

fn probe_host_details() -> HostDetails {
    HostDetails {
        os: std::env::consts::OS.to_string(),
        architecture: std::env::consts::ARCH.to_string(),
        os_release: std::fs::read_to_string("/etc/os-release").ok(),
    }
}
