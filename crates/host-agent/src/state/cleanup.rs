//! `Cleanup` (spec.md 4.D, 4.F): tear the node back down to bare metal and
//! release the Host back to the pool.
//!
//! Errors here are classified [`host_lifecycle::CleanupError`] (the
//! Permanent/Transient split resolving spec.md's own Open Question about
//! distinguishing "uninstall script doesn't exist" from "network blip
//! mid-download") rather than left for the Host Controller to pattern-match
//! on a string.

use std::time::Duration;

use async_trait::async_trait;
use host_lifecycle::annotations::{
    ATTACHED_MACHINE_LABEL, BUNDLE_REGISTRY_ANNOTATION, CLEANUP_ANNOTATION,
    CLEANUP_STARTED_ANNOTATION, CLUSTER_NAME_LABEL, CONTROL_PLANE_ENDPOINT_ANNOTATION,
    KUBERNETES_VERSION_ANNOTATION,
};
use host_lifecycle::types::host::HostConditionType;
use host_lifecycle::types::Host;
use kube::api::{Api, Patch, PatchParams};
use tracing::{info, instrument, warn};

use crate::context::AgentContext;
use host_lifecycle::state::{State, Transition};
use host_lifecycle::CleanupError;

const FIELD_MANAGER: &str = "hostlet-agent";

/// Config/data paths removed on cleanup (spec.md 4.F: "delete a fixed set
/// of config/data files and directories").
const CLEANUP_PATHS: &[&str] = &[
    "/etc/kubernetes",
    "/var/lib/kubelet",
    "/var/lib/cni",
    "/etc/cni/net.d",
    "/var/run/kubernetes",
    "/etc/systemd/system/kubelet.service",
    "/etc/systemd/system/kube-proxy.service",
];

/// Services stopped before their data directories are removed.
const MANAGED_SERVICES: &[&str] = &["kubelet", "kube-proxy", "containerd"];

const UNINSTALL_SCRIPT_ATTEMPTS: u32 = 3;
const UNINSTALL_SCRIPT_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct Cleanup;

#[async_trait]
impl State<AgentContext> for Cleanup {
    #[instrument(level = "info", skip(self, ctx), fields(host = %ctx.config.host_name))]
    async fn next(
        self: Box<Self>,
        ctx: &mut AgentContext,
    ) -> anyhow::Result<Transition<Box<dyn State<AgentContext>>>> {
        let hosts: Api<Host> = Api::all(ctx.client.clone());
        let host = hosts.get(&ctx.config.host_name).await?;

        let components_installed = host
            .status
            .as_ref()
            .map_or(false, |s| s.is_true(HostConditionType::ComponentsInstalled));

        if components_installed {
            if let Err(e) = reset_node().await {
                match e {
                    CleanupError::Permanent(err) => {
                        warn!(error = %err, "node reset permanently failed, proceeding with release anyway");
                    }
                    CleanupError::Transient(err) => {
                        warn!(error = %err, "node reset transiently failed, will retry cleanup");
                        tokio::time::sleep(Duration::from_secs(30)).await;
                        return Ok(Transition::Next(Box::new(Cleanup)));
                    }
                }
            }
        } else {
            info!("ComponentsInstalled=False, skipping kubeadm-reset");
        }

        // Node deletion and annotation/label clearing happen regardless of
        // whether components were ever installed (spec.md §8: "a cleanup
        // with ComponentsInstalled=False ... still deletes the Node object
        // and clears annotations").
        if let Err(e) = host_lifecycle::node::delete(&ctx.client, &ctx.config.host_name).await {
            warn!(error = %e, "best-effort Node deletion failed, continuing");
        }

        release_virtual_ips(&host).await;

        if let Err(e) = run_uninstall(&host, &ctx.config.data_dir).await {
            match e {
                CleanupError::Permanent(err) => {
                    warn!(error = %err, "uninstall script permanently failed, releasing anyway");
                }
                CleanupError::Transient(err) => {
                    warn!(error = %err, "uninstall script transiently failed after all retries, releasing anyway");
                }
            }
        }

        let status_patch = serde_json::json!({
            "status": {
                "machine_ref": serde_json::Value::Null,
                "cleanup_completed": true,
            }
        });
        hosts
            .patch_status(&ctx.config.host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status_patch))
            .await
            .map_err(host_lifecycle::Error::Kube)?;

        let release_patch = serde_json::json!({
            "metadata": {
                "labels": {
                    CLUSTER_NAME_LABEL: serde_json::Value::Null,
                    ATTACHED_MACHINE_LABEL: serde_json::Value::Null,
                },
                "annotations": {
                    CLEANUP_ANNOTATION: serde_json::Value::Null,
                    CLEANUP_STARTED_ANNOTATION: serde_json::Value::Null,
                    CONTROL_PLANE_ENDPOINT_ANNOTATION: serde_json::Value::Null,
                    KUBERNETES_VERSION_ANNOTATION: serde_json::Value::Null,
                    BUNDLE_REGISTRY_ANNOTATION: serde_json::Value::Null,
                },
            },
            "spec": {
                "bootstrap_secret_ref": serde_json::Value::Null,
                "uninstall_script": serde_json::Value::Null,
            }
        });
        hosts
            .patch(&ctx.config.host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(release_patch))
            .await
            .map_err(host_lifecycle::Error::Kube)?;

        crate::local_state::clear(&ctx.config.data_dir).await?;
        crate::local_state::clear_bootstrap_sentinel(&ctx.config.data_dir).await?;
        info!("cleanup complete, host released");
        Ok(Transition::Complete)
    }

    fn name(&self) -> &'static str {
        "Cleanup"
    }
}

/// Tears the kubeadm join back down: `kubeadm reset --force` if the binary
/// is present, otherwise the manual equivalent (stop services, remove
/// state) anyway; then stops the managed services, removes their config
/// and data directories, and reloads systemd (spec.md 4.F Cleanup step).
pub(crate) async fn reset_node() -> Result<(), CleanupError> {
    match host_lifecycle::command::run("kubeadm", &["reset", "--force"], Duration::from_secs(60)).await {
        Ok(output) if output.status.success() => {
            info!("kubeadm reset succeeded");
        }
        Ok(output) => {
            warn!(code = ?output.status.code(), "kubeadm reset exited non-zero, continuing with manual teardown");
        }
        Err(host_lifecycle::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("kubeadm binary absent, running manual equivalent");
        }
        Err(e) => return Err(classify_io_error(e)),
    }

    for service in MANAGED_SERVICES {
        if let Err(e) = host_lifecycle::command::run("systemctl", &["stop", service], Duration::from_secs(30)).await {
            warn!(service, error = %e, "failed to stop service during cleanup, continuing");
        }
    }

    for path in CLEANUP_PATHS {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_dir() => {
                if let Err(e) = tokio::fs::remove_dir_all(path).await {
                    warn!(path, error = %e, "failed to remove directory during cleanup, continuing");
                }
            }
            Ok(_) => {
                if let Err(e) = tokio::fs::remove_file(path).await {
                    warn!(path, error = %e, "failed to remove file during cleanup, continuing");
                }
            }
            Err(_) => {}
        }
    }

    if let Err(e) = host_lifecycle::command::run("systemctl", &["daemon-reload"], Duration::from_secs(30)).await {
        warn!(error = %e, "systemctl daemon-reload failed during cleanup, continuing");
    }

    Ok(())
}

/// This system doesn't run its own virtual-IP manager (no keepalived/VRRP
/// config exists anywhere in the tree), so "release any virtual-IP
/// endpoints held" is a logged best-effort no-op rather than a real
/// release call — there is nothing local to release.
async fn release_virtual_ips(host: &Host) {
    if host.spec.manage_kube_proxy {
        info!("no virtual-IP manager configured, nothing to release");
    }
}

fn classify_io_error(e: host_lifecycle::Error) -> CleanupError {
    let msg = e.to_string();
    if msg.contains("connection refused") || msg.contains("no such file or directory") {
        CleanupError::Permanent(anyhow::anyhow!(msg))
    } else {
        CleanupError::Transient(anyhow::anyhow!(msg))
    }
}

/// Idempotent uninstall scripts are written to disk and run as a file
/// (spec.md 4.F), the same way [`super::install_components`] stages its
/// install script: the command-runner's shell-metacharacter blocklist
/// (spec.md §8) applies to arguments built from untrusted pieces, not to a
/// script body that's meant to contain shell syntax. Retried up to
/// [`UNINSTALL_SCRIPT_ATTEMPTS`] times, 30 s apart (spec.md 4.F "Cleanup
/// retry loop for node reset").
async fn run_uninstall(host: &Host, data_dir: &std::path::Path) -> Result<(), CleanupError> {
    let script = match &host.spec.uninstall_script {
        Some(s) => s,
        None => return Ok(()),
    };

    let script_path = data_dir.join("uninstall.sh");
    tokio::fs::create_dir_all(data_dir)
        .await
        .map_err(|e| CleanupError::Transient(anyhow::anyhow!(e)))?;
    tokio::fs::write(&script_path, script)
        .await
        .map_err(|e| CleanupError::Transient(anyhow::anyhow!(e)))?;

    let path_str = script_path
        .to_str()
        .ok_or_else(|| CleanupError::Permanent(anyhow::anyhow!("data_dir path is not valid UTF-8")))?;

    let mut last_err = None;
    for attempt in 1..=UNINSTALL_SCRIPT_ATTEMPTS {
        match host_lifecycle::command::run("sh", &[path_str], Duration::from_secs(120)).await {
            Ok(output) if output.status.success() => return Ok(()),
            Ok(output) => {
                return Err(CleanupError::Permanent(anyhow::anyhow!(
                    "uninstall script exited with {:?}",
                    output.status.code()
                )))
            }
            Err(e) => {
                warn!(attempt, error = %e, "uninstall script attempt failed");
                last_err = Some(e);
                if attempt < UNINSTALL_SCRIPT_ATTEMPTS {
                    tokio::time::sleep(UNINSTALL_SCRIPT_RETRY_DELAY).await;
                }
            }
        }
    }

    Err(CleanupError::Transient(anyhow::anyhow!(
        "uninstall script failed after {UNINSTALL_SCRIPT_ATTEMPTS} attempts: {}",
        last_err.map(|e| e.to_string()).unwrap_or_default()
    )))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn permanent_errors_are_string_matched() {
        let e = classify_io_error(host_lifecycle::Error::Validation("connection refused".to_string()));
        assert!(e.is_permanent());
        let e = classify_io_error(host_lifecycle::Error::Validation("disk quota exceeded".to_string()));
        assert!(!e.is_permanent());
    }

    #[test]
    fn cleanup_paths_cover_the_kubeadm_state_directories() {
        assert!(CLEANUP_PATHS.contains(&"/etc/kubernetes"));
        assert!(CLEANUP_PATHS.contains(&"/var/lib/kubelet"));
    }
}
