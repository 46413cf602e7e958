//! Binding (spec.md 4.E step 5): once a lease is held, writes the claim
//! fields onto the Host and hands back control to the caller, which
//! releases the lease regardless of success or failure.

use host_lifecycle::annotations::{
    ATTACHED_MACHINE_LABEL, BUNDLE_REGISTRY_ANNOTATION, CLUSTER_NAME_LABEL,
    CONTROL_PLANE_ENDPOINT_ANNOTATION, KUBERNETES_VERSION_ANNOTATION,
};
use host_lifecycle::error::Error;
use host_lifecycle::types::host::JoinMode;
use host_lifecycle::types::{Host, Machine, MachineRef};
use kube::api::{Api, Meta, Patch, PatchParams};
use tracing::info;

use crate::bootstrap_credential_controller;
use crate::context::ControllerContext;

const FIELD_MANAGER: &str = "hostlet-machine-controller";

/// Endpoint and registry values copied onto the Host's annotations at bind
/// time (spec.md 4.E step 5). Supplied by the caller since this module has
/// no opinion on where they come from (cluster config, flags, ...).
pub struct BindParams<'a> {
    pub control_plane_endpoint: &'a str,
    pub bundle_registry: &'a str,
}

/// Performs spec.md 4.E step 5 under an already-acquired lease: writes
/// `MachineRef`, claim labels/annotations, the bootstrap-secret reference,
/// and the copied spec fields.
pub async fn bind(
    ctx: &ControllerContext,
    host: &Host,
    machine: &Machine,
    params: &BindParams<'_>,
) -> host_lifecycle::Result<()> {
    let host_name = host.name();
    let cluster_name = machine.spec.cluster_name.clone().unwrap_or_default();

    let bootstrap_secret_ref = match host.spec.join_mode {
        JoinMode::Kubeadm => machine.spec.bootstrap_secret_name.clone(),
        JoinMode::TlsBootstrap => Some(
            bootstrap_credential_controller::ensure_tls_bootstrap_secret(
                ctx,
                host,
                machine,
                params.control_plane_endpoint,
            )
            .await?,
        ),
    };

    let machine_ref = MachineRef {
        api_version: "cluster.x-k8s.io/v1beta1".to_string(),
        kind: "Machine".to_string(),
        namespace: machine.meta().namespace.clone().unwrap_or_default(),
        name: machine.name(),
        uid: machine.meta().uid.clone().unwrap_or_default(),
    };

    // join_mode/download_mode/manage_kube_proxy are omitted entirely rather
    // than sent as `null` when the Machine doesn't specify them: a
    // merge-patch `null` would clear the Host's existing value instead of
    // leaving it untouched.
    let mut spec_patch = serde_json::json!({
        "kubernetes_version": machine.spec.kubernetes_version,
        "bootstrap_secret_ref": bootstrap_secret_ref,
    });
    let spec_obj = spec_patch.as_object_mut().expect("object literal");
    if let Some(join_mode) = machine.spec.join_mode {
        spec_obj.insert("join_mode".to_string(), serde_json::json!(join_mode));
    }
    if let Some(download_mode) = machine.spec.download_mode {
        spec_obj.insert("download_mode".to_string(), serde_json::json!(download_mode));
    }
    if let Some(manage_kube_proxy) = machine.spec.manage_kube_proxy {
        spec_obj.insert("manage_kube_proxy".to_string(), serde_json::json!(manage_kube_proxy));
    }

    let meta_and_spec_patch = serde_json::json!({
        "metadata": {
            "labels": {
                CLUSTER_NAME_LABEL: cluster_name,
                ATTACHED_MACHINE_LABEL: machine.name(),
            },
            "annotations": {
                CONTROL_PLANE_ENDPOINT_ANNOTATION: params.control_plane_endpoint,
                KUBERNETES_VERSION_ANNOTATION: machine.spec.kubernetes_version.clone().unwrap_or_default(),
                BUNDLE_REGISTRY_ANNOTATION: params.bundle_registry,
            }
        },
        "spec": spec_patch,
    });

    let status_patch = serde_json::json!({
        "status": { "machine_ref": machine_ref },
    });

    let api: Api<Host> = Api::all(ctx.client.clone());
    api.patch(&host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(meta_and_spec_patch))
        .await
        .map_err(Error::Kube)?;
    api.patch_status(&host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status_patch))
        .await
        .map_err(Error::Kube)?;

    info!(host = %host_name, machine = %machine.name(), "bound host to machine");
    Ok(())
}
