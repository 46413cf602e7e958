//! Deletion flow (spec.md 4.E "Deletion flow"): releases the attached Host
//! and lets the finalizer drop once release is observed or the Host
//! Controller's timeout (4.D) force-releases it.

use host_lifecycle::annotations::{ATTACHED_MACHINE_LABEL, CLEANUP_ANNOTATION, MACHINE_FINALIZER, REMEDIATION_ANNOTATION};
use host_lifecycle::error::Error;
use host_lifecycle::types::{Host, Machine};
use kube::api::{Api, ListParams, Meta, Patch, PatchParams};
use tracing::info;

use crate::context::ControllerContext;

const FIELD_MANAGER: &str = "hostlet-machine-controller";

/// Locates the Host attached to `machine`: by the attached-machine label
/// first, falling back to matching `MachineRef.uid` directly (spec.md 4.E
/// deletion flow step 1) for the case where labels were cleared out of
/// band but the status back-reference survives.
pub async fn find_attached_host(ctx: &ControllerContext, machine: &Machine) -> host_lifecycle::Result<Option<Host>> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let selector = format!("{ATTACHED_MACHINE_LABEL}={}", machine.name());
    let list = api
        .list(&ListParams::default().labels(&selector))
        .await
        .map_err(Error::Kube)?;
    if let Some(host) = list.items.into_iter().next() {
        return Ok(Some(host));
    }

    let machine_uid = machine.meta().uid.clone().unwrap_or_default();
    if machine_uid.is_empty() {
        return Ok(None);
    }
    let all = api.list(&ListParams::default()).await.map_err(Error::Kube)?;
    Ok(all.items.into_iter().find(|h| {
        h.status
            .as_ref()
            .and_then(|s| s.machine_ref.as_ref())
            .map_or(false, |m| m.uid == machine_uid)
    }))
}

/// Drives spec.md 4.E's deletion flow one step. Returns `true` once the
/// Machine's finalizer is safe to remove.
pub async fn reconcile_deletion(ctx: &ControllerContext, machine: &Machine) -> host_lifecycle::Result<bool> {
    let Some(host) = find_attached_host(ctx, machine).await? else {
        return Ok(true);
    };

    let host_name = host.name();
    let already_cleaning = host
        .meta()
        .annotations
        .as_ref()
        .map_or(false, |a| a.contains_key(CLEANUP_ANNOTATION));

    if !already_cleaning {
        start_cleanup(ctx, &host_name).await?;
        return Ok(false);
    }

    // spec.md 4.E edge case: a Machine flagged unhealthy by an external
    // health checker whose Node is already gone doesn't need to wait out
    // the Host Controller's force-release timeout (4.D) — there's nothing
    // left running on the host to race with.
    if is_flagged_for_remediation(machine) {
        let node_absent = host_lifecycle::node::get(&ctx.client, &host_name).await?.is_none();
        if node_absent {
            finalize_host(ctx, &host_name).await?;
            info!(host = %host_name, machine = %machine.name(), "remediation-flagged machine with absent node, bypassing cleanup timeout");
            return Ok(true);
        }
    }

    // Wait for either the agent clearing MachineRef itself, or the Host
    // Controller's force-release timeout (4.D) doing it on the agent's
    // behalf. Either way the observable signal is the same: MachineRef==nil.
    let released = host.status.as_ref().map_or(true, |s| s.is_unclaimed());
    if !released {
        return Ok(false);
    }

    finalize_host(ctx, &host_name).await?;
    info!(host = %host_name, machine = %machine.name(), "machine deletion unblocked host release");
    Ok(true)
}

fn is_flagged_for_remediation(machine: &Machine) -> bool {
    machine
        .meta()
        .annotations
        .as_ref()
        .map_or(false, |a| a.contains_key(REMEDIATION_ANNOTATION))
}

async fn start_cleanup(ctx: &ControllerContext, host_name: &str) -> host_lifecycle::Result<()> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({
        "metadata": { "annotations": { CLEANUP_ANNOTATION: "true" } }
    });
    api.patch(host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(Error::Kube)?;

    let status_patch = serde_json::json!({ "status": { "machine_ref": serde_json::Value::Null } });
    api.patch_status(host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status_patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

async fn finalize_host(ctx: &ControllerContext, host_name: &str) -> host_lifecycle::Result<()> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": { "cleanup_completed": true } });
    api.patch_status(host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

/// Clears `Machine.status.node_ref` and removes [`MACHINE_FINALIZER`],
/// letting the object be reaped (spec.md 4.E deletion flow step 4).
pub async fn remove_finalizer(ctx: &ControllerContext, machine: &Machine) -> host_lifecycle::Result<()> {
    let ns = machine.meta().namespace.clone().unwrap_or_default();
    let api: Api<Machine> = Api::namespaced(ctx.client.clone(), &ns);
    let name = machine.name();

    let status_patch = serde_json::json!({ "status": { "node_ref": serde_json::Value::Null } });
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status_patch))
        .await
        .map_err(Error::Kube)?;

    let finalizers: Vec<String> = machine
        .meta()
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != MACHINE_FINALIZER)
        .collect();
    let finalizer_patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(finalizer_patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

/// Ensures [`MACHINE_FINALIZER`] is present, called the first time the
/// Machine Controller sees a not-yet-deleting Machine.
pub async fn ensure_finalizer(ctx: &ControllerContext, machine: &Machine) -> host_lifecycle::Result<()> {
    let already_present = machine
        .meta()
        .finalizers
        .as_ref()
        .map_or(false, |f| f.iter().any(|x| x == MACHINE_FINALIZER));
    if already_present {
        return Ok(());
    }

    let ns = machine.meta().namespace.clone().unwrap_or_default();
    let api: Api<Machine> = Api::namespaced(ctx.client.clone(), &ns);
    let mut finalizers = machine.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(MACHINE_FINALIZER.to_string());
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers } });
    api.patch(&machine.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use kube::api::ObjectMeta;

    fn machine_with_annotations(annotations: std::collections::BTreeMap<String, String>) -> Machine {
        let mut machine = Machine::new("m1", Default::default());
        machine.metadata = ObjectMeta {
            annotations: Some(annotations),
            ..Default::default()
        };
        machine
    }

    #[test]
    fn detects_remediation_annotation() {
        let mut annotations = std::collections::BTreeMap::new();
        annotations.insert(REMEDIATION_ANNOTATION.to_string(), "true".to_string());
        assert!(is_flagged_for_remediation(&machine_with_annotations(annotations)));
        assert!(!is_flagged_for_remediation(&machine_with_annotations(Default::default())));
    }
}
