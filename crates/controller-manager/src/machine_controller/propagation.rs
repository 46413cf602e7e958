//! Provider-ID propagation (spec.md 4.E "Provider-ID propagation"): once
//! the agent reports `NodeBootstrapped=True`, finds the kubelet-registered
//! `Node` and stamps its `providerID`, then mirrors addresses/readiness
//! onto the Machine.
//!
//! spec.md describes obtaining "a remote client to the workload cluster"
//! here; this system has no separate management/workload cluster split of
//! its own (the Host and Node objects already live in the one cluster this
//! controller-manager talks to), so that step collapses to reusing the
//! existing client. Noted in DESIGN.md.

use host_lifecycle::error::Error;
use host_lifecycle::types::host::HostConditionType;
use host_lifecycle::types::{Host, Machine};
use kube::api::{Api, Meta, Patch, PatchParams};
use tracing::debug;

use crate::context::ControllerContext;

const FIELD_MANAGER: &str = "hostlet-machine-controller";

pub async fn propagate(ctx: &ControllerContext, host: &Host, machine: &Machine) -> host_lifecycle::Result<()> {
    let bootstrapped = host
        .status
        .as_ref()
        .map_or(false, |s| s.is_true(HostConditionType::NodeBootstrapped));
    if !bootstrapped {
        return Ok(());
    }

    let host_name = host.name();
    let node = match host_lifecycle::node::get(&ctx.client, &host_name).await? {
        Some(n) => n,
        None => {
            // spec.md 4.E edge case: expected while kubelet is still
            // registering. Caller's watch loop will re-deliver this Host.
            debug!(host = %host_name, "node not yet registered");
            return Ok(());
        }
    };

    let provider_id = node.spec.as_ref().and_then(|s| s.provider_id.clone()).unwrap_or_default();
    if provider_id.is_empty() {
        let new_id = host_lifecycle::provider_id::format(&host_name);
        host_lifecycle::node::set_provider_id(&ctx.client, &host_name, &new_id).await?;
    } else if !host_lifecycle::provider_id::is_well_formed(&provider_id) {
        return Err(Error::Validation(format!(
            "node {host_name} carries malformed providerID {provider_id:?}"
        )));
    }

    let addresses = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.clone())
        .unwrap_or_default();

    let namespace = machine.meta().namespace.clone().unwrap_or_default();
    let api: Api<Machine> = Api::namespaced(ctx.client.clone(), &namespace);
    let patch = serde_json::json!({
        "status": {
            "provider_id": host_lifecycle::provider_id::format(&host_name),
            "node_ref": host_name,
            "addresses": addresses,
            "ready": true,
        }
    });
    api.patch_status(&machine.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}
