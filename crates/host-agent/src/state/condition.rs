//! Shared condition-patching helper for the install/bootstrap states.
//!
//! `Host.status.conditions` is a plain array, and a JSON merge patch
//! replaces arrays wholesale (RFC 7386) rather than merging by key. Setting
//! one condition at a time without reading the others first would silently
//! erase them — in particular it would let `NodeBootstrapped=True` land
//! without `ComponentsInstalled=True` still present, breaking the
//! invariant in spec.md §3. This always reads-modifies-writes the full list.

use host_lifecycle::types::host::{HostCondition, HostConditionType};
use host_lifecycle::types::Host;
use kube::api::{Api, Patch, PatchParams};

const FIELD_MANAGER: &str = "hostlet-agent";

pub async fn upsert(
    hosts: &Api<Host>,
    host_name: &str,
    type_: HostConditionType,
    reason: &str,
) -> host_lifecycle::Result<()> {
    let current = hosts.get(host_name).await.map_err(host_lifecycle::Error::Kube)?;
    let mut conditions = current
        .status
        .map(|s| s.conditions)
        .unwrap_or_default();

    let new_condition = HostCondition {
        type_,
        status: true,
        reason: Some(reason.to_string()),
        message: None,
        last_transition_time: chrono::Utc::now(),
    };

    match conditions.iter_mut().find(|c| c.type_ == type_) {
        Some(existing) => *existing = new_condition,
        None => conditions.push(new_condition),
    }

    let patch = serde_json::json!({ "status": { "conditions": conditions } });
    hosts
        .patch_status(host_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(host_lifecycle::Error::Kube)?;
    Ok(())
}
