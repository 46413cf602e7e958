//! Host selection (spec.md 4.E "Selection"): narrows the Host pool down to
//! the single candidate the round-robin cursor currently points at.
//!
//! This system models only the Machine fields spec.md explicitly names
//! (cluster name, Kubernetes version, bootstrap-secret name, capacity
//! requirements) rather than the cluster manager's full schema, so there is
//! no generic label-selector field to match against here. Selection
//! narrows on the two criteria that *are* expressible with those fields:
//! "carries no cluster-name label" and "satisfies CapacityRequirements".

use std::collections::HashMap;
use std::sync::Mutex;

use host_lifecycle::annotations::{CLEANUP_ANNOTATION, CLUSTER_NAME_LABEL, CLUSTER_PAUSED_ANNOTATION, PAUSED_ANNOTATION};
use host_lifecycle::error::Error;
use host_lifecycle::types::{Host, Machine, Satisfies};
use kube::api::{Api, ListParams, Meta, Patch, PatchParams};
use tracing::debug;

use crate::context::ControllerContext;

const FIELD_MANAGER: &str = "hostlet-machine-controller";

/// Returns the Host the round-robin cursor currently selects among the
/// top-priority, capacity-satisfying, unclaimed candidates, or `None` if
/// there are no eligible Hosts at all (spec.md 4.E edge case: an empty
/// candidate pool is not an error, just nothing to do this reconcile).
pub async fn select_host(ctx: &ControllerContext, machine: &Machine) -> host_lifecycle::Result<Option<Host>> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let list = api.list(&ListParams::default()).await.map_err(host_lifecycle::Error::Kube)?;

    let mut candidates: Vec<Host> = list
        .items
        .into_iter()
        .filter(|h| {
            h.meta()
                .labels
                .as_ref()
                .map_or(true, |l| !l.contains_key(CLUSTER_NAME_LABEL))
        })
        .filter(|h| {
            h.meta()
                .annotations
                .as_ref()
                .map_or(true, |a| !a.contains_key(CLEANUP_ANNOTATION))
        })
        .filter(|h| h.status.as_ref().map_or(true, |s| s.is_unclaimed()))
        .filter(|h| machine.spec.capacity_requirements.satisfies(&h.spec.capacity))
        .collect();

    if candidates.is_empty() {
        debug!(machine = %machine.name(), "no eligible hosts for selection");
        return Ok(None);
    }

    let max_priority = candidates.iter().map(|h| h.spec.priority).max().unwrap();
    candidates.retain(|h| h.spec.priority == max_priority);
    // Deterministic ordering before cursor indexing so "position cursor mod
    // N" means the same thing across reconciles that see the same set.
    candidates.sort_by(|a, b| a.name().cmp(&b.name()));

    let cluster_name = machine.spec.cluster_name.clone().unwrap_or_default();
    let idx = next_cursor(&ctx.selection_cursor, &cluster_name, candidates.len());
    Ok(Some(candidates[idx].clone()))
}

/// spec.md 4.E edge case: "A Machine whose owning cluster is paused: mark
/// the host paused annotation, mark the Machine condition accordingly, do
/// nothing else." Returns `true` when the caller should stop reconciling
/// this Machine for the rest of this pass.
pub async fn handle_paused(ctx: &ControllerContext, machine: &Machine, host: Option<&Host>) -> host_lifecycle::Result<bool> {
    let paused = machine
        .meta()
        .annotations
        .as_ref()
        .map_or(false, |a| a.contains_key(CLUSTER_PAUSED_ANNOTATION));
    if !paused {
        return Ok(false);
    }

    if let Some(host) = host {
        let api: Api<Host> = Api::all(ctx.client.clone());
        let patch = serde_json::json!({
            "metadata": { "annotations": { PAUSED_ANNOTATION: "true" } }
        });
        api.patch(&host.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
            .await
            .map_err(Error::Kube)?;
    }

    let ns = machine.meta().namespace.clone().unwrap_or_default();
    let mapi: Api<Machine> = Api::namespaced(ctx.client.clone(), &ns);
    let status_patch = serde_json::json!({ "status": { "paused": true } });
    mapi.patch_status(&machine.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(status_patch))
        .await
        .map_err(Error::Kube)?;

    Ok(true)
}

fn next_cursor(cursor: &Mutex<HashMap<String, usize>>, cluster_name: &str, len: usize) -> usize {
    let mut cursor = cursor.lock().expect("selection cursor mutex poisoned");
    let slot = cursor.entry(cluster_name.to_string()).or_insert(0);
    let idx = *slot % len;
    *slot = slot.wrapping_add(1);
    idx
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cursor_advances_and_wraps() {
        let cursor = Mutex::new(HashMap::new());
        assert_eq!(next_cursor(&cursor, "c1", 3), 0);
        assert_eq!(next_cursor(&cursor, "c1", 3), 1);
        assert_eq!(next_cursor(&cursor, "c1", 3), 2);
        assert_eq!(next_cursor(&cursor, "c1", 3), 0);
    }

    #[test]
    fn cursor_is_independent_per_cluster() {
        let cursor = Mutex::new(HashMap::new());
        assert_eq!(next_cursor(&cursor, "c1", 2), 0);
        assert_eq!(next_cursor(&cursor, "c2", 2), 0);
        assert_eq!(next_cursor(&cursor, "c1", 2), 1);
    }
}
