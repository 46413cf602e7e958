//! Claim arbitration (spec.md 4.E "Claim arbitration"): the critical
//! section that lets multiple controller-manager replicas race for the
//! same Host without double-binding it.
//!
//! Mutual exclusion is the lease annotation written via a full **update**
//! (not a patch) so the write relies on resource-version compare-and-set
//! rather than a merge that could silently coexist with a competitor's.

use chrono::{DateTime, Utc};
use host_lifecycle::annotations::CLAIM_LEASE_ANNOTATION;
use host_lifecycle::error::Error;
use host_lifecycle::types::{Host, Machine};
use kube::api::{Api, Meta, PostParams};
use kube::error::ErrorResponse;
use tracing::{debug, warn};

use crate::context::ControllerContext;

struct Lease {
    controller: String,
    acquired: DateTime<Utc>,
}

fn parse_lease(raw: &str) -> Option<Lease> {
    let mut controller = None;
    let mut acquired = None;
    for field in raw.split(',') {
        let (key, value) = field.split_once('=')?;
        match key {
            "controller" => controller = Some(value.to_string()),
            "acquired" => acquired = DateTime::parse_from_rfc3339(value).ok().map(|d| d.with_timezone(&Utc)),
            _ => {}
        }
    }
    Some(Lease {
        controller: controller?,
        acquired: acquired?,
    })
}

fn format_lease(identity: &str, machine_name: &str, now: DateTime<Utc>) -> String {
    format!("controller={identity},machine={machine_name},acquired={}", now.to_rfc3339())
}

/// Attempts to acquire the claim lease on `host`. Returns `Ok(true)` if the
/// lease is now held by this controller's identity, `Ok(false)` if another
/// live lease or a conflicting write means the caller should try the next
/// candidate.
pub async fn try_acquire(ctx: &ControllerContext, host: &Host, machine: &Machine) -> host_lifecycle::Result<bool> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let host_name = host.name();

    // Step 1: re-read at the latest resource version — `host` may already
    // be stale by the time selection handed it to us.
    let current = match api.get(&host_name).await {
        Ok(h) => h,
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => return Ok(false),
        Err(e) => return Err(Error::Kube(e)),
    };

    // Step 2: stale MachineRef cleanup.
    if let Some(machine_ref) = current.status.as_ref().and_then(|s| s.machine_ref.as_ref()) {
        let machines: Api<Machine> = Api::namespaced(ctx.client.clone(), &machine_ref.namespace);
        let still_live = match machines.get(&machine_ref.name).await {
            Ok(m) => m.metadata.deletion_timestamp.is_none(),
            Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => false,
            Err(e) => return Err(Error::Kube(e)),
        };
        if still_live {
            return Ok(false);
        }
        clear_stale_machine_ref(ctx, &host_name).await?;
    }

    // Step 3: live-lease check.
    let annotations = current.meta().annotations.clone().unwrap_or_default();
    if let Some(raw) = annotations.get(CLAIM_LEASE_ANNOTATION) {
        if let Some(lease) = parse_lease(raw) {
            let expires = lease.acquired + chrono::Duration::seconds(host_lifecycle::annotations::CLAIM_LEASE_TTL_SECS);
            if expires > Utc::now() && lease.controller != ctx.identity {
                debug!(host = %host_name, held_by = %lease.controller, "host lease still live, skipping");
                return Ok(false);
            }
        }
    }

    // Step 4: acquire via full update, relying on resource-version CAS.
    let mut updated = current.clone();
    let lease_value = format_lease(&ctx.identity, &machine.name(), Utc::now());
    updated
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(CLAIM_LEASE_ANNOTATION.to_string(), lease_value);

    match api.replace(&host_name, &PostParams::default(), &updated).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(ErrorResponse { code: 409, .. })) => {
            warn!(host = %host_name, "lease write conflict, treating as not acquired");
            Ok(false)
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Releases the claim lease after binding succeeds or fails (spec.md 4.E
/// step 6: "release the lease annotation").
pub async fn release(ctx: &ControllerContext, host_name: &str) -> host_lifecycle::Result<()> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({
        "metadata": { "annotations": { CLAIM_LEASE_ANNOTATION: serde_json::Value::Null } }
    });
    api.patch(
        host_name,
        &kube::api::PatchParams::apply("hostlet-machine-controller"),
        &kube::api::Patch::Merge(patch),
    )
    .await
    .map_err(Error::Kube)?;
    Ok(())
}

async fn clear_stale_machine_ref(ctx: &ControllerContext, host_name: &str) -> host_lifecycle::Result<()> {
    let api: Api<Host> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": { "machine_ref": serde_json::Value::Null } });
    api.patch_status(
        host_name,
        &kube::api::PatchParams::apply("hostlet-machine-controller"),
        &kube::api::Patch::Merge(patch),
    )
    .await
    .map_err(Error::Kube)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn lease_round_trips_through_format_and_parse() {
        let now = Utc::now();
        let raw = format_lease("ctrl-a", "machine-1", now);
        let lease = parse_lease(&raw).unwrap();
        assert_eq!(lease.controller, "ctrl-a");
        assert_eq!(lease.acquired.timestamp(), now.timestamp());
    }

    #[test]
    fn malformed_lease_fails_to_parse() {
        assert!(parse_lease("not-a-lease").is_none());
        assert!(parse_lease("controller=ctrl-a").is_none());
    }
}
