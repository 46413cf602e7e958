//! Wrappers around the Kubernetes `Node` API used by the Machine Controller
//! to propagate `providerID` once a Host finishes bootstrapping (spec.md
//! 4.E step 6).

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::error::ErrorResponse;
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::error::{Error, Result};
use crate::retry;

const FIELD_MANAGER: &str = "hostlet-machine-controller";

/// Fetches the `Node` matching `node_name`, returning `Ok(None)` rather
/// than an error when it doesn't exist yet — the kubelet on a freshly
/// bootstrapped Host can take a few seconds to register (spec.md 4.E edge
/// cases).
#[instrument(level = "debug", skip(client))]
pub async fn get(client: &kube::Client, node_name: &str) -> Result<Option<Node>> {
    let api: Api<Node> = Api::all(client.clone());
    match api.get(node_name).await {
        Ok(node) => Ok(Some(node)),
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(None),
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Patches `providerID` on `node_name`, retrying transient API errors up to
/// four times with the shared backoff schedule (spec.md 4.E step 6:
/// "retries on conflict/transient errors; does not retry on validation
/// errors").
#[instrument(level = "info", skip(client))]
pub async fn set_provider_id(client: &kube::Client, node_name: &str, provider_id: &str) -> Result<()> {
    let api: Api<Node> = Api::all(client.clone());
    let patch = Patch::Merge(json!({
        "spec": { "providerID": provider_id }
    }));
    let params = PatchParams::apply(FIELD_MANAGER);

    let result = retry!(
        api.patch(node_name, &params, &patch).await,
        times: 4,
        log_error: |e| warn!(node_name, error = %e, "providerID patch attempt failed"),
        break_on: kube::Error::Api(ErrorResponse { code: 422, .. })
    );

    match result {
        Ok(_) => {
            debug!(node_name, provider_id, "providerID set");
            Ok(())
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

/// Deletes the `Node` matching `node_name`. A 404 counts as success, both
/// here and at every call site (spec.md 4.D/4.F: "delete the Node object
/// directly"/"delete the Node object via the API server (best-effort; 404
/// is success)").
#[instrument(level = "info", skip(client))]
pub async fn delete(client: &kube::Client, node_name: &str) -> Result<()> {
    let api: Api<Node> = Api::all(client.clone());
    match api.delete(node_name, &DeleteParams::default()).await {
        Ok(_) => {
            debug!(node_name, "node deleted");
            Ok(())
        }
        Err(kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(()),
        Err(e) => Err(Error::Kube(e)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn field_manager_is_stable() {
        // Guards against an accidental rename that would make the controller
        // stop owning its own field-manager entries on upgrade.
        assert_eq!(FIELD_MANAGER, "hostlet-machine-controller");
    }
}
