//! Annotation and label keys shared by the agent and the controller-manager.
//!
//! These are the wire vocabulary of spec.md §6: presence/absence of these
//! keys on a `Host` object, not a typed field, is how the two control loops
//! signal each other across the object store's watch stream.

/// Provider scheme used in `Node.spec.providerID` and in label/annotation
/// namespacing below. Kept short per spec.md §6 ("four to eight lowercase
/// letters").
pub const PROVIDER_SCHEME: &str = "hostlet";

const fn ann(suffix: &'static str) -> &'static str {
    suffix
}

/// Set by the Machine Controller on a Host when it begins the deletion
/// flow (spec.md 4.D, 4.E). Presence alone is the cleanup signal; value is
/// unspecified.
pub const CLEANUP_ANNOTATION: &str = "hostlet.io/cleanup";

/// RFC 3339 timestamp of when `CLEANUP_ANNOTATION` was first observed.
/// Used to compute whether the per-host timeout (spec.md 4.D) has elapsed.
pub const CLEANUP_STARTED_ANNOTATION: &str = "hostlet.io/cleanup-started-at";

/// Written by the Host Controller when it force-releases a Host whose
/// agent did not complete cleanup in time. Value format:
/// `timestamp=...,reason=agent_unavailable,timeout=...,elapsed=...`.
pub const FORCE_CLEANUP_AUDIT_ANNOTATION: &str = "hostlet.io/force-cleanup-audit";

/// Claim-arbitration lease (spec.md 4.E, §5). Value is
/// `controller=<identity>,machine=<name>,acquired=<rfc3339>`.
pub const CLAIM_LEASE_ANNOTATION: &str = "hostlet.io/claim-lease";

/// TTL of [`CLAIM_LEASE_ANNOTATION`].
pub const CLAIM_LEASE_TTL_SECS: i64 = 30;

/// Environment variable overriding the computed per-host cleanup timeout
/// (spec.md §6). Must parse as a duration string (`"5m"`, `"300s"`) and lie
/// within `[2m, 15m]` to take effect.
pub const CLEANUP_TIMEOUT_ENV: &str = "HOST_CLEANUP_TIMEOUT";

/// Label carrying the cluster a Host is currently attached to. Cleared on
/// release.
pub const CLUSTER_NAME_LABEL: &str = "hostlet.io/cluster-name";

/// Label carrying the name of the Machine a Host is attached to. Cleared
/// on release.
pub const ATTACHED_MACHINE_LABEL: &str = "hostlet.io/attached-machine";

/// Annotation recording the control-plane endpoint host the agent should
/// bootstrap against.
pub const CONTROL_PLANE_ENDPOINT_ANNOTATION: &str = "hostlet.io/control-plane-endpoint";

/// Annotation recording the target Kubernetes version for this binding.
pub const KUBERNETES_VERSION_ANNOTATION: &str = "hostlet.io/kubernetes-version";

/// Annotation recording the bundle/container-image registry to pull
/// component artifacts from.
pub const BUNDLE_REGISTRY_ANNOTATION: &str = "hostlet.io/bundle-registry";

/// Set on a Host whose owning Cluster is paused (spec.md 4.E edge cases).
pub const PAUSED_ANNOTATION: &str = "hostlet.io/paused";

/// Read on the Machine, mirroring the well-known Cluster API convention for
/// marking an object's owning Cluster paused (spec.md 4.E edge case "A
/// Machine whose owning cluster is paused"). This system doesn't model the
/// Cluster object itself (spec.md Non-goals), so it reads the annotation
/// directly off the Machine rather than walking an owner-reference chain.
pub const CLUSTER_PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

/// Read on the Machine. Set by an external health checker to flag a
/// Machine as unhealthy and due for remediation (spec.md 4.E edge case
/// "Machine flagged for remediation").
pub const REMEDIATION_ANNOTATION: &str = "cluster.x-k8s.io/remediate-machine";

/// Autoscaler "scale from zero" label annotation, read by the kubeadm
/// cloud-init interceptor (spec.md 4.F, the `applyScaleFromZeroAnnotations`
/// Open Question, resolved in SPEC_FULL.md §7 to wire it in).
pub const AUTOSCALER_LABELS_ANNOTATION: &str =
    "capacity.cluster-autoscaler.kubernetes.io/labels";

/// Autoscaler "scale from zero" taints annotation, companion to
/// [`AUTOSCALER_LABELS_ANNOTATION`].
pub const AUTOSCALER_TAINTS_ANNOTATION: &str =
    "capacity.cluster-autoscaler.kubernetes.io/taints";

/// Parses [`AUTOSCALER_LABELS_ANNOTATION`]'s value: the well-known
/// cluster-autoscaler convention of a comma-separated `key=value` list.
pub fn parse_autoscaler_labels(raw: &str) -> std::collections::BTreeMap<String, String> {
    raw.split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Parses [`AUTOSCALER_TAINTS_ANNOTATION`]'s value: comma-separated
/// `key=value:Effect` entries, the same convention cluster-autoscaler uses
/// for its own scale-from-zero node templates.
pub fn parse_autoscaler_taints(raw: &str) -> Vec<k8s_openapi::api::core::v1::Taint> {
    raw.split(',')
        .filter_map(|entry| {
            let (key, rest) = entry.split_once('=')?;
            let (value, effect) = rest.split_once(':')?;
            if key.trim().is_empty() {
                return None;
            }
            Some(k8s_openapi::api::core::v1::Taint {
                key: key.trim().to_string(),
                value: Some(value.trim().to_string()),
                effect: effect.trim().to_string(),
                time_added: None,
            })
        })
        .collect()
}

/// Namespace bootstrap token secrets are materialized in, matching the
/// well-known kubeadm bootstrap-token convention.
pub const BOOTSTRAP_TOKEN_NAMESPACE: &str = "kube-system";

/// Secret type recognized by the API server as a bootstrap-group
/// principal.
pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";

/// Finalizer held by a Machine while its Host claim is being released.
pub const MACHINE_FINALIZER: &str = ann("hostlet.io/machine");

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn provider_scheme_matches_spec_constraint() {
        assert!(PROVIDER_SCHEME.len() >= 4 && PROVIDER_SCHEME.len() <= 8);
        assert!(PROVIDER_SCHEME.chars().all(|c| c.is_ascii_lowercase()));
    }

    #[test]
    fn parses_autoscaler_labels() {
        let labels = parse_autoscaler_labels("zone=us-east-1a,pool=gpu");
        assert_eq!(labels.get("zone").map(String::as_str), Some("us-east-1a"));
        assert_eq!(labels.get("pool").map(String::as_str), Some("gpu"));
    }

    #[test]
    fn parses_autoscaler_taints() {
        let taints = parse_autoscaler_taints("dedicated=gpu:NoSchedule");
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, "dedicated");
        assert_eq!(taints[0].value.as_deref(), Some("gpu"));
        assert_eq!(taints[0].effect, "NoSchedule");
    }

    #[test]
    fn ignores_malformed_entries() {
        assert!(parse_autoscaler_labels("").is_empty());
        assert!(parse_autoscaler_taints("not-a-taint").is_empty());
    }
}
