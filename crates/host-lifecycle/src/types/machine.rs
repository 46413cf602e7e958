//! The logical `Machine` object (spec.md §3).
//!
//! Owned by the cluster-lifecycle manager, not by this system (spec.md
//! §1 Out of scope). We model only the fields we actually read or write,
//! per spec.md's Non-goal "we do not specify the full set of typed
//! resource schemas". The `CustomResource` derive still gives us a typed
//! `Api<Machine>` to talk to whatever CRD the cluster manager actually
//! installs, as long as the group/version/kind match at the call site.

use k8s_openapi::api::core::v1::NodeAddress;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::types::host::{DownloadMode, HostCapacity, JoinMode};

/// Capacity floor a Machine requires of a candidate Host (spec.md 4.E
/// step 2, boundary case in spec.md §8: "nil CapacityRequirements accepts
/// any host").
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct CapacityRequirements {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_gpu_count: Option<u32>,
}

/// Trait implemented for anything we can ask "does this Host satisfy me".
/// Generalizes the boundary case in spec.md §8 into a single `impl` arm
/// instead of an `if requirements.is_some() { ... } else { true }` branch
/// scattered across the selection path.
pub trait Satisfies<Capacity> {
    fn satisfies(&self, capacity: &Capacity) -> bool;
}

impl Satisfies<HostCapacity> for Option<CapacityRequirements> {
    fn satisfies(&self, capacity: &HostCapacity) -> bool {
        let Some(reqs) = self else {
            return true;
        };
        reqs.satisfies(capacity)
    }
}

impl Satisfies<HostCapacity> for CapacityRequirements {
    fn satisfies(&self, capacity: &HostCapacity) -> bool {
        use crate::resources::quantity::parse_quantity;

        if let Some(min_cpu) = &self.min_cpu {
            match (parse_quantity(min_cpu), parse_quantity(&capacity.cpu)) {
                (Ok(min), Ok(have)) if have < min => return false,
                (Ok(_), Err(_)) => return false,
                _ => {}
            }
        }
        if let Some(min_memory) = &self.min_memory {
            match (
                parse_quantity(min_memory),
                parse_quantity(&capacity.memory),
            ) {
                (Ok(min), Ok(have)) if have < min => return false,
                (Ok(_), Err(_)) => return false,
                _ => {}
            }
        }
        if let Some(min_gpu) = self.min_gpu_count {
            if capacity.gpu_count < min_gpu {
                return false;
            }
        }
        true
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ref: Option<String>,
    #[serde(default)]
    pub addresses: Vec<NodeAddress>,
    #[serde(default)]
    pub ready: bool,
    /// Mirrors [`crate::annotations::CLUSTER_PAUSED_ANNOTATION`] (spec.md
    /// 4.E edge case): set once and the Machine Controller does nothing
    /// else that reconcile.
    #[serde(default)]
    pub paused: bool,
}

/// `Machine.spec`, the subset of the cluster manager's schema this system
/// reads (spec.md §3).
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    plural = "machines",
    namespaced,
    status = "MachineStatus",
    derive = "Default"
)]
pub struct MachineSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_requirements: Option<CapacityRequirements>,
    /// Copied onto the bound Host's spec at bind time (spec.md 4.E step 5:
    /// "Copy join-mode, download-mode, Kubernetes version, manage-kube-proxy
    /// fields"). `None` leaves the Host's existing value untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_mode: Option<JoinMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_mode: Option<DownloadMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manage_kube_proxy: Option<bool>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn nil_requirements_accept_any_host() {
        let none: Option<CapacityRequirements> = None;
        assert!(none.satisfies(&HostCapacity::default()));
    }

    #[test]
    fn zero_capacity_satisfies_no_requirement() {
        let reqs = CapacityRequirements {
            min_cpu: Some("1".to_string()),
            ..Default::default()
        };
        let zero = HostCapacity {
            cpu: "0".to_string(),
            ..Default::default()
        };
        assert!(!reqs.satisfies(&zero));
    }
}
