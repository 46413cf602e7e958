//! The `Host` custom resource (spec.md §3).
//!
//! Modeled with `kube::CustomResource` the way any `kube`-based controller
//! in this ecosystem declares a CRD: a `#[derive(CustomResource)]` spec
//! struct, a separate status struct, and `schemars::JsonSchema` so the CRD
//! manifest can be generated from the type.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Taint;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// The join protocol a Host will use to become a cluster node (spec.md
/// GLOSSARY: "Join mode").
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum JoinMode {
    /// Cloud-init style bootstrap secret + `kubeadm join`.
    Kubeadm,
    /// Direct kubelet bootstrap-kubeconfig + server-side CSR approval.
    TlsBootstrap,
}

impl Default for JoinMode {
    fn default() -> Self {
        JoinMode::Kubeadm
    }
}

/// Whether component installation may reach the network.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DownloadMode {
    Online,
    Offline,
}

impl Default for DownloadMode {
    fn default() -> Self {
        DownloadMode::Online
    }
}

/// Advertised capacity of a Host (spec.md §3). Quantities are stored as
/// Kubernetes `Quantity` strings and parsed on demand via
/// [`crate::resources::quantity`].
#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq, Eq, JsonSchema)]
pub struct HostCapacity {
    pub cpu: String,
    pub memory: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_disk: Option<String>,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu_type: Option<String>,
    #[serde(default)]
    pub max_pods: u32,
}

/// `Host.spec` (spec.md §3).
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "hostlet.io",
    version = "v1alpha1",
    kind = "Host",
    plural = "hosts",
    status = "HostStatus",
    derive = "Default"
)]
pub struct HostSpec {
    /// Advertised capacity, pre-filled by the agent at registration time.
    #[serde(default)]
    pub capacity: HostCapacity,

    pub join_mode: JoinMode,

    #[serde(default)]
    pub download_mode: DownloadMode,

    /// Target Kubernetes version, copied onto the Host during claim
    /// binding (spec.md 4.E step 5).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kubernetes_version: Option<String>,

    /// Name of the secret holding the install/bootstrap payload (spec.md
    /// §6 "kubeadm" and "TLS-bootstrap" secret formats).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bootstrap_secret_ref: Option<String>,

    /// Idempotent uninstall script, run during cleanup (spec.md 4.F).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uninstall_script: Option<String>,

    /// Whether the agent should also install/manage kube-proxy.
    #[serde(default)]
    pub manage_kube_proxy: bool,

    /// Priority used to break ties during selection (spec.md 4.E step 3).
    /// Higher wins; default 0.
    #[serde(default)]
    pub priority: i32,

    /// Labels applied to the resulting Kubernetes `Node` object (distinct
    /// from this CRD's own `metadata.labels`, which the Machine Controller
    /// uses for *selecting* a Host).
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Taints applied to the resulting Kubernetes `Node` object.
    #[serde(default)]
    pub taints: Vec<Taint>,
}

/// Back-reference from a claimed Host to its owning Machine (spec.md §3).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct MachineRef {
    pub api_version: String,
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

/// One network interface discovered by the agent's capacity/network probe
/// (spec.md 4.A step 2).
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct NetworkInterface {
    pub name: String,
    pub mac_address: String,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
    /// True for the interface carrying the default gateway.
    #[serde(default)]
    pub is_default: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct NetworkStatus {
    pub interfaces: Vec<NetworkInterface>,
}

/// OS/architecture info reported by the agent.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq, JsonSchema)]
pub struct HostDetails {
    pub os: String,
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_release: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum HostConditionType {
    ComponentsInstalled,
    NodeBootstrapped,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, JsonSchema)]
pub struct HostCondition {
    #[serde(rename = "type")]
    pub type_: HostConditionType,
    pub status: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_transition_time: chrono::DateTime<chrono::Utc>,
}

/// Where a Host sits with respect to the cleanup state machine (spec.md
/// 4.D). Not itself a wire field — derived from the annotations in
/// [`crate::annotations`] plus `Status.MachineRef`; kept here as the
/// shared vocabulary both controllers reason about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupState {
    /// No cleanup annotation: either free or bound and happily running.
    Idle,
    /// Cleanup annotation present, agent has not yet cleared `MachineRef`,
    /// timeout has not elapsed.
    CleanupRequested,
    /// Agent cleared `MachineRef` on its own.
    Released,
    /// The Host Controller force-reclaimed the host after the timeout.
    ForceReleased,
}

/// `Host.status` (spec.md §3).
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct HostStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_ref: Option<MachineRef>,

    #[serde(default)]
    pub network: NetworkStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_details: Option<HostDetails>,

    #[serde(default)]
    pub conditions: Vec<HostCondition>,

    /// Mirrors whether `CLEANUP_STARTED_ANNOTATION` has been observed;
    /// kept on status too so the agent (which only watches its own
    /// object, not the annotation-writer's intent) has a stable field to
    /// read.
    #[serde(default)]
    pub cleanup_started: bool,

    #[serde(default)]
    pub cleanup_completed: bool,
}

impl HostStatus {
    pub fn condition(&self, type_: HostConditionType) -> Option<&HostCondition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }

    pub fn is_true(&self, type_: HostConditionType) -> bool {
        self.condition(type_).map(|c| c.status).unwrap_or(false)
    }

    /// spec.md §3 invariant: `NodeBootstrapped=True` implies
    /// `ComponentsInstalled=True`.
    pub fn upholds_condition_invariant(&self) -> bool {
        !self.is_true(HostConditionType::NodeBootstrapped)
            || self.is_true(HostConditionType::ComponentsInstalled)
    }

    /// spec.md §3: "A host is available iff MachineRef == nil and no
    /// cleanup annotation is present." The annotation check is the
    /// caller's responsibility (it lives on `ObjectMeta`, not `Status`);
    /// this only covers the `MachineRef` half.
    pub fn is_unclaimed(&self) -> bool {
        self.machine_ref.is_none()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use chrono::Utc;

    #[test]
    fn node_bootstrapped_implies_components_installed() {
        let mut status = HostStatus::default();
        status.conditions.push(HostCondition {
            type_: HostConditionType::NodeBootstrapped,
            status: true,
            reason: None,
            message: None,
            last_transition_time: Utc::now(),
        });
        assert!(!status.upholds_condition_invariant());

        status.conditions.push(HostCondition {
            type_: HostConditionType::ComponentsInstalled,
            status: true,
            reason: None,
            message: None,
            last_transition_time: Utc::now(),
        });
        assert!(status.upholds_condition_invariant());
    }

    #[test]
    fn unclaimed_host_has_no_machine_ref() {
        assert!(HostStatus::default().is_unclaimed());
    }
}
