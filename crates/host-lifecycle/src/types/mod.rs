//! CRD wire types (spec.md §3).

pub mod bootstrap_credential;
pub mod host;
pub mod machine;

pub use bootstrap_credential::{
    BootstrapCredential, BootstrapCredentialSpec, BootstrapCredentialStatus,
};
pub use host::{
    CleanupState, DownloadMode, Host, HostCondition, HostConditionType, HostSpec, HostStatus,
    JoinMode, MachineRef, NetworkInterface, NetworkStatus,
};
pub use machine::{CapacityRequirements, Machine, MachineSpec, MachineStatus, Satisfies};
