//! The agent's local state machine (spec.md 4.F):
//! `WaitForClaim -> InstallComponents -> BootstrapNode -> Running -> Cleanup`,
//! looping back to `WaitForClaim` after a completed cleanup.

pub mod bootstrap_node;
pub mod cleanup;
mod condition;
pub mod install_components;
pub mod running;
pub mod wait_for_claim;

pub use bootstrap_node::BootstrapNode;
pub use cleanup::Cleanup;
pub use install_components::InstallComponents;
pub use running::Running;
pub use wait_for_claim::WaitForClaim;

use host_lifecycle::state::TransitionTo;

impl TransitionTo<InstallComponents> for WaitForClaim {}
impl TransitionTo<Cleanup> for WaitForClaim {}
impl TransitionTo<BootstrapNode> for InstallComponents {}
impl TransitionTo<Cleanup> for InstallComponents {}
impl TransitionTo<Running> for BootstrapNode {}
impl TransitionTo<Cleanup> for BootstrapNode {}
impl TransitionTo<Cleanup> for Running {}
