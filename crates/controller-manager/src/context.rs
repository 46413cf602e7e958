//! Shared context threaded through every control loop in this binary.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use kube::Client;

/// `identity` names this controller-manager instance in the claim-lease
/// annotation (spec.md 4.E, §5) so two replicas racing for the same Machine
/// can tell their own in-flight attempt from a competitor's.
///
/// `selection_cursor` is the per-cluster round-robin position used by
/// selection (spec.md 4.E step 4). In-memory only and lost on restart,
/// matching spec.md §5's explicit acceptance of that loss: "selection
/// fairness is best-effort, not a correctness property." Mirrors the
/// `Arc<RwLock<..>>` shared-state idiom the wider pack uses for
/// controller-shared state.
#[derive(Clone)]
pub struct ControllerContext {
    pub client: Client,
    pub identity: String,
    pub selection_cursor: Arc<Mutex<HashMap<String, usize>>>,
}

impl ControllerContext {
    pub fn new(client: Client, identity: String) -> Self {
        Self {
            client,
            identity,
            selection_cursor: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}
