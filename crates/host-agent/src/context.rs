//! Shared context threaded through the agent's state machine (spec.md 4.F).

use kube::Client;

use crate::config::Config;

#[derive(Clone)]
pub struct AgentContext {
    pub client: Client,
    pub config: Config,
}

impl AgentContext {
    pub fn new(client: Client, config: Config) -> Self {
        Self { client, config }
    }
}
