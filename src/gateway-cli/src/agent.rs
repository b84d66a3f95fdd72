//! Stand-in `AgentInvoker` for the `agent:`-prefixed cron command shape.
//!
//! Agent command dispatch is explicitly out of scope here (§1 Non-goals:
//! the host runtime owns the agent surface). This refuses every call so a
//! misconfigured `agent:` job fails loudly instead of silently no-oping.

use gateway_cron::AgentInvoker;

pub struct UnimplementedAgent;

#[async_trait::async_trait]
impl AgentInvoker for UnimplementedAgent {
    async fn invoke(&self, command: &str) -> std::result::Result<String, String> {
        Err(format!(
            "agent command dispatch is not wired into this deployment: {command}"
        ))
    }
}
