//! Execution dispatch (§4.K "Execution dispatches on the command shape").

use std::time::Duration;

use gateway_core::{GatewayError, Result};
use once_cell::sync::Lazy;
use regex::Regex;

/// Abstract agent command invocation, kept out of this crate's scope (the
/// host runtime owns the agent dispatch surface, per §1 Non-goals).
#[async_trait::async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(&self, command: &str) -> std::result::Result<String, String>;
}

/// Shell commands permitted for the whitelisted fallback branch.
static WHITELISTED_SHELL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(echo\b.*|date\s*|pwd\s*|whoami\s*)$").unwrap());

const HTTP_BODY_TRUNCATE_BYTES: usize = 1_000;

pub async fn dispatch(
    command: &str,
    agent_invoker: &dyn AgentInvoker,
    http_client: &reqwest::Client,
) -> Result<String> {
    if let Some(stripped) = command.strip_prefix("agent:") {
        return agent_invoker
            .invoke(stripped.trim())
            .await
            .map_err(GatewayError::InternalError);
    }

    if command.starts_with("http://") || command.starts_with("https://") {
        let response = http_client
            .get(command)
            .send()
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        let body = response
            .text()
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        return Ok(truncate_bytes(&body, HTTP_BODY_TRUNCATE_BYTES));
    }

    if WHITELISTED_SHELL.is_match(command) {
        return run_whitelisted_shell(command).await;
    }

    Err(GatewayError::InvalidParams("Command not allowed".to_string()))
}

async fn run_whitelisted_shell(command: &str) -> Result<String> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .await
        .map_err(|e| GatewayError::InternalError(e.to_string()))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        return Err(GatewayError::InternalError(format!(
            "command exited with {}: {stderr}",
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn truncate_bytes(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Overall per-execution timeout wrapper (§5 "Cron execution wrapped in
/// `execution_timeout`; a timeout is treated as a failure for retries").
pub async fn dispatch_with_timeout(
    command: &str,
    agent_invoker: &dyn AgentInvoker,
    http_client: &reqwest::Client,
    timeout: Duration,
) -> Result<String> {
    match tokio::time::timeout(timeout, dispatch(command, agent_invoker, http_client)).await {
        Ok(result) => result,
        Err(_) => Err(GatewayError::InternalError("execution timed out".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoopAgent;

    #[async_trait::async_trait]
    impl AgentInvoker for NoopAgent {
        async fn invoke(&self, command: &str) -> std::result::Result<String, String> {
            Ok(format!("agent ran: {command}"))
        }
    }

    #[tokio::test]
    async fn whitelisted_echo_succeeds() {
        let client = reqwest::Client::new();
        let out = dispatch("echo hello", &NoopAgent, &client).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn disallowed_command_rejected() {
        let client = reqwest::Client::new();
        let err = dispatch("rm -rf /", &NoopAgent, &client).await.unwrap_err();
        assert!(matches!(err, GatewayError::InvalidParams(ref m) if m == "Command not allowed"));
    }

    #[tokio::test]
    async fn agent_prefix_dispatches_to_invoker() {
        let client = reqwest::Client::new();
        let out = dispatch("agent: summarize logs", &NoopAgent, &client).await.unwrap();
        assert_eq!(out, "agent ran: summarize logs");
    }

    #[test]
    fn truncates_long_body() {
        let long = "a".repeat(2_000);
        assert_eq!(truncate_bytes(&long, 1_000).len(), 1_000);
    }
}
