//! Process-start configuration, loaded from `gateway.toml` with built-in
//! defaults — the same override-over-defaults pattern used by
//! `cortex-hooks::config::HookConfig`.

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxSettings {
    /// Minutes of inactivity before a sandbox is hibernated.
    pub idle_timeout_minutes: u64,
    /// Seconds allotted to a single command execution.
    pub exec_timeout_secs: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 50,
            exec_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimiterSettings {
    pub window_ms: u64,
    pub max_requests: u32,
    pub per_channel: bool,
}

impl Default for RateLimiterSettings {
    fn default() -> Self {
        Self {
            window_ms: 60_000,
            max_requests: 30,
            per_channel: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronSettings {
    pub max_concurrent: usize,
    pub execution_timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            execution_timeout_secs: 300,
            max_retries: 3,
            retry_backoff_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMode {
    Warn,
    Redact,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsSettings {
    pub mode: DetectionMode,
    pub enable_line_numbers: bool,
    pub max_secrets_per_type: usize,
}

impl Default for SecretsSettings {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Redact,
            enable_line_numbers: true,
            max_secrets_per_type: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub rate_limiter: RateLimiterSettings,
    #[serde(default)]
    pub cron: CronSettings,
    #[serde(default)]
    pub secrets: SecretsSettings,
    /// Seconds before a pending approval request expires.
    #[serde(default = "default_approval_timeout_secs")]
    pub approval_timeout_secs: u64,
}

fn default_approval_timeout_secs() -> u64 {
    300
}

/// Hand-written rather than `#[derive(Default)]`: a derived impl would give
/// `approval_timeout_secs` the `u64` zero value instead of the same 300s
/// the serde `#[serde(default = ...)]` path uses for a missing TOML key, so
/// the in-code and deserialized defaults would silently diverge.
impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxSettings::default(),
            rate_limiter: RateLimiterSettings::default(),
            cron: CronSettings::default(),
            secrets: SecretsSettings::default(),
            approval_timeout_secs: default_approval_timeout_secs(),
        }
    }
}

impl GatewayConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| GatewayError::InvalidParams(e.to_string()))
    }

    pub fn load_or_default(path: &std::path::Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(GatewayError::InternalError(e.to_string())),
        }
    }
}
