//! OS-aware storage paths for the gateway, in the spirit of
//! `cortex-storage::paths::CortexPaths`.

use std::path::PathBuf;

use crate::error::{GatewayError, Result};

/// Resolved on-disk locations the gateway reads and writes.
#[derive(Debug, Clone)]
pub struct GatewayPaths {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
    pub cron_jobs_dir: PathBuf,
}

impl GatewayPaths {
    pub fn new() -> Result<Self> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| GatewayError::InternalError("no data directory".to_string()))?
            .join("gatekeeper");
        let config_dir = dirs::config_dir()
            .ok_or_else(|| GatewayError::InternalError("no config directory".to_string()))?
            .join("gatekeeper");
        let cron_jobs_dir = data_dir.join("cron").join("jobs");
        Ok(Self {
            config_dir,
            data_dir,
            cron_jobs_dir,
        })
    }

    /// Build paths rooted at an arbitrary directory (used by tests).
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            config_dir: root.join("config"),
            cron_jobs_dir: root.join("cron").join("jobs"),
            data_dir: root,
        }
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.config_dir)
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        std::fs::create_dir_all(&self.cron_jobs_dir)
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        Ok(())
    }

    pub fn cron_job_path(&self, job_id: &str) -> PathBuf {
        self.cron_jobs_dir.join(format!("{job_id}.json"))
    }
}
