//! Cron Job data model and persistence (§3 Cron Job, §6 persisted layout).
//!
//! Grounded on `gateway-core::paths::GatewayPaths` for the on-disk layout
//! and `cortex-storage`'s JSON-file-per-entity convention; the in-memory
//! cache is updated under the same write-lock critical section as the
//! file write per the concurrency model (§5).

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use gateway_core::{GatewayError, GatewayPaths, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: String,
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub cron_expression: String,
    pub command: String,
    pub channel_id: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_execution_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub execution_count: u64,
    #[serde(default)]
    pub failure_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub timezone: Option<String>,
}

impl CronJob {
    pub fn new(
        user_id: impl Into<String>,
        name: impl Into<String>,
        cron_expression: impl Into<String>,
        command: impl Into<String>,
        channel_id: impl Into<String>,
    ) -> Self {
        let now = gateway_core::now();
        Self {
            id: gateway_core::new_id(),
            user_id: user_id.into(),
            name: name.into(),
            description: None,
            cron_expression: cron_expression.into(),
            command: command.into(),
            channel_id: channel_id.into(),
            enabled: true,
            created_at: now,
            updated_at: now,
            last_executed_at: None,
            next_execution_at: None,
            execution_count: 0,
            failure_count: 0,
            last_error: None,
            timezone: None,
        }
    }
}

/// Abstract key-value persistence the scheduler depends on, so a real
/// implementation can swap file-system storage for another adapter
/// without touching scheduling logic.
#[async_trait::async_trait]
pub trait JobKv: Send + Sync {
    async fn write(&self, id: &str, job: &CronJob) -> Result<()>;
    async fn read(&self, id: &str) -> Result<Option<CronJob>>;
    async fn delete(&self, id: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<CronJob>>;
}

/// File-system-backed adapter storing each job as `cron/jobs/{id}.json`.
pub struct FileJobKv {
    paths: GatewayPaths,
}

impl FileJobKv {
    pub fn new(paths: GatewayPaths) -> Self {
        Self { paths }
    }
}

#[async_trait::async_trait]
impl JobKv for FileJobKv {
    async fn write(&self, id: &str, job: &CronJob) -> Result<()> {
        self.paths.ensure_dirs()?;
        let path = self.paths.cron_job_path(id);
        let json = serde_json::to_string_pretty(job)
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))
    }

    async fn read(&self, id: &str) -> Result<Option<CronJob>> {
        let path = self.paths.cron_job_path(id);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => {
                let job = serde_json::from_str(&contents)
                    .map_err(|e| GatewayError::InternalError(e.to_string()))?;
                Ok(Some(job))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(GatewayError::InternalError(e.to_string())),
        }
    }

    async fn delete(&self, id: &str) -> Result<()> {
        let path = self.paths.cron_job_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(GatewayError::InternalError(e.to_string())),
        }
    }

    async fn list(&self) -> Result<Vec<CronJob>> {
        self.paths.ensure_dirs()?;
        let mut jobs = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.paths.cron_jobs_dir)
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| GatewayError::InternalError(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            let job: CronJob = serde_json::from_str(&contents)
                .map_err(|e| GatewayError::InternalError(e.to_string()))?;
            jobs.push(job);
        }
        Ok(jobs)
    }
}

/// In-memory cache over the KV adapter, kept consistent by updating it
/// inside the same write-lock critical section as every store write.
pub struct CronJobStore<K: JobKv> {
    kv: K,
    cache: RwLock<HashMap<String, CronJob>>,
}

impl<K: JobKv> CronJobStore<K> {
    pub async fn load(kv: K) -> Result<Self> {
        let jobs = kv.list().await?;
        let cache = jobs.into_iter().map(|j| (j.id.clone(), j)).collect();
        Ok(Self {
            kv,
            cache: RwLock::new(cache),
        })
    }

    pub async fn save(&self, job: CronJob) -> Result<()> {
        let mut cache = self.cache.write().await;
        self.kv.write(&job.id, &job).await?;
        cache.insert(job.id.clone(), job);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<CronJob> {
        self.cache.read().await.get(id).cloned()
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        let mut cache = self.cache.write().await;
        self.kv.delete(id).await?;
        cache.remove(id);
        Ok(())
    }

    pub async fn list(&self) -> Vec<CronJob> {
        self.cache.read().await.values().cloned().collect()
    }
}
