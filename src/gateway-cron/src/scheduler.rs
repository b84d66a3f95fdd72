//! Cron Scheduler (§4.K): persistent schedule executor with retries and a
//! concurrency cap, sharing the idle/timer idioms used by
//! `gateway-sandbox` but with real cancellable `JoinHandle`s (cron jobs
//! are long-lived named entities, unlike the ephemeral per-touch idle
//! timers there).

use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::{GatewayError, Result};

use crate::dispatch::{dispatch_with_timeout, AgentInvoker};
use crate::job::{CronJob, CronJobStore, JobKv};

#[derive(Debug, Clone, Copy)]
pub struct CronSettings {
    pub max_concurrent: usize,
    pub execution_timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for CronSettings {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            execution_timeout: Duration::from_secs(300),
            max_retries: 3,
            retry_backoff_ms: 1_000,
        }
    }
}

struct ScheduledTask {
    handle: tokio::task::JoinHandle<()>,
    next_execution: DateTime<Utc>,
}

pub struct CronScheduler<K: JobKv, A: AgentInvoker> {
    store: Arc<CronJobStore<K>>,
    agent_invoker: Arc<A>,
    http_client: reqwest::Client,
    settings: CronSettings,
    scheduled: DashMap<String, ScheduledTask>,
    active_executions: AtomicUsize,
}

/// Compute the next execution after `after`, in the job's timezone
/// (default UTC). Returns the source error's message on parse failure.
pub fn compute_next(
    cron_expression: &str,
    timezone: Option<&str>,
    after: DateTime<Utc>,
) -> std::result::Result<DateTime<Utc>, String> {
    let schedule = cron::Schedule::from_str(cron_expression).map_err(|e| e.to_string())?;
    let tz_name = timezone.unwrap_or("UTC");
    let tz: chrono_tz::Tz = tz_name.parse().map_err(|_| format!("unknown timezone: {tz_name}"))?;
    let after_in_tz = after.with_timezone(&tz);
    let next = schedule
        .after(&after_in_tz)
        .next()
        .ok_or_else(|| "cron expression has no upcoming execution".to_string())?;
    Ok(next.with_timezone(&Utc))
}

impl<K: JobKv + 'static, A: AgentInvoker + 'static> CronScheduler<K, A> {
    pub fn new(store: Arc<CronJobStore<K>>, agent_invoker: Arc<A>, settings: CronSettings) -> Self {
        Self {
            store,
            agent_invoker,
            http_client: reqwest::Client::new(),
            settings,
            scheduled: DashMap::new(),
            active_executions: AtomicUsize::new(0),
        }
    }

    /// Schedule (or re-schedule) a job by id. A disabled job is a no-op.
    pub async fn schedule(self: &Arc<Self>, job_id: &str) -> Result<()> {
        let Some(job) = self.store.get(job_id).await else {
            return Err(GatewayError::NotFound(format!("cron job {job_id}")));
        };
        if !job.enabled {
            return Ok(());
        }
        if self.scheduled.contains_key(job_id) {
            self.unschedule(job_id);
        }

        let now = gateway_core::now();
        match compute_next(&job.cron_expression, job.timezone.as_deref(), now) {
            Ok(next) => {
                let mut job = job;
                job.next_execution_at = Some(next);
                job.updated_at = now;
                self.store.save(job).await?;
                self.arm(job_id, next);
                Ok(())
            }
            Err(parse_error) => {
                let mut job = job;
                job.last_error = Some(format!("invalid cron expression: {parse_error}"));
                job.updated_at = now;
                self.store.save(job).await?;
                Ok(())
            }
        }
    }

    fn arm(self: &Arc<Self>, job_id: &str, next: DateTime<Utc>) {
        let now = gateway_core::now();
        let delay_ms = (next - now).num_milliseconds().max(0) as u64;
        self.arm_after(job_id, next, Duration::from_millis(delay_ms));
    }

    fn arm_after(self: &Arc<Self>, job_id: &str, next: DateTime<Utc>, delay: Duration) {
        let scheduler = Arc::clone(self);
        let id = job_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.fire(&id).await;
        });
        self.scheduled.insert(
            job_id.to_string(),
            ScheduledTask {
                handle,
                next_execution: next,
            },
        );
    }

    async fn fire(self: &Arc<Self>, job_id: &str) {
        if self.active_executions.load(Ordering::SeqCst) >= self.settings.max_concurrent {
            tracing::warn!(job_id, "max_concurrent_executions reached; requeuing immediately");
            self.arm(job_id, gateway_core::now());
            return;
        }

        self.active_executions.fetch_add(1, Ordering::SeqCst);
        let Some(mut job) = self.store.get(job_id).await else {
            self.active_executions.fetch_sub(1, Ordering::SeqCst);
            return;
        };

        let result = dispatch_with_timeout(
            &job.command,
            self.agent_invoker.as_ref(),
            &self.http_client,
            self.settings.execution_timeout,
        )
        .await;

        let now = gateway_core::now();
        match result {
            Ok(_output) => {
                // Advance past the tick that was just serviced, not merely "now",
                // so a late-firing timer cannot re-fire the same tick.
                let reschedule_from = job.next_execution_at.unwrap_or(now);
                job.last_executed_at = Some(now);
                job.last_error = None;
                job.execution_count += 1;
                job.updated_at = now;

                match compute_next(&job.cron_expression, job.timezone.as_deref(), reschedule_from) {
                    Ok(next) => {
                        job.next_execution_at = Some(next);
                        if let Err(e) = self.store.save(job).await {
                            tracing::error!(job_id, error = %e, "failed to persist cron job after success");
                        }
                        self.arm(job_id, next);
                    }
                    Err(e) => {
                        tracing::error!(job_id, error = %e, "failed to compute next execution");
                        if let Err(e) = self.store.save(job).await {
                            tracing::error!(job_id, error = %e, "failed to persist cron job after success");
                        }
                    }
                }
            }
            Err(e) => {
                job.failure_count += 1;
                job.last_error = Some(e.to_string());
                job.updated_at = now;

                if job.failure_count <= self.settings.max_retries {
                    let backoff = Duration::from_millis(
                        self.settings.retry_backoff_ms * job.failure_count as u64,
                    );
                    let next = now + chrono::Duration::from_std(backoff).unwrap_or_default();
                    job.next_execution_at = Some(next);
                    if let Err(save_err) = self.store.save(job).await {
                        tracing::error!(job_id, error = %save_err, "failed to persist cron job after failure");
                    }
                    self.arm_after(job_id, next, backoff);
                } else {
                    match compute_next(&job.cron_expression, job.timezone.as_deref(), now) {
                        Ok(next) => {
                            job.next_execution_at = Some(next);
                            if let Err(save_err) = self.store.save(job).await {
                                tracing::error!(job_id, error = %save_err, "failed to persist cron job after failure");
                            }
                            self.arm(job_id, next);
                        }
                        Err(e) => {
                            tracing::error!(job_id, error = %e, "failed to compute next execution after retries exhausted");
                            if let Err(save_err) = self.store.save(job).await {
                                tracing::error!(job_id, error = %save_err, "failed to persist cron job after failure");
                            }
                        }
                    }
                }
            }
        }

        self.active_executions.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn unschedule(&self, job_id: &str) {
        if let Some((_, task)) = self.scheduled.remove(job_id) {
            task.handle.abort();
        }
    }

    pub fn unschedule_all(&self) {
        let ids: Vec<String> = self.scheduled.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.unschedule(&id);
        }
    }

    pub fn next_execution(&self, job_id: &str) -> Option<DateTime<Utc>> {
        self.scheduled.get(job_id).map(|t| t.next_execution)
    }

    pub fn active_executions(&self) -> usize {
        self.active_executions.load(Ordering::SeqCst)
    }

    pub async fn jobs(&self) -> Vec<CronJob> {
        self.store.list().await
    }

    /// The underlying job store, for CRUD surfaces that manage jobs
    /// without touching the scheduling timers directly.
    pub fn store(&self) -> &Arc<CronJobStore<K>> {
        &self.store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::FileJobKv;
    use chrono::TimeZone;

    struct NoopAgent;

    #[async_trait::async_trait]
    impl AgentInvoker for NoopAgent {
        async fn invoke(&self, command: &str) -> std::result::Result<String, String> {
            Ok(command.to_string())
        }
    }

    #[test]
    fn compute_next_advances_past_after() {
        let after = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let next = compute_next("0 0 * * * *", None, after).unwrap();
        assert!(next > after);
    }

    #[test]
    fn compute_next_rejects_malformed_expression() {
        let after = Utc::now();
        let result = compute_next("not a cron expr", None, after);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn schedule_disabled_job_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let paths = gateway_core::GatewayPaths::with_root(dir.path());
        let kv = FileJobKv::new(paths);
        let store = Arc::new(CronJobStore::load(kv).await.unwrap());

        let mut job = CronJob::new("u1", "test", "0 0 * * * *", "echo hi", "c1");
        job.enabled = false;
        store.save(job.clone()).await.unwrap();

        let scheduler = Arc::new(CronScheduler::new(
            store,
            Arc::new(NoopAgent),
            CronSettings::default(),
        ));
        scheduler.schedule(&job.id).await.unwrap();
        assert!(scheduler.next_execution(&job.id).is_none());
    }

    #[tokio::test]
    async fn invalid_cron_expression_persists_last_error() {
        let dir = tempfile::tempdir().unwrap();
        let paths = gateway_core::GatewayPaths::with_root(dir.path());
        let kv = FileJobKv::new(paths);
        let store = Arc::new(CronJobStore::load(kv).await.unwrap());

        let job = CronJob::new("u1", "test", "garbage", "echo hi", "c1");
        store.save(job.clone()).await.unwrap();

        let scheduler = Arc::new(CronScheduler::new(
            store.clone(),
            Arc::new(NoopAgent),
            CronSettings::default(),
        ));
        scheduler.schedule(&job.id).await.unwrap();

        let persisted = store.get(&job.id).await.unwrap();
        assert!(persisted.last_error.is_some());
    }

    #[tokio::test]
    async fn unschedule_cancels_timer() {
        let dir = tempfile::tempdir().unwrap();
        let paths = gateway_core::GatewayPaths::with_root(dir.path());
        let kv = FileJobKv::new(paths);
        let store = Arc::new(CronJobStore::load(kv).await.unwrap());

        let job = CronJob::new("u1", "test", "0 0 * * * *", "echo hi", "c1");
        store.save(job.clone()).await.unwrap();

        let scheduler = Arc::new(CronScheduler::new(
            store,
            Arc::new(NoopAgent),
            CronSettings::default(),
        ));
        scheduler.schedule(&job.id).await.unwrap();
        assert!(scheduler.next_execution(&job.id).is_some());
        scheduler.unschedule(&job.id);
        assert!(scheduler.next_execution(&job.id).is_none());
    }
}
