//! Application state shared across RPC handlers, modeled on
//! `cortex-app-server::state::AppState`: one process-wide singleton per
//! component, wrapped in `Arc` so handlers can clone cheaply out of the
//! axum `State` extractor.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gateway_anomaly::AnomalyDetector;
use gateway_approval::ApprovalWaiter;
use gateway_audit::AuditLog;
use gateway_classifier::Classifier;
use gateway_core::config::SecretsSettings;
use gateway_core::{GatewayConfig, GatewayPaths, Result as GatewayResult};
use gateway_cron::{CronJobStore, CronScheduler, CronSettings as CronSchedulerSettings, FileJobKv};
use gateway_hooks::HookPipeline;
use gateway_injection::{InjectionDetector, Sensitivity};
use gateway_orchestrator::{AllowAllAuthorization, SecurityOrchestrator};
use gateway_patterns::PatternSet;
use gateway_ratelimit::RateLimiter;
use gateway_sandbox::{InMemoryProvider, SandboxManager};
use gateway_secrets::SecretsScanner;
use tokio::sync::RwLock;

use crate::agent::UnimplementedAgent;

pub type Orchestrator = SecurityOrchestrator<AllowAllAuthorization>;
pub type Sandbox = SandboxManager<InMemoryProvider>;
pub type Cron = CronScheduler<FileJobKv, UnimplementedAgent>;

pub struct GatewayState {
    pub config: GatewayConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub audit: Arc<AuditLog>,
    pub approval: Arc<ApprovalWaiter>,
    pub sandbox: Arc<Sandbox>,
    pub cron: Arc<Cron>,
    pub hooks: Arc<HookPipeline>,
    /// Hot-configurable secrets-detection knobs for the standalone
    /// `security.secrets.*` RPCs, independent of the scanner instance the
    /// orchestrator constructed at startup for the `Shell` after-hook.
    pub secrets_config: Arc<RwLock<SecretsSettings>>,
    start_time: Instant,
}

impl GatewayState {
    pub async fn new(config: GatewayConfig, paths: GatewayPaths) -> GatewayResult<Self> {
        paths.ensure_dirs()?;

        let audit = Arc::new(AuditLog::new());
        let classifier = Classifier::new(PatternSet::default_builtin());
        let injection = InjectionDetector::new(Sensitivity::default());
        let rate_limiter = RateLimiter::new(
            config.rate_limiter.window_ms,
            config.rate_limiter.max_requests,
            config.rate_limiter.per_channel,
        );
        let anomaly = AnomalyDetector::new();
        let orchestrator_secrets = SecretsScanner::new(
            config.secrets.mode,
            config.secrets.enable_line_numbers,
            config.secrets.max_secrets_per_type,
        );

        let orchestrator = Arc::new(SecurityOrchestrator::new(
            Arc::new(AllowAllAuthorization),
            classifier,
            injection,
            Some(rate_limiter),
            anomaly,
            audit.clone(),
            orchestrator_secrets,
        ));

        let approval = Arc::new(ApprovalWaiter::new(Duration::from_secs(config.approval_timeout_secs)));

        let sandbox = Arc::new(SandboxManager::new(
            InMemoryProvider::default(),
            Duration::from_secs(config.sandbox.idle_timeout_minutes * 60),
            Duration::from_secs(config.sandbox.exec_timeout_secs),
        ));

        let kv = FileJobKv::new(paths.clone());
        let cron_store = Arc::new(CronJobStore::load(kv).await?);
        let cron_settings = CronSchedulerSettings {
            max_concurrent: config.cron.max_concurrent,
            execution_timeout: Duration::from_secs(config.cron.execution_timeout_secs),
            max_retries: config.cron.max_retries,
            retry_backoff_ms: config.cron.retry_backoff_ms,
        };
        let cron = Arc::new(CronScheduler::new(
            cron_store,
            Arc::new(UnimplementedAgent),
            cron_settings,
        ));

        let hooks = Arc::new(HookPipeline::new());

        let secrets_config = Arc::new(RwLock::new(config.secrets.clone()));

        Ok(Self {
            config,
            orchestrator,
            audit,
            approval,
            sandbox,
            cron,
            hooks,
            secrets_config,
            start_time: Instant::now(),
        })
    }

    /// Re-arm every enabled cron job. Call once after construction, with
    /// the state already behind an `Arc` (the scheduler's timers hold
    /// `Arc<CronScheduler<_, _>>` clones).
    pub async fn start_cron(self: &Arc<Self>) -> GatewayResult<()> {
        for job in self.cron.jobs().await {
            if job.enabled {
                self.cron.schedule(&job.id).await?;
            }
        }
        Ok(())
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
