//! Sandbox Manager (§4.I): per-user lifecycle over an abstract remote
//! sandbox capability — lazy creation, idle hibernation, termination.
//!
//! Grounded on `cortex-app-server::state::AppState::start_cleanup_task`'s
//! `self: &Arc<Self>` background-task idiom, and on
//! `cortex-sandbox::SandboxBackend` for the "core holds only a thin
//! provider trait" shape (here the provider is remote, not a local OS
//! sandbox, so the trait is async). Single-flight creation falls out of
//! holding a per-user `tokio::sync::Mutex` across the whole
//! `get_or_create` body rather than a separate watch-channel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use gateway_core::{GatewayError, Result};
use tokio::sync::Mutex;

/// Opaque handle to a provisioned sandbox.
#[derive(Debug, Clone)]
pub struct SandboxHandle {
    pub sandbox_id: String,
}

#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Abstract remote sandbox capability. The gateway depends only on this
/// trait, never on a concrete provider (cloud vendor choice is explicitly
/// out of scope per §1 Non-goals).
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn create(&self, user_id: &str) -> std::result::Result<SandboxHandle, String>;
    async fn run(
        &self,
        handle: &SandboxHandle,
        command: &str,
        timeout: Duration,
    ) -> std::result::Result<RunOutput, String>;
    async fn pause(&self, handle: &SandboxHandle) -> std::result::Result<(), String>;
    async fn kill(&self, handle: &SandboxHandle) -> std::result::Result<(), String>;
}

#[derive(Clone)]
struct ActiveSandbox {
    handle: SandboxHandle,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
}

enum SlotState {
    None,
    Active(ActiveSandbox),
    Hibernated,
    Terminated,
}

struct UserSlot {
    state: Mutex<SlotState>,
    /// Bumped on every touch/hibernate/terminate; an idle timer only acts
    /// if the generation it captured is still current when it fires.
    generation: AtomicU64,
}

impl Default for UserSlot {
    fn default() -> Self {
        Self {
            state: Mutex::new(SlotState::None),
            generation: AtomicU64::new(0),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SandboxStatus {
    pub active: bool,
    pub sandbox_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub uptime_ms: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ExecuteResult {
    pub success: bool,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub exit_code: i32,
}

pub struct SandboxManager<P: SandboxProvider> {
    provider: P,
    idle_timeout: Duration,
    exec_timeout: Duration,
    slots: DashMap<String, Arc<UserSlot>>,
}

impl<P: SandboxProvider + 'static> SandboxManager<P> {
    pub fn new(provider: P, idle_timeout: Duration, exec_timeout: Duration) -> Self {
        Self {
            provider,
            idle_timeout,
            exec_timeout,
            slots: DashMap::new(),
        }
    }

    fn slot(&self, user_id: &str) -> Arc<UserSlot> {
        self.slots
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(UserSlot::default()))
            .clone()
    }

    /// Get the user's active sandbox, creating one if needed. Concurrent
    /// callers for the same user serialize on the per-user mutex, so only
    /// one provider `create` call is ever issued per transition.
    pub async fn get_or_create(self: &Arc<Self>, user_id: &str) -> Result<SandboxHandle> {
        let slot = self.slot(user_id);
        let mut state = slot.state.lock().await;

        match &*state {
            SlotState::Active(active) => {
                let handle = active.handle.clone();
                drop(state);
                self.touch(user_id, &slot).await;
                Ok(handle)
            }
            SlotState::None | SlotState::Hibernated | SlotState::Terminated => {
                let handle = self
                    .provider
                    .create(user_id)
                    .await
                    .map_err(GatewayError::SandboxUnavailable)?;

                let now = gateway_core::now();
                *state = SlotState::Active(ActiveSandbox {
                    handle: handle.clone(),
                    created_at: now,
                    last_activity_at: now,
                });
                drop(state);
                self.arm_idle_timer(user_id, &slot);
                Ok(handle)
            }
        }
    }

    async fn touch(self: &Arc<Self>, user_id: &str, slot: &Arc<UserSlot>) {
        {
            let mut state = slot.state.lock().await;
            if let SlotState::Active(active) = &mut *state {
                active.last_activity_at = gateway_core::now();
            }
        }
        self.arm_idle_timer(user_id, slot);
    }

    fn arm_idle_timer(self: &Arc<Self>, user_id: &str, slot: &Arc<UserSlot>) {
        let generation = slot.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let manager = Arc::clone(self);
        let slot = Arc::clone(slot);
        let user_id = user_id.to_string();
        let idle_timeout = self.idle_timeout;

        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            if slot.generation.load(Ordering::SeqCst) == generation {
                manager.hibernate(&user_id).await;
            }
        });
    }

    /// Execute a command, creating/touching the sandbox first. Errors
    /// surface as a structured failure, never as a propagated exception.
    pub async fn execute(self: &Arc<Self>, user_id: &str, command: &str) -> ExecuteResult {
        let handle = match self.get_or_create(user_id).await {
            Ok(h) => h,
            Err(e) => {
                return ExecuteResult {
                    success: false,
                    output: None,
                    error_message: Some(e.to_string()),
                    exit_code: 1,
                }
            }
        };

        match self.provider.run(&handle, command, self.exec_timeout).await {
            Ok(out) => {
                let mut output = out.stdout;
                if !out.stderr.is_empty() {
                    output.push('\n');
                    output.push_str(&out.stderr);
                }
                ExecuteResult {
                    success: out.exit_code == 0,
                    output: Some(output),
                    error_message: None,
                    exit_code: out.exit_code,
                }
            }
            Err(e) => ExecuteResult {
                success: false,
                output: None,
                error_message: Some(e),
                exit_code: 1,
            },
        }
    }

    /// Cancel the idle timer (by invalidating its generation), pause the
    /// sandbox (falling back to `kill`, best-effort), and drop the Active
    /// mapping. A no-op if the user has no active sandbox.
    pub async fn hibernate(&self, user_id: &str) {
        let slot = self.slot(user_id);
        slot.generation.fetch_add(1, Ordering::SeqCst);

        let mut state = slot.state.lock().await;
        if let SlotState::Active(active) = &*state {
            if let Err(e) = self.provider.pause(&active.handle).await {
                tracing::warn!(user_id, error = %e, "pause failed, attempting kill");
                let _ = self.provider.kill(&active.handle).await;
            }
        }
        *state = SlotState::Hibernated;
    }

    pub async fn terminate(&self, user_id: &str) {
        let slot = self.slot(user_id);
        slot.generation.fetch_add(1, Ordering::SeqCst);

        let mut state = slot.state.lock().await;
        if let SlotState::Active(active) = &*state {
            let _ = self.provider.kill(&active.handle).await;
        }
        *state = SlotState::Terminated;
    }

    pub async fn terminate_all(&self) {
        let user_ids: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        let futures = user_ids.iter().map(|u| self.terminate(u));
        futures::future::join_all(futures).await;
    }

    pub async fn status(&self, user_id: &str) -> SandboxStatus {
        let slot = self.slot(user_id);
        let state = slot.state.lock().await;
        match &*state {
            SlotState::Active(active) => SandboxStatus {
                active: true,
                sandbox_id: Some(active.handle.sandbox_id.clone()),
                created_at: Some(active.created_at),
                last_activity_at: Some(active.last_activity_at),
                uptime_ms: Some(
                    (gateway_core::now() - active.created_at).num_milliseconds(),
                ),
            },
            _ => SandboxStatus {
                active: false,
                sandbox_id: None,
                created_at: None,
                last_activity_at: None,
                uptime_ms: None,
            },
        }
    }
}

/// In-memory provider used by tests and local development: no real
/// isolation, just bookkeeping, so the manager's state machine can be
/// exercised without a cloud dependency.
#[derive(Default)]
pub struct InMemoryProvider {
    pub create_calls: std::sync::atomic::AtomicU64,
    pub paused: DashMap<String, bool>,
    pub behavior: Mutex<HashMap<String, String>>,
}

#[async_trait]
impl SandboxProvider for InMemoryProvider {
    async fn create(&self, user_id: &str) -> std::result::Result<SandboxHandle, String> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        Ok(SandboxHandle {
            sandbox_id: format!("sandbox-{user_id}"),
        })
    }

    async fn run(
        &self,
        handle: &SandboxHandle,
        command: &str,
        _timeout: Duration,
    ) -> std::result::Result<RunOutput, String> {
        Ok(RunOutput {
            stdout: format!("[{}] ran: {command}", handle.sandbox_id),
            stderr: String::new(),
            exit_code: 0,
        })
    }

    async fn pause(&self, handle: &SandboxHandle) -> std::result::Result<(), String> {
        self.paused.insert(handle.sandbox_id.clone(), true);
        Ok(())
    }

    async fn kill(&self, _handle: &SandboxHandle) -> std::result::Result<(), String> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn get_or_create_reuses_active_sandbox() {
        let manager = Arc::new(SandboxManager::new(
            InMemoryProvider::default(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let a = manager.get_or_create("u1").await.unwrap();
        let b = manager.get_or_create("u1").await.unwrap();
        assert_eq!(a.sandbox_id, b.sandbox_id);
        assert_eq!(manager.provider.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_get_or_create_is_single_flight() {
        let manager = Arc::new(SandboxManager::new(
            InMemoryProvider::default(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let m = Arc::clone(&manager);
            handles.push(tokio::spawn(async move { m.get_or_create("u1").await.unwrap() }));
        }
        let results: Vec<_> = futures::future::join_all(handles)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert!(results.windows(2).all(|w| w[0].sandbox_id == w[1].sandbox_id));
        assert_eq!(manager.provider.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn execute_runs_command_against_sandbox() {
        let manager = Arc::new(SandboxManager::new(
            InMemoryProvider::default(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let result = manager.execute("u1", "ls -la").await;
        assert!(result.success);
        assert!(result.output.unwrap().contains("ls -la"));
    }

    #[tokio::test]
    async fn idle_timer_hibernates_after_timeout() {
        let manager = Arc::new(SandboxManager::new(
            InMemoryProvider::default(),
            Duration::from_millis(50),
            Duration::from_secs(30),
        ));
        manager.get_or_create("u1").await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = manager.status("u1").await;
        assert!(!status.active);
    }

    #[tokio::test]
    async fn terminate_prevents_later_hibernation() {
        let manager = Arc::new(SandboxManager::new(
            InMemoryProvider::default(),
            Duration::from_millis(50),
            Duration::from_secs(30),
        ));
        manager.get_or_create("u1").await.unwrap();
        manager.terminate("u1").await;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let status = manager.status("u1").await;
        assert!(!status.active);
        // A second get_or_create after termination must re-create.
        manager.get_or_create("u1").await.unwrap();
        assert_eq!(manager.provider.create_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn status_reports_inactive_for_unknown_user() {
        let manager = Arc::new(SandboxManager::new(
            InMemoryProvider::default(),
            Duration::from_secs(60),
            Duration::from_secs(30),
        ));
        let status = manager.status("ghost").await;
        assert!(!status.active);
    }
}
