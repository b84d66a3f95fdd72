//! Hook Pipeline (§4.J): ordered pre/post interception around every tool
//! call. Subscribers run highest-priority first, stable for ties; a
//! subscriber that panics is treated as if it returned `pass` (§7
//! propagation policy).
//!
//! Grounded on `cortex-hooks::executor::HookExecutor`'s
//! register/run-by-event shape, adapted from file-system hook commands to
//! in-process async callbacks, and on the panic-isolation requirement met
//! via `tokio::spawn` + `JoinError::is_panic` (there is no synchronous
//! `catch_unwind` across an `.await` point).

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::RwLock;

/// Context carried with every hook invocation (§6 `ctx`).
#[derive(Debug, Clone, Default)]
pub struct HookContext {
    pub agent_id: String,
    pub user_id: String,
    pub channel_id: String,
    pub platform_user_id: String,
    pub session_key: String,
}

#[derive(Debug, Clone)]
pub enum BeforeOutcome {
    Pass,
    Block { reason: String },
    Params { params: Value },
}

#[derive(Debug, Clone)]
pub enum AfterOutcome {
    Pass,
    Block { reason: String },
}

pub type BeforeCallback =
    Arc<dyn Fn(String, Value, HookContext) -> BoxFuture<'static, BeforeOutcome> + Send + Sync>;
pub type AfterCallback =
    Arc<dyn Fn(String, Value, HookContext) -> BoxFuture<'static, AfterOutcome> + Send + Sync>;

struct BeforeSubscriber {
    priority: i32,
    seq: usize,
    callback: BeforeCallback,
}

struct AfterSubscriber {
    priority: i32,
    seq: usize,
    callback: AfterCallback,
}

/// Outcome of running the full before-hook chain for one tool call.
#[derive(Debug, Clone)]
pub enum BeforeResult {
    Proceed { params: Value },
    Blocked { reason: String },
}

#[derive(Debug, Clone)]
pub enum AfterResult {
    Proceed,
    Blocked { reason: String },
}

/// The process-wide pre/post interception chain.
#[derive(Default)]
pub struct HookPipeline {
    before: RwLock<Vec<BeforeSubscriber>>,
    after: RwLock<Vec<AfterSubscriber>>,
    seq: std::sync::atomic::AtomicUsize,
}

impl HookPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_seq(&self) -> usize {
        self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst)
    }

    /// Register a `before_tool_call` subscriber. Higher `priority` runs
    /// first; equal priorities run in registration order.
    pub async fn on_before<F>(&self, priority: i32, callback: F)
    where
        F: Fn(String, Value, HookContext) -> BoxFuture<'static, BeforeOutcome>
            + Send
            + Sync
            + 'static,
    {
        let seq = self.next_seq();
        let mut subs = self.before.write().await;
        subs.push(BeforeSubscriber {
            priority,
            seq,
            callback: Arc::new(callback),
        });
        subs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    pub async fn on_after<F>(&self, priority: i32, callback: F)
    where
        F: Fn(String, Value, HookContext) -> BoxFuture<'static, AfterOutcome>
            + Send
            + Sync
            + 'static,
    {
        let seq = self.next_seq();
        let mut subs = self.after.write().await;
        subs.push(AfterSubscriber {
            priority,
            seq,
            callback: Arc::new(callback),
        });
        subs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Run every `before_tool_call` subscriber for `tool_name` in priority
    /// order. A `Block` short-circuits the remaining subscribers; a
    /// `Params` replacement is merged into what downstream subscribers and
    /// the eventual execution see.
    pub async fn run_before(
        &self,
        tool_name: &str,
        initial_params: Value,
        ctx: &HookContext,
    ) -> BeforeResult {
        let subs: Vec<BeforeCallback> = self.before.read().await.iter().map(|s| s.callback.clone()).collect();

        let mut params = initial_params;
        for callback in subs {
            let fut = callback(tool_name.to_string(), params.clone(), ctx.clone());
            match tokio::spawn(fut).await {
                Ok(BeforeOutcome::Pass) => {}
                Ok(BeforeOutcome::Block { reason }) => {
                    return BeforeResult::Blocked { reason };
                }
                Ok(BeforeOutcome::Params { params: new_params }) => {
                    params = merge_params(params, new_params);
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "before_tool_call subscriber panicked; treating as pass");
                }
            }
        }

        BeforeResult::Proceed { params }
    }

    /// Run every `after_tool_call` subscriber. A `Block` replaces the
    /// result with a block response (used to suppress secret-bearing
    /// output) but subsequent subscribers still run, mirroring §4.J's
    /// "may mutate audit entries" side-effect model.
    pub async fn run_after(&self, tool_name: &str, result: Value, ctx: &HookContext) -> AfterResult {
        let subs: Vec<AfterCallback> = self.after.read().await.iter().map(|s| s.callback.clone()).collect();

        let mut outcome = AfterResult::Proceed;
        for callback in subs {
            let fut = callback(tool_name.to_string(), result.clone(), ctx.clone());
            match tokio::spawn(fut).await {
                Ok(AfterOutcome::Pass) => {}
                Ok(AfterOutcome::Block { reason }) => {
                    outcome = AfterResult::Blocked { reason };
                }
                Err(join_err) => {
                    tracing::error!(error = %join_err, "after_tool_call subscriber panicked; treating as pass");
                }
            }
        }

        outcome
    }
}

/// Shallow object merge: keys in `overlay` replace keys in `base`. Falls
/// back to outright replacement when either side is not a JSON object.
fn merge_params(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (k, v) in overlay_map {
                base_map.insert(k, v);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx() -> HookContext {
        HookContext {
            agent_id: "a1".to_string(),
            user_id: "u1".to_string(),
            channel_id: "c1".to_string(),
            platform_user_id: "p1".to_string(),
            session_key: "s1".to_string(),
        }
    }

    #[tokio::test]
    async fn subscribers_run_highest_priority_first() {
        let pipeline = HookPipeline::new();
        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));

        let o1 = order.clone();
        pipeline
            .on_before(1, move |_, _, _| {
                let o = o1.clone();
                Box::pin(async move {
                    o.lock().await.push("low");
                    BeforeOutcome::Pass
                })
            })
            .await;

        let o2 = order.clone();
        pipeline
            .on_before(10, move |_, _, _| {
                let o = o2.clone();
                Box::pin(async move {
                    o.lock().await.push("high");
                    BeforeOutcome::Pass
                })
            })
            .await;

        pipeline.run_before("Shell", json!({}), &ctx()).await;
        let recorded = order.lock().await.clone();
        assert_eq!(recorded, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn block_short_circuits_remaining_subscribers() {
        let pipeline = HookPipeline::new();
        let ran = Arc::new(std::sync::atomic::AtomicBool::new(false));

        pipeline
            .on_before(10, |_, _, _| Box::pin(async { BeforeOutcome::Block { reason: "nope".to_string() } }))
            .await;

        let ran2 = ran.clone();
        pipeline
            .on_before(1, move |_, _, _| {
                let r = ran2.clone();
                Box::pin(async move {
                    r.store(true, std::sync::atomic::Ordering::SeqCst);
                    BeforeOutcome::Pass
                })
            })
            .await;

        let result = pipeline.run_before("Shell", json!({}), &ctx()).await;
        assert!(matches!(result, BeforeResult::Blocked { reason } if reason == "nope"));
        assert!(!ran.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn params_modifications_compose() {
        let pipeline = HookPipeline::new();

        pipeline
            .on_before(10, |_, params, _| {
                Box::pin(async move {
                    let mut p = params.as_object().cloned().unwrap_or_default();
                    p.insert("a".to_string(), json!(1));
                    BeforeOutcome::Params { params: Value::Object(p) }
                })
            })
            .await;

        pipeline
            .on_before(5, |_, params, _| {
                Box::pin(async move {
                    let mut p = params.as_object().cloned().unwrap_or_default();
                    p.insert("b".to_string(), json!(2));
                    BeforeOutcome::Params { params: Value::Object(p) }
                })
            })
            .await;

        let result = pipeline.run_before("Shell", json!({"command": "ls"}), &ctx()).await;
        match result {
            BeforeResult::Proceed { params } => {
                assert_eq!(params["command"], json!("ls"));
                assert_eq!(params["a"], json!(1));
                assert_eq!(params["b"], json!(2));
            }
            BeforeResult::Blocked { .. } => panic!("expected proceed"),
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_is_treated_as_pass() {
        let pipeline = HookPipeline::new();
        pipeline
            .on_before(10, |_, _, _| Box::pin(async { panic!("boom") }))
            .await;

        let result = pipeline.run_before("Shell", json!({"x": 1}), &ctx()).await;
        match result {
            BeforeResult::Proceed { params } => assert_eq!(params["x"], json!(1)),
            BeforeResult::Blocked { .. } => panic!("panic must not block"),
        }
    }

    #[tokio::test]
    async fn after_hook_block_replaces_result() {
        let pipeline = HookPipeline::new();
        pipeline
            .on_after(10, |_, _, _| {
                Box::pin(async { AfterOutcome::Block { reason: "secrets".to_string() } })
            })
            .await;

        let result = pipeline.run_after("Shell", json!("output"), &ctx()).await;
        assert!(matches!(result, AfterResult::Blocked { reason } if reason == "secrets"));
    }
}
