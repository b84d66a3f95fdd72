//! Approval Waiter (§4.H): a promise-like rendezvous between a requester
//! awaiting human confirmation and an out-of-band approver, with a
//! per-request timeout.
//!
//! Grounded on `cortex-agents::spec::approval::ApprovalManager`, which
//! already pairs a `tokio::sync::oneshot` channel with
//! `tokio::time::timeout` for exactly this rendezvous; generalized here
//! to many concurrent requests keyed by id, via a `DashMap` (the
//! per-subject map shape shared with `gateway-ratelimit`/`gateway-anomaly`).

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use gateway_core::model::Tier;
use gateway_core::{GatewayError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequestInfo {
    pub id: String,
    pub command: String,
    pub tier: Tier,
    pub reason: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub requester_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub approved: bool,
    pub approved_by: String,
    pub timestamp: DateTime<Utc>,
}

enum Outcome {
    Approved { by: String, at: DateTime<Utc> },
    Rejected(Option<String>),
}

struct Pending {
    info: ApprovalRequestInfo,
    tx: oneshot::Sender<Outcome>,
}

/// Process-wide table of in-flight approval requests, keyed by request id.
pub struct ApprovalWaiter {
    pending: DashMap<String, Pending>,
    /// Timeout applied to a `request` call that doesn't pass its own
    /// override, sourced from `GatewayConfig::approval_timeout_secs` (§6).
    default_timeout: std::time::Duration,
}

impl Default for ApprovalWaiter {
    fn default() -> Self {
        Self::new(std::time::Duration::from_secs(300))
    }
}

impl ApprovalWaiter {
    pub fn new(default_timeout: std::time::Duration) -> Self {
        Self {
            pending: DashMap::new(),
            default_timeout,
        }
    }

    /// Register a request and await its eventual decision, or fail with
    /// `ApprovalTimeout` once the timeout elapses without a decision.
    /// `timeout` overrides the waiter's configured default for this one
    /// request; pass `None` to use that default.
    pub async fn request(
        &self,
        command: impl Into<String>,
        tier: Tier,
        reason: impl Into<String>,
        requester_id: impl Into<String>,
        timeout: Option<std::time::Duration>,
    ) -> Result<Decision> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let id = gateway_core::new_id();
        let now = gateway_core::now();
        let info = ApprovalRequestInfo {
            id: id.clone(),
            command: command.into(),
            tier,
            reason: reason.into(),
            created_at: now,
            expires_at: now + ChronoDuration::from_std(timeout).unwrap_or(ChronoDuration::zero()),
            requester_id: requester_id.into(),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), Pending { info, tx });

        let result = tokio::time::timeout(timeout, rx).await;
        // Whatever happened, the entry (if still present) must be removed —
        // either approve/reject already did it, or the timer just fired.
        self.pending.remove(&id);

        match result {
            Ok(Ok(Outcome::Approved { by, at })) => Ok(Decision {
                approved: true,
                approved_by: by,
                timestamp: at,
            }),
            Ok(Ok(Outcome::Rejected(reason))) => Err(GatewayError::ApprovalRejected(reason)),
            Ok(Err(_)) => Err(GatewayError::ApprovalRejected(Some(
                "approval channel closed".to_string(),
            ))),
            Err(_) => Err(GatewayError::ApprovalTimeout),
        }
    }

    /// Approve a pending request. Fails with `not_found` for an unknown,
    /// already-approved, or already-rejected id.
    pub fn approve(&self, id: &str, approved_by: impl Into<String>) -> Result<()> {
        let (_, pending) = self
            .pending
            .remove(id)
            .ok_or_else(|| GatewayError::NotFound(format!("approval request {id}")))?;
        let _ = pending.tx.send(Outcome::Approved {
            by: approved_by.into(),
            at: gateway_core::now(),
        });
        Ok(())
    }

    pub fn reject(&self, id: &str, reason: Option<String>) -> Result<()> {
        let (_, pending) = self
            .pending
            .remove(id)
            .ok_or_else(|| GatewayError::NotFound(format!("approval request {id}")))?;
        let _ = pending.tx.send(Outcome::Rejected(reason));
        Ok(())
    }

    /// Pending requests, newest-created first.
    pub fn list_pending(&self) -> Vec<ApprovalRequestInfo> {
        let mut items: Vec<ApprovalRequestInfo> =
            self.pending.iter().map(|e| e.info.clone()).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items
    }

    /// Defensive sweep: reject any entry past its `expires_at`. The
    /// primary timeout mechanism is the per-request `tokio::time::timeout`
    /// in `request`; this exists for callers that poll state rather than
    /// await the future directly.
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Utc::now())
    }

    pub fn cleanup_expired_at(&self, now: DateTime<Utc>) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|e| e.info.expires_at <= now)
            .map(|e| e.key().clone())
            .collect();

        let count = expired.len();
        for id in expired {
            if let Some((_, pending)) = self.pending.remove(&id) {
                let _ = pending.tx.send(Outcome::Rejected(Some("expired".to_string())));
            }
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn approve_resolves_the_request() {
        let waiter = std::sync::Arc::new(ApprovalWaiter::new(Duration::from_secs(5)));
        let w = waiter.clone();
        let handle = tokio::spawn(async move {
            w.request("rm file", Tier::Yellow, "ask", "u1", None).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let pending = waiter.list_pending();
        assert_eq!(pending.len(), 1);
        waiter.approve(&pending[0].id, "admin").unwrap();

        let decision = handle.await.unwrap().unwrap();
        assert!(decision.approved);
        assert_eq!(decision.approved_by, "admin");
        assert!(waiter.list_pending().is_empty());
    }

    #[tokio::test]
    async fn reject_resolves_as_rejected_error() {
        let waiter = std::sync::Arc::new(ApprovalWaiter::new(Duration::from_secs(5)));
        let w = waiter.clone();
        let handle = tokio::spawn(async move {
            w.request("rm file", Tier::Yellow, "ask", "u1", None).await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let pending = waiter.list_pending();
        waiter.reject(&pending[0].id, Some("not today".to_string())).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, GatewayError::ApprovalRejected(Some(ref r)) if r == "not today"));
    }

    #[tokio::test]
    async fn timeout_fires_when_undecided() {
        let waiter = ApprovalWaiter::new(Duration::from_millis(30));
        let err = waiter
            .request("rm file", Tier::Yellow, "ask", "u1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ApprovalTimeout));
    }

    #[tokio::test]
    async fn per_request_timeout_overrides_the_default() {
        let waiter = ApprovalWaiter::new(Duration::from_secs(300));
        let err = waiter
            .request("rm file", Tier::Yellow, "ask", "u1", Some(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ApprovalTimeout));
    }

    #[test]
    fn approve_unknown_id_is_not_found() {
        let waiter = ApprovalWaiter::new(Duration::from_secs(300));
        let err = waiter.approve("missing", "admin").unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[tokio::test]
    async fn approve_and_reject_are_mutually_exclusive() {
        let waiter = std::sync::Arc::new(ApprovalWaiter::new(Duration::from_secs(5)));
        let w = waiter.clone();
        let handle = tokio::spawn(async move {
            w.request("rm file", Tier::Yellow, "ask", "u1", None).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let id = waiter.list_pending()[0].id.clone();

        waiter.approve(&id, "admin").unwrap();
        let second = waiter.reject(&id, None);
        assert!(matches!(second, Err(GatewayError::NotFound(_))));

        let decision = handle.await.unwrap().unwrap();
        assert!(decision.approved);
    }
}
