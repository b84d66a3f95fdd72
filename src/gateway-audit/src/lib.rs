//! Audit Log (§4.G): an append-only, newest-first, in-memory ring bounded
//! at `MAX_ENTRIES`, with a pure-function stats view over its contents.
//!
//! Grounded on `cortex-ratelimits`'s bounded in-memory tracker shape and
//! `cortex-storage::sessions::query`'s filter/limit/offset query
//! convention, using `parking_lot::Mutex` for the single internal lock
//! (no cross-component lock ordering concerns per the concurrency model).

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use gateway_core::model::{Action, Tier};
use gateway_core::{GatewayError, Result};
use gateway_secrets::SecretMatch;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Size bound from §3: oldest entries are evicted on overflow.
pub const MAX_ENTRIES: usize = 10_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub user_id: String,
    pub channel_id: Option<String>,
    pub command: String,
    pub tier: Tier,
    pub action: Action,
    pub reason: String,
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub secrets_found: Option<Vec<SecretMatch>>,
    pub secrets_redacted: bool,
}

/// Output byte cap from §3 (≤4096 bytes, possibly redacted).
pub const MAX_OUTPUT_BYTES: usize = 4096;

/// Truncate `text` to at most `MAX_OUTPUT_BYTES` bytes on a UTF-8 boundary.
pub fn truncate_output(text: &str) -> String {
    if text.len() <= MAX_OUTPUT_BYTES {
        return text.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Partial update applied by `AuditStore::update`. `None` fields are left
/// untouched; only fields actually present in the original source spec's
/// patch shape are settable here.
#[derive(Debug, Clone, Default)]
pub struct AuditPatch {
    pub approved: Option<bool>,
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub executed_at: Option<DateTime<Utc>>,
    pub output: Option<String>,
    pub error: Option<String>,
    pub secrets_found: Option<Vec<SecretMatch>>,
    pub secrets_redacted: Option<bool>,
}

/// A page of query results plus the match count before pagination.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub entries: Vec<AuditEntry>,
    pub total: usize,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryFilter {
    pub tier: Option<Tier>,
    pub action: Option<Action>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
}

impl QueryFilter {
    pub fn new() -> Self {
        Self {
            tier: None,
            action: None,
            from: None,
            to: None,
            limit: 50,
            offset: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub total: usize,
    pub by_tier: HashMap<String, usize>,
    pub by_action: HashMap<String, usize>,
    pub approval_rate: f64,
    pub last_update: Option<DateTime<Utc>>,
}

pub struct AuditLog {
    entries: Mutex<VecDeque<AuditEntry>>,
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(VecDeque::new()),
        }
    }

    pub fn create(
        &self,
        command: impl Into<String>,
        tier: Tier,
        action: Action,
        reason: impl Into<String>,
        user_id: impl Into<String>,
        channel_id: Option<String>,
    ) -> AuditEntry {
        let entry = AuditEntry {
            id: gateway_core::new_id(),
            created_at: gateway_core::now(),
            user_id: user_id.into(),
            channel_id,
            command: command.into(),
            tier,
            action,
            reason: reason.into(),
            approved: None,
            approved_by: None,
            approved_at: None,
            executed_at: None,
            output: None,
            error: None,
            secrets_found: None,
            secrets_redacted: false,
        };

        let mut entries = self.entries.lock();
        entries.push_front(entry.clone());
        while entries.len() > MAX_ENTRIES {
            entries.pop_back();
        }
        entry
    }

    pub fn update(&self, id: &str, patch: AuditPatch) -> Result<AuditEntry> {
        let mut entries = self.entries.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| GatewayError::NotFound(format!("audit entry {id}")))?;

        if let Some(approved) = patch.approved {
            entry.approved = Some(approved);
        }
        if let Some(by) = patch.approved_by {
            entry.approved_by = Some(by);
        }
        if let Some(at) = patch.approved_at {
            entry.approved_at = Some(at);
        }
        if let Some(at) = patch.executed_at {
            entry.executed_at = Some(at);
        }
        if let Some(output) = patch.output {
            entry.output = Some(truncate_output(&output));
        }
        if let Some(error) = patch.error {
            entry.error = Some(error);
        }
        if let Some(found) = patch.secrets_found {
            entry.secrets_found = Some(found);
        }
        if let Some(redacted) = patch.secrets_redacted {
            entry.secrets_redacted = redacted;
        }

        Ok(entry.clone())
    }

    pub fn get(&self, id: &str) -> Option<AuditEntry> {
        self.entries.lock().iter().find(|e| e.id == id).cloned()
    }

    /// Apply filters in declared order: subject, tier, action, time range,
    /// then offset/limit.
    pub fn query(&self, user_id: Option<&str>, filter: QueryFilter) -> Vec<AuditEntry> {
        self.query_page(user_id, filter).entries
    }

    /// Same filtering as [`Self::query`], but also reports the match count
    /// before pagination so callers (the `audit.logs` RPC) can report
    /// `{entries, total}` instead of just the current page length.
    pub fn query_page(&self, user_id: Option<&str>, filter: QueryFilter) -> QueryPage {
        let entries = self.entries.lock();
        let filtered: Vec<AuditEntry> = entries
            .iter()
            .filter(|e| user_id.is_none_or(|u| e.user_id == u))
            .filter(|e| filter.tier.is_none_or(|t| e.tier == t))
            .filter(|e| filter.action.is_none_or(|a| e.action == a))
            .filter(|e| filter.from.is_none_or(|from| e.created_at >= from))
            .filter(|e| filter.to.is_none_or(|to| e.created_at <= to))
            .cloned()
            .collect();

        let total = filtered.len();
        let limit = if filter.limit == 0 { 50 } else { filter.limit };
        let entries: Vec<AuditEntry> = filtered.into_iter().skip(filter.offset).take(limit).collect();
        let has_more = filter.offset + entries.len() < total;
        QueryPage { entries, total, has_more }
    }

    pub fn stats(&self, user_id: Option<&str>, days: i64) -> Stats {
        self.stats_at(user_id, days, Utc::now())
    }

    pub fn stats_at(&self, user_id: Option<&str>, days: i64, now: DateTime<Utc>) -> Stats {
        let since = now - ChronoDuration::days(days);
        let entries = self.entries.lock();
        let relevant: Vec<&AuditEntry> = entries
            .iter()
            .filter(|e| user_id.is_none_or(|u| e.user_id == u))
            .filter(|e| e.created_at >= since)
            .collect();

        let mut by_tier: HashMap<String, usize> = HashMap::new();
        let mut by_action: HashMap<String, usize> = HashMap::new();
        let mut total_ask = 0usize;
        let mut approved_ask = 0usize;
        let mut last_update: Option<DateTime<Utc>> = None;

        for e in &relevant {
            *by_tier.entry(e.tier.to_string()).or_insert(0) += 1;
            *by_action.entry(e.action.to_string()).or_insert(0) += 1;
            if e.action == Action::Ask {
                total_ask += 1;
                if e.approved == Some(true) {
                    approved_ask += 1;
                }
            }
            if last_update.is_none_or(|cur| e.created_at > cur) {
                last_update = Some(e.created_at);
            }
        }

        let approval_rate = if total_ask == 0 {
            0.0
        } else {
            approved_ask as f64 / total_ask as f64
        };

        Stats {
            total: relevant.len(),
            by_tier,
            by_action,
            approval_rate,
            last_update,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_and_query_newest_first() {
        let log = AuditLog::new();
        log.create("ls", Tier::Green, Action::Allow, "ok", "u1", None);
        log.create("rm -rf /", Tier::Red, Action::Block, "danger", "u1", None);

        let results = log.query(Some("u1"), QueryFilter::new());
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].command, "rm -rf /");
    }

    #[test]
    fn query_page_reports_total_before_pagination() {
        let log = AuditLog::new();
        for i in 0..5 {
            log.create(format!("cmd{i}"), Tier::Green, Action::Allow, "ok", "u1", None);
        }
        let page = log.query_page(Some("u1"), QueryFilter { limit: 2, offset: 0, ..QueryFilter::new() });
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.total, 5);
        assert!(page.has_more);

        let last_page = log.query_page(Some("u1"), QueryFilter { limit: 2, offset: 4, ..QueryFilter::new() });
        assert_eq!(last_page.entries.len(), 1);
        assert_eq!(last_page.total, 5);
        assert!(!last_page.has_more);
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let log = AuditLog::new();
        let err = log.update("missing", AuditPatch::default()).unwrap_err();
        assert!(matches!(err, GatewayError::NotFound(_)));
    }

    #[test]
    fn overflow_evicts_oldest() {
        let log = AuditLog::new();
        for i in 0..(MAX_ENTRIES + 10) {
            log.create(format!("cmd{i}"), Tier::Green, Action::Allow, "ok", "u1", None);
        }
        assert_eq!(log.len(), MAX_ENTRIES);
        let results = log.query(Some("u1"), QueryFilter { limit: 1, ..QueryFilter::new() });
        assert_eq!(results[0].command, format!("cmd{}", MAX_ENTRIES + 9));
    }

    #[test]
    fn stats_approval_rate_is_zero_with_no_ask_entries() {
        let log = AuditLog::new();
        log.create("ls", Tier::Green, Action::Allow, "ok", "u1", None);
        let stats = log.stats(Some("u1"), 7);
        assert_eq!(stats.approval_rate, 0.0);
    }

    #[test]
    fn stats_approval_rate_computed_from_ask_entries() {
        let log = AuditLog::new();
        let a = log.create("curl http://x", Tier::Yellow, Action::Ask, "ask", "u1", None);
        let b = log.create("curl http://y", Tier::Yellow, Action::Ask, "ask", "u1", None);
        log.update(&a.id, AuditPatch { approved: Some(true), ..Default::default() }).unwrap();
        log.update(&b.id, AuditPatch { approved: Some(false), ..Default::default() }).unwrap();

        let stats = log.stats(Some("u1"), 7);
        assert_eq!(stats.approval_rate, 0.5);
    }

    #[test]
    fn output_is_truncated_to_max_bytes() {
        let log = AuditLog::new();
        let entry = log.create("cmd", Tier::Green, Action::Allow, "ok", "u1", None);
        let big = "a".repeat(5000);
        let updated = log.update(&entry.id, AuditPatch { output: Some(big), ..Default::default() }).unwrap();
        assert_eq!(updated.output.unwrap().len(), MAX_OUTPUT_BYTES);
    }
}
