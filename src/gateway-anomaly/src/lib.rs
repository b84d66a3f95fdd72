//! Behavioral Anomaly Detector (§4.E): a per-user baseline plus a bounded
//! recent-command FIFO, scored against four weighted factors.
//!
//! Grounded on `gateway-ratelimit::RateLimiter`'s per-subject `DashMap`
//! shape, reused here for per-user behavioral state instead of token
//! buckets.

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Timelike, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Bound on the per-user recent-command FIFO (§3 Recent Commands).
const MAX_RECENT: usize = 100;
/// Minimum recent-entry count before `update_baseline` recomputes.
const MIN_BASELINE_SAMPLES: usize = 10;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TypicalHours {
    pub start: u32,
    pub end: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserBaseline {
    pub user_id: String,
    pub avg_commands_per_hour: f64,
    pub command_frequency: HashMap<String, u32>,
    pub typical_hours: TypicalHours,
    pub last_updated: DateTime<Utc>,
}

impl UserBaseline {
    fn empty(user_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.to_string(),
            avg_commands_per_hour: 0.0,
            command_frequency: HashMap::new(),
            typical_hours: TypicalHours { start: 0, end: 23 },
            last_updated: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Allow,
    Flag,
    Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub is_anomaly: bool,
    pub score: f64,
    pub factors: Vec<String>,
    pub recommendation: Recommendation,
}

struct UserState {
    recent: VecDeque<(String, DateTime<Utc>)>,
    baseline: UserBaseline,
}

/// Process-wide per-user anomaly state, keyed by `user_id`.
#[derive(Default)]
pub struct AnomalyDetector {
    users: DashMap<String, UserState>,
}

fn head_token(command: &str) -> &str {
    command.split_whitespace().next().unwrap_or("")
}

impl AnomalyDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analyze(&self, user_id: &str, command: &str) -> AnomalyResult {
        self.analyze_at(user_id, command, Utc::now())
    }

    /// Same as `analyze`, with an injectable clock for deterministic tests.
    pub fn analyze_at(&self, user_id: &str, command: &str, now: DateTime<Utc>) -> AnomalyResult {
        let mut entry = self.users.entry(user_id.to_string()).or_insert_with(|| UserState {
            recent: VecDeque::new(),
            baseline: UserBaseline::empty(user_id, now),
        });

        let mut score = 0.0f64;
        let mut factors = Vec::new();

        let recent_last_hour = entry
            .recent
            .iter()
            .filter(|(_, ts)| now.signed_duration_since(*ts).num_seconds() < 3600)
            .count();
        if entry.baseline.avg_commands_per_hour > 0.0
            && (recent_last_hour as f64) > 3.0 * entry.baseline.avg_commands_per_hour
        {
            score += 0.30;
            factors.push("frequency_spike".to_string());
        }

        let hour = now.hour();
        if hour < entry.baseline.typical_hours.start || hour > entry.baseline.typical_hours.end {
            score += 0.20;
            factors.push("off_hours".to_string());
        }

        let head = head_token(command);
        if !head.is_empty() && !entry.baseline.command_frequency.contains_key(head) {
            score += 0.20;
            factors.push("novel_command_head".to_string());
        }

        if let Some((_, last_ts)) = entry.recent.back() {
            if now.signed_duration_since(*last_ts).num_milliseconds() < 1000 {
                score += 0.15;
                factors.push("rapid_succession".to_string());
            }
        }

        entry.recent.push_back((command.to_string(), now));
        while entry.recent.len() > MAX_RECENT {
            entry.recent.pop_front();
        }

        let score = score.min(1.0);
        let is_anomaly = score >= 0.5;
        let recommendation = if score >= 0.7 {
            Recommendation::Block
        } else if score >= 0.5 {
            Recommendation::Flag
        } else {
            Recommendation::Allow
        };

        AnomalyResult {
            is_anomaly,
            score,
            factors,
            recommendation,
        }
    }

    /// Recompute the baseline from recent history. No-op if fewer than
    /// `MIN_BASELINE_SAMPLES` entries have been recorded.
    pub fn update_baseline(&self, user_id: &str) -> Option<UserBaseline> {
        self.update_baseline_at(user_id, Utc::now())
    }

    pub fn update_baseline_at(&self, user_id: &str, now: DateTime<Utc>) -> Option<UserBaseline> {
        let mut entry = self.users.get_mut(user_id)?;
        if entry.recent.len() < MIN_BASELINE_SAMPLES {
            return Some(entry.baseline.clone());
        }

        let last_hour_count = entry
            .recent
            .iter()
            .filter(|(_, ts)| now.signed_duration_since(*ts).num_seconds() < 3600)
            .count();

        let mut command_frequency: HashMap<String, u32> = HashMap::new();
        let mut min_hour = 23u32;
        let mut max_hour = 0u32;
        for (command, ts) in entry.recent.iter() {
            *command_frequency.entry(head_token(command).to_string()).or_insert(0) += 1;
            let hour = ts.hour();
            min_hour = min_hour.min(hour);
            max_hour = max_hour.max(hour);
        }

        entry.baseline = UserBaseline {
            user_id: user_id.to_string(),
            avg_commands_per_hour: last_hour_count as f64,
            command_frequency,
            typical_hours: TypicalHours {
                start: min_hour,
                end: max_hour,
            },
            last_updated: now,
        };
        Some(entry.baseline.clone())
    }

    pub fn get_baseline(&self, user_id: &str) -> Option<UserBaseline> {
        self.users.get(user_id).map(|e| e.baseline.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn first_command_for_new_user_is_not_anomalous() {
        let detector = AnomalyDetector::new();
        let result = detector.analyze("u1", "ls -la");
        assert!(!result.is_anomaly);
        assert_eq!(result.recommendation, Recommendation::Allow);
    }

    #[test]
    fn rapid_succession_scores_015() {
        let detector = AnomalyDetector::new();
        let t0 = Utc::now();
        detector.analyze_at("u1", "ls", t0);
        let result = detector.analyze_at("u1", "pwd", t0 + Duration::milliseconds(500));
        assert!(result.factors.contains(&"rapid_succession".to_string()));
        assert!(result.score >= 0.15);
    }

    #[test]
    fn baseline_does_not_recompute_below_minimum_samples() {
        let detector = AnomalyDetector::new();
        for i in 0..5 {
            detector.analyze("u1", &format!("cmd{i}"));
        }
        let baseline = detector.update_baseline("u1").unwrap();
        assert_eq!(baseline.avg_commands_per_hour, 0.0);
    }

    #[test]
    fn baseline_recomputes_after_minimum_samples() {
        let detector = AnomalyDetector::new();
        let t0 = Utc::now();
        for i in 0..12 {
            detector.analyze_at("u1", "ls -la", t0 + Duration::seconds(i));
        }
        let baseline = detector.update_baseline_at("u1", t0 + Duration::seconds(20)).unwrap();
        assert_eq!(baseline.avg_commands_per_hour, 12.0);
        assert_eq!(baseline.command_frequency.get("ls"), Some(&12));
    }

    #[test]
    fn novel_command_head_scores_when_baseline_exists() {
        let detector = AnomalyDetector::new();
        let t0 = Utc::now();
        for i in 0..12 {
            detector.analyze_at("u1", "ls -la", t0 + Duration::seconds(i * 5));
        }
        detector.update_baseline_at("u1", t0 + Duration::seconds(100));
        let result = detector.analyze_at("u1", "rm -rf /tmp/x", t0 + Duration::seconds(200));
        assert!(result.factors.contains(&"novel_command_head".to_string()));
    }

    #[test]
    fn recent_fifo_bounded_at_100() {
        let detector = AnomalyDetector::new();
        let t0 = Utc::now();
        for i in 0..150 {
            detector.analyze_at("u1", "ls", t0 + Duration::seconds(i));
        }
        let entry = detector.users.get("u1").unwrap();
        assert_eq!(entry.recent.len(), 100);
    }
}
