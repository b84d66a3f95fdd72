//! Data model shared across component crates (§3): `Tier` and `Action` are
//! distinct so anomaly escalation or custom rules can override the action
//! while the tier is preserved for reporting.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::Green => write!(f, "green"),
            Tier::Yellow => write!(f, "yellow"),
            Tier::Red => write!(f, "red"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Ask,
    Block,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::Allow => write!(f, "allow"),
            Action::Ask => write!(f, "ask"),
            Action::Block => write!(f, "block"),
        }
    }
}

/// The outcome of classifying a single command (§3 Classification).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Classification {
    pub command: String,
    pub tier: Tier,
    pub action: Action,
    pub reason: String,
    pub matched_pattern: Option<String>,
    pub requires_approval: bool,
}

impl Classification {
    pub fn new(command: impl Into<String>, tier: Tier, action: Action, reason: impl Into<String>) -> Self {
        let requires_approval = matches!(action, Action::Ask);
        Self {
            command: command.into(),
            tier,
            action,
            reason: reason.into(),
            matched_pattern: None,
            requires_approval,
        }
    }

    pub fn with_matched_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.matched_pattern = Some(pattern.into());
        self
    }
}
