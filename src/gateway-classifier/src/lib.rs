//! Classifier (§4.F): maps a command string to a `(tier, action, reason)`
//! triple by walking a fixed precedence chain — custom rules first, then
//! the shared Pattern Store.
//!
//! Grounded on `cortex-execpolicy::policy`'s first-match-wins evaluation
//! order and `gateway-patterns::PatternSet` for the BLOCK/ASK/ALLOW scan.

pub mod domain;

use gateway_core::model::{Action, Classification, Tier};
use gateway_patterns::{bounded_prefix, PatternList, PatternSet, RegexCache};
use serde::{Deserialize, Serialize};

/// Per-caller custom rule overlay (§3 Custom Rule Set). Blocked lists take
/// precedence over allowed lists throughout. This is the wire/storage
/// shape the `security.rules.*` RPCs read and write verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomRuleSet {
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    #[serde(default)]
    pub blocked_commands: Vec<String>,
    #[serde(default)]
    pub blocked_domains: Vec<String>,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub auto_approve_patterns: Vec<String>,
}

/// A `CustomRuleSet` with its command patterns compiled and cached once,
/// rather than re-`Regex::new`'d on every `classify` call (§4.A/§4.F:
/// "compiled regexes are cached"). Domains are plain suffix comparisons
/// ([`domain::any_suffix_match`]) and need no compilation.
#[derive(Clone, Default)]
pub struct CompiledCustomRuleSet {
    allowed_commands: PatternList,
    blocked_commands: PatternList,
    auto_approve_patterns: PatternList,
    pub blocked_domains: Vec<String>,
    pub allowed_domains: Vec<String>,
}

impl CompiledCustomRuleSet {
    /// Compile a caller's rule set once, e.g. when the `security.rules.set`
    /// RPC stores it, so later classifications reuse the cached regexes.
    pub fn compile(rules: &CustomRuleSet) -> Self {
        let mut cache = RegexCache::new();
        Self {
            allowed_commands: PatternList::compile(&rules.allowed_commands, &mut cache),
            blocked_commands: PatternList::compile(&rules.blocked_commands, &mut cache),
            auto_approve_patterns: PatternList::compile(&rules.auto_approve_patterns, &mut cache),
            blocked_domains: rules.blocked_domains.clone(),
            allowed_domains: rules.allowed_domains.clone(),
        }
    }
}

pub struct Classifier {
    patterns: PatternSet,
}

impl Classifier {
    pub fn new(patterns: PatternSet) -> Self {
        Self { patterns }
    }

    pub fn classify(&self, command: &str, custom: Option<&CompiledCustomRuleSet>) -> Classification {
        if command.trim().is_empty() {
            return Classification::new(command, Tier::Green, Action::Allow, "Empty command");
        }

        let bounded = bounded_prefix(command);

        if let Some(custom) = custom {
            if let Some(pattern) = custom.blocked_commands.first_match(bounded) {
                return Classification::new(
                    command,
                    Tier::Red,
                    Action::Block,
                    "Command matched a custom blocked pattern",
                )
                .with_matched_pattern(pattern);
            }

            if let Some(pattern) = custom.allowed_commands.first_match(bounded) {
                return Classification::new(
                    command,
                    Tier::Green,
                    Action::Allow,
                    "Command matched a custom allowed pattern",
                )
                .with_matched_pattern(pattern);
            }

            let domains = domain::extract_domains(bounded);
            if !domains.is_empty() {
                if let Some(hit) = domains
                    .iter()
                    .find(|d| domain::any_suffix_match(d, &custom.blocked_domains))
                {
                    return Classification::new(
                        command,
                        Tier::Red,
                        Action::Block,
                        "Command targets a blocked domain",
                    )
                    .with_matched_pattern(hit.clone());
                }

                if !custom.allowed_domains.is_empty() {
                    let all_allowed = domains
                        .iter()
                        .all(|d| domain::any_suffix_match(d, &custom.allowed_domains));
                    if !all_allowed {
                        return Classification::new(
                            command,
                            Tier::Red,
                            Action::Block,
                            "Command targets a domain outside the allowlist",
                        );
                    }
                }
            }

            if let Some(pattern) = custom.auto_approve_patterns.first_match(bounded) {
                return Classification::new(
                    command,
                    Tier::Green,
                    Action::Allow,
                    "Command matched an auto-approve pattern",
                )
                .with_matched_pattern(pattern);
            }
        }

        if let Some(pattern) = self.patterns.block.first_match(bounded) {
            return Classification::new(
                command,
                Tier::Red,
                Action::Block,
                "Command matched dangerous operation patterns",
            )
            .with_matched_pattern(pattern);
        }

        if let Some(pattern) = self.patterns.ask.first_match(bounded) {
            return Classification::new(
                command,
                Tier::Yellow,
                Action::Ask,
                "Command requires approval before execution",
            )
            .with_matched_pattern(pattern);
        }

        if let Some(pattern) = self.patterns.allow.first_match(bounded) {
            return Classification::new(
                command,
                Tier::Green,
                Action::Allow,
                "Command matched a known-safe pattern",
            )
            .with_matched_pattern(pattern);
        }

        Classification::new(
            command,
            Tier::Yellow,
            Action::Ask,
            "Unknown command — requires approval for safety",
        )
    }
}
