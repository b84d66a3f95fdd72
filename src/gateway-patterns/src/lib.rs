//! Pattern Store (§4.A): versioned, ordered lists of allow/ask/block regex
//! patterns. Immutable at runtime except via explicit replacement.
//!
//! Grounded on `cortex-execpolicy::config::PolicyConfig` (a plain
//! `Vec<String>` of pattern sources validated and compiled lazily) and the
//! RegexSet-caching approach demonstrated by the example pack's
//! `HeuristicDetector`.

use std::collections::HashMap;
use std::sync::Arc;

use gateway_core::{GatewayError, Result};
use regex::Regex;

/// Maximum source length before a pattern is rejected as a ReDoS risk.
const MAX_PATTERN_LEN: usize = 100;

/// One compiled pattern plus the source it was compiled from (for reporting
/// `matched_pattern` back to callers).
#[derive(Clone)]
pub struct CompiledPattern {
    pub source: String,
    pub regex: Arc<Regex>,
}

/// A single ordered list of patterns (one of BLOCK/ASK/ALLOW).
#[derive(Clone, Default)]
pub struct PatternList {
    patterns: Vec<CompiledPattern>,
}

impl PatternList {
    /// First match wins within the list; order of `sources` is the
    /// evaluation order.
    pub fn compile(sources: &[String], cache: &mut RegexCache) -> Self {
        let mut patterns = Vec::with_capacity(sources.len());
        for source in sources {
            if let Some(reason) = reject_reason(source) {
                tracing::warn!(pattern = %source, reason = %reason, "rejected pattern at load time");
                continue;
            }
            match cache.get_or_compile(source) {
                Ok(regex) => patterns.push(CompiledPattern {
                    source: source.clone(),
                    regex,
                }),
                Err(e) => {
                    tracing::warn!(pattern = %source, error = %e, "failed to compile pattern");
                }
            }
        }
        Self { patterns }
    }

    /// Return the source of the first pattern that matches `text`, scanning
    /// against at most a 10,000-char prefix.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        let bounded = bounded_prefix(text);
        self.patterns
            .iter()
            .find(|p| p.regex.is_match(bounded))
            .map(|p| p.source.as_str())
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Regex execution is bounded: inputs longer than 10,000 characters are
/// evaluated against a 10,000-char prefix only.
pub fn bounded_prefix(text: &str) -> &str {
    const LIMIT: usize = 10_000;
    if text.len() <= LIMIT {
        return text;
    }
    // Respect UTF-8 boundaries when truncating.
    let mut end = LIMIT;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Reject patterns whose source is too long, or which contain two or more
/// adjacent unbounded quantifiers — a proxy for catastrophic backtracking.
/// Returns `Some(reason)` when the pattern should be rejected.
fn reject_reason(source: &str) -> Option<String> {
    if source.len() > MAX_PATTERN_LEN {
        return Some(format!("pattern exceeds {MAX_PATTERN_LEN} characters"));
    }
    if has_adjacent_unbounded_quantifiers(source) {
        return Some("two or more adjacent unbounded quantifiers".to_string());
    }
    None
}

/// Heuristic ReDoS check: true if two unbounded quantifiers (`*` or `+`,
/// optionally behind a `?`/`}` from a prior group) appear within a short
/// span of each other, e.g. `.*.*`, `(a+)+`, `.+.+`.
fn has_adjacent_unbounded_quantifiers(source: &str) -> bool {
    let chars: Vec<char> = source.chars().collect();
    let quantifier_positions: Vec<usize> = chars
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == '*' || **c == '+')
        .map(|(i, _)| i)
        .collect();

    for window in quantifier_positions.windows(2) {
        if window[1] - window[0] <= 3 {
            return true;
        }
    }
    false
}

/// Compiled-regex cache, keyed by source string, shared across pattern
/// lists so identical patterns are only compiled once.
#[derive(Default)]
pub struct RegexCache {
    compiled: HashMap<String, Arc<Regex>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_compile(&mut self, source: &str) -> Result<Arc<Regex>> {
        if let Some(regex) = self.compiled.get(source) {
            return Ok(regex.clone());
        }
        let regex = Arc::new(
            Regex::new(source).map_err(|e| GatewayError::InvalidParams(e.to_string()))?,
        );
        self.compiled.insert(source.to_string(), regex.clone());
        Ok(regex)
    }
}

/// The full three-tier pattern set: BLOCK scanned first, then ASK, then
/// ALLOW. Immutable at runtime except via `PatternSet::replace`.
#[derive(Clone, Default)]
pub struct PatternSet {
    pub block: PatternList,
    pub ask: PatternList,
    pub allow: PatternList,
}

impl PatternSet {
    pub fn compile(
        block_sources: &[String],
        ask_sources: &[String],
        allow_sources: &[String],
    ) -> Self {
        let mut cache = RegexCache::new();
        Self {
            block: PatternList::compile(block_sources, &mut cache),
            ask: PatternList::compile(ask_sources, &mut cache),
            allow: PatternList::compile(allow_sources, &mut cache),
        }
    }

    pub fn default_builtin() -> Self {
        Self::compile(&default_block_patterns(), &default_ask_patterns(), &default_allow_patterns())
    }
}

/// Built-in BLOCK patterns: destructive or irreversible operations.
pub fn default_block_patterns() -> Vec<String> {
    vec![
        r"^\s*rm\s+(-\w*r\w*f\w*|-\w*f\w*r\w*)\s+/\s*$".to_string(),
        r"^\s*rm\s+-rf\s+/".to_string(),
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;".to_string(),
        r"\bmkfs(\.\w+)?\b".to_string(),
        r"\bdd\s+.*of=/dev/".to_string(),
        r"\bshutdown\b|\breboot\b|\bhalt\b".to_string(),
        r">\s*/dev/sd[a-z]".to_string(),
        r"\bchmod\s+-R\s+777\s+/".to_string(),
    ]
}

/// Built-in ASK patterns: commands needing human confirmation by default.
pub fn default_ask_patterns() -> Vec<String> {
    vec![
        r"^\s*(curl|wget)\b".to_string(),
        r"^\s*git\s+(push|reset\s+--hard)\b".to_string(),
        r"^\s*(sudo|doas)\b".to_string(),
        r"^\s*(npm|pip|pip3|cargo|gem)\s+(install|uninstall)\b".to_string(),
        r"^\s*docker\b".to_string(),
        r"^\s*(kill|pkill)\b".to_string(),
    ]
}

/// Built-in ALLOW patterns: common read-only / idempotent commands.
pub fn default_allow_patterns() -> Vec<String> {
    vec![
        r"^\s*ls\b".to_string(),
        r"^\s*pwd\s*$".to_string(),
        r"^\s*cat\b".to_string(),
        r"^\s*echo\b".to_string(),
        r"^\s*git\s+(status|log|diff|branch)\b".to_string(),
        r"^\s*grep\b".to_string(),
        r"^\s*find\b".to_string(),
        r"^\s*whoami\s*$".to_string(),
        r"^\s*date\s*$".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlong_pattern() {
        let mut cache = RegexCache::new();
        let long = "a".repeat(101);
        let list = PatternList::compile(&[long], &mut cache);
        assert!(list.is_empty());
    }

    #[test]
    fn rejects_redos_prone_pattern() {
        let mut cache = RegexCache::new();
        let list = PatternList::compile(&[r".*.*".to_string()], &mut cache);
        assert!(list.is_empty());
    }

    #[test]
    fn accepts_safe_pattern_and_matches() {
        let mut cache = RegexCache::new();
        let list = PatternList::compile(&[r"^\s*ls\b".to_string()], &mut cache);
        assert_eq!(list.len(), 1);
        assert_eq!(list.first_match("ls -la"), Some(r"^\s*ls\b"));
        assert_eq!(list.first_match("echo hi"), None);
    }

    #[test]
    fn regex_cache_deduplicates_compilation() {
        let mut cache = RegexCache::new();
        let a = cache.get_or_compile(r"^\s*ls\b").unwrap();
        let b = cache.get_or_compile(r"^\s*ls\b").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn bounded_prefix_truncates_long_input() {
        let long = "a".repeat(20_000);
        let prefix = bounded_prefix(&long);
        assert_eq!(prefix.len(), 10_000);
    }

    #[test]
    fn default_block_patterns_catch_rm_rf_root() {
        let set = PatternSet::default_builtin();
        assert!(set.block.first_match("rm -rf /").is_some());
    }
}
