//! Domain extraction for the Classifier's Custom Rule Set domain gate
//! (§4.F): pulls hostnames out of `curl`/`wget`/`fetch`/`nc`/`ssh`/`scp`
//! invocations and embedded `http(s)://` URLs.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static URL_HOST: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"https?://([A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9-]+)+)").unwrap());

static NC_TARGET: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bnc\s+(?:-\S+\s+)*([A-Za-z0-9][A-Za-z0-9.-]*\.[A-Za-z]{2,}|\d{1,3}(?:\.\d{1,3}){3})\s+\d+").unwrap());

static SSH_SCP_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(?:ssh|scp)\s+(?:-\S+\s+)*(?:[\w.-]+@)?([A-Za-z0-9][A-Za-z0-9.-]*\.[A-Za-z]{2,})\b").unwrap()
});

static FETCH_BARE_HOST: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"\b(?:curl|wget|fetch)\b[^\n]*?\b([A-Za-z0-9](?:[A-Za-z0-9-]{0,61}[A-Za-z0-9])?(?:\.[A-Za-z0-9-]+)+)\b",
    )
    .unwrap()
});

/// Extract and dedupe every hostname referenced by `text`.
pub fn extract_domains(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();

    for regex in [&*URL_HOST, &*NC_TARGET, &*SSH_SCP_TARGET, &*FETCH_BARE_HOST] {
        for caps in regex.captures_iter(text) {
            if let Some(host) = caps.get(1) {
                let host = host.as_str().to_lowercase();
                if seen.insert(host.clone()) {
                    out.push(host);
                }
            }
        }
    }
    out
}

/// Exact-or-suffix match: `api.example.com` matches `example.com`.
pub fn domain_matches(host: &str, pattern: &str) -> bool {
    let pattern = pattern.to_lowercase();
    host == pattern || host.ends_with(&format!(".{pattern}"))
}

pub fn any_suffix_match(host: &str, patterns: &[String]) -> bool {
    patterns.iter().any(|p| domain_matches(host, p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_host_from_https_url() {
        let domains = extract_domains("curl https://api.example.com/v1/data");
        assert_eq!(domains, vec!["api.example.com".to_string()]);
    }

    #[test]
    fn extracts_host_from_ssh_target() {
        let domains = extract_domains("ssh user@host.internal.net");
        assert_eq!(domains, vec!["host.internal.net".to_string()]);
    }

    #[test]
    fn extracts_host_from_nc_target() {
        let domains = extract_domains("nc -v host.example.org 4444");
        assert_eq!(domains, vec!["host.example.org".to_string()]);
    }

    #[test]
    fn dedupes_repeated_hosts() {
        let domains =
            extract_domains("curl https://example.com/a && curl https://example.com/b");
        assert_eq!(domains, vec!["example.com".to_string()]);
    }

    #[test]
    fn suffix_match_rules() {
        assert!(domain_matches("api.example.com", "example.com"));
        assert!(domain_matches("example.com", "example.com"));
        assert!(!domain_matches("notexample.com", "example.com"));
    }

    #[test]
    fn no_domains_in_plain_command() {
        assert!(extract_domains("ls -la /tmp").is_empty());
    }
}
