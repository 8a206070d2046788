/// Checks if a domain matches an allow-list pattern
///
/// `"gov.hk"` matches only `gov.hk`; `"*.gov.hk"` matches `gov.hk` itself and
/// any subdomain at any depth. Both sides are expected in lowercase.
///
/// # Examples
///
/// ```
/// use govdoc_crawler::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.gov.hk", "www.labour.gov.hk"));
/// assert!(matches_wildcard("*.gov.hk", "gov.hk"));
/// assert!(!matches_wildcard("*.gov.hk", "gov.hk.evil.com"));
/// assert!(!matches_wildcard("labour.gov.hk", "www.labour.gov.hk"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(base) => {
            candidate == base
                || (candidate.len() > base.len()
                    && candidate.ends_with(base)
                    && candidate.as_bytes()[candidate.len() - base.len() - 1] == b'.')
        }
        None => candidate == pattern,
    }
}

/// Checks a domain (possibly carrying a `:port`) against a list of patterns
pub fn matches_any<S: AsRef<str>>(patterns: &[S], domain: &str) -> bool {
    let host = strip_port(domain).to_lowercase();
    patterns
        .iter()
        .any(|p| matches_wildcard(&p.as_ref().to_lowercase(), &host))
}

fn strip_port(domain: &str) -> &str {
    // IPv6 literals keep their brackets; only a trailing numeric port is removed
    match domain.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => domain,
    }
}
