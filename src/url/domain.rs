use url::Url;

/// Extracts the domain from a URL
///
/// Returns the lowercase host, followed by `:port` when the URL carries a
/// non-default port. Two URLs share a rate limit and a robots.txt exactly
/// when this value is equal.
///
/// # Arguments
///
/// * `url` - The URL to extract the domain from
///
/// # Returns
///
/// * `Some(String)` - The lowercase domain, with an explicit port if any
/// * `None` - If the URL has no host
///
/// # Examples
///
/// ```
/// use url::Url;
/// use govdoc_crawler::url::extract_domain;
///
/// let url = Url::parse("https://WWW.Labour.gov.hk/eng/").unwrap();
/// assert_eq!(extract_domain(&url), Some("www.labour.gov.hk".to_string()));
///
/// let url = Url::parse("http://127.0.0.1:8080/a.pdf").unwrap();
/// assert_eq!(extract_domain(&url), Some("127.0.0.1:8080".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    match url.port() {
        Some(port) => Some(format!("{}:{}", host, port)),
        None => Some(host),
    }
}

/// Parses `url` and extracts its domain; `None` for unparsable input
pub fn domain_of(url: &str) -> Option<String> {
    Url::parse(url).ok().as_ref().and_then(extract_domain)
}

/// Whether two URLs resolve to the same domain
pub fn same_domain(a: &Url, b: &Url) -> bool {
    match (extract_domain(a), extract_domain(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
