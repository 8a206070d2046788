//! Domain policy gate
//!
//! Decides whether a URL may be fetched. Allow-listed government domains are
//! always permitted; every other domain is checked against its robots.txt,
//! which is fetched at most once per process and cached, failures included.

mod gate;
mod parser;

pub use gate::PolicyGate;
pub use parser::ParsedRobots;

use reqwest::Client;
use tracing::debug;

/// Fetches and parses robots.txt from `robots_url`
///
/// Any failure (network error, non-2xx status, unreadable body) yields an
/// allow-all policy; it is never escalated to the caller.
///
/// # Arguments
///
/// * `client` - The HTTP client to use
/// * `robots_url` - Absolute URL of the robots.txt document
pub async fn fetch_robots(client: &Client, robots_url: &str) -> ParsedRobots {
    let response = match client.get(robots_url).send().await {
        Ok(response) => response,
        Err(e) => {
            debug!("robots.txt fetch failed for {}: {}", robots_url, e);
            return ParsedRobots::allow_all();
        }
    };

    if !response.status().is_success() {
        debug!(
            "robots.txt at {} returned HTTP {}, allowing all",
            robots_url,
            response.status()
        );
        return ParsedRobots::allow_all();
    }

    match response.text().await {
        Ok(body) => ParsedRobots::from_content(&body),
        Err(e) => {
            debug!("robots.txt body unreadable at {}: {}", robots_url, e);
            ParsedRobots::allow_all()
        }
    }
}
