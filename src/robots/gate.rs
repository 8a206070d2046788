use crate::config::CrawlSettings;
use crate::robots::{fetch_robots, ParsedRobots};
use crate::url::matches_any;
use dashmap::DashMap;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;
use url::Url;

/// Answers "may this URL be fetched?" for discovery
///
/// Each domain's robots.txt is fetched at most once for the lifetime of the
/// gate. Concurrent first queries for the same domain wait on a single fetch.
pub struct PolicyGate {
    client: Client,
    user_agent: String,
    respect_robots: bool,
    allow_list: Vec<String>,
    policies: DashMap<String, Arc<OnceCell<ParsedRobots>>>,
}

impl PolicyGate {
    pub fn new(client: Client, settings: &CrawlSettings) -> Self {
        Self {
            client,
            user_agent: settings.user_agent.clone(),
            respect_robots: settings.respect_robots_txt,
            allow_list: settings.allow_list.clone(),
            policies: DashMap::new(),
        }
    }

    /// Checks whether `url` on `domain` may be fetched
    ///
    /// # Arguments
    ///
    /// * `domain` - Domain as returned by [`crate::url::extract_domain`]
    /// * `url` - The absolute URL about to be fetched
    ///
    /// # Returns
    ///
    /// `true` for allow-listed domains, when robots.txt handling is disabled,
    /// or when the domain's robots.txt permits the URL (or could not be read)
    pub async fn allowed(&self, domain: &str, url: &str) -> bool {
        if !self.respect_robots || matches_any(&self.allow_list, domain) {
            return true;
        }

        let policy = self.policy_for(domain, url).await;
        let allowed = policy.is_allowed(url, &self.user_agent);
        if !allowed {
            debug!("robots.txt disallows {}", url);
        }
        allowed
    }

    /// Number of domains whose policy has been resolved
    pub fn cached_domains(&self) -> usize {
        self.policies
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    async fn policy_for(&self, domain: &str, url: &str) -> ParsedRobots {
        let cell = self
            .policies
            .entry(domain.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let scheme = Url::parse(url)
            .map(|u| u.scheme().to_string())
            .unwrap_or_else(|_| "https".to_string());
        let robots_url = format!("{}://{}/robots.txt", scheme, domain);

        cell.get_or_init(|| async move {
            debug!("Fetching {}", robots_url);
            fetch_robots(&self.client, &robots_url).await
        })
        .await
        .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn settings() -> CrawlSettings {
        CrawlSettings {
            allow_list: vec!["*.gov.hk".to_string()],
            ..CrawlSettings::default()
        }
    }

    fn domain_of(server: &MockServer) -> String {
        server.uri().trim_start_matches("http://").to_string()
    }

    #[tokio::test]
    async fn test_allow_list_bypasses_robots() {
        let gate = PolicyGate::new(Client::new(), &settings());
        assert!(
            gate.allowed("www.labour.gov.hk", "https://www.labour.gov.hk/private/")
                .await
        );
        assert_eq!(gate.cached_domains(), 0);
    }

    #[tokio::test]
    async fn test_disallowed_path() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let gate = PolicyGate::new(Client::new(), &settings());
        let domain = domain_of(&server);

        let private = format!("{}/private/a.html", server.uri());
        let public = format!("{}/public/a.html", server.uri());
        assert!(!gate.allowed(&domain, &private).await);
        assert!(gate.allowed(&domain, &public).await);
        assert!(!gate.allowed(&domain, &private).await);
    }

    #[tokio::test]
    async fn test_missing_robots_allows_and_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let gate = PolicyGate::new(Client::new(), &settings());
        let domain = domain_of(&server);
        let url = format!("{}/anything", server.uri());

        assert!(gate.allowed(&domain, &url).await);
        assert!(gate.allowed(&domain, &url).await);
        assert_eq!(gate.cached_domains(), 1);
    }

    #[tokio::test]
    async fn test_respect_disabled_never_fetches() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /"))
            .expect(0)
            .mount(&server)
            .await;

        let mut settings = settings();
        settings.respect_robots_txt = false;
        let gate = PolicyGate::new(Client::new(), &settings);
        let url = format!("{}/page", server.uri());

        assert!(gate.allowed(&domain_of(&server), &url).await);
    }
}
