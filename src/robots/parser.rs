//! robots.txt rule evaluation backed by the robotstxt crate

use robotstxt::DefaultMatcher;

/// Parsed robots.txt data
///
/// Holds the raw document; rules are evaluated on demand by
/// [`DefaultMatcher`], which is cheap relative to a network fetch.
#[derive(Debug, Clone, Default)]
pub struct ParsedRobots {
    content: String,
    allow_all: bool,
}

impl ParsedRobots {
    /// Creates a policy from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
        }
    }

    /// Creates a permissive policy, used whenever robots.txt is unavailable
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
        }
    }

    /// Whether this policy permits everything without consulting rules
    pub fn is_permissive(&self) -> bool {
        self.allow_all || self.content.trim().is_empty()
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - Absolute URL (or path) to check
    /// * `user_agent` - The full User-Agent header; only the product token
    ///   before the first `/` is matched against robots.txt groups
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.is_permissive() {
            return true;
        }

        let agent = user_agent.split('/').next().unwrap_or(user_agent).trim();
        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, agent, url)
    }
}
