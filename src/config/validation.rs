use crate::config::types::{Config, CrawlSettings, DepartmentConfig, ObjectStoreKind, StorageConfig};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_settings(&config.settings)?;
    validate_storage(&config.storage)?;

    if config.cache.dir.trim().is_empty() {
        return Err(ConfigError::Validation(
            "cache.dir cannot be empty".to_string(),
        ));
    }

    if config.departments.is_empty() {
        return Err(ConfigError::Validation(
            "at least one department must be configured".to_string(),
        ));
    }

    for (key, department) in &config.departments {
        validate_department(key, department)?;
    }

    Ok(())
}

/// Validates global crawl settings
fn validate_settings(settings: &CrawlSettings) -> Result<(), ConfigError> {
    if !settings.delay_between_requests.is_finite() || settings.delay_between_requests < 0.0 {
        return Err(ConfigError::Validation(format!(
            "delay-between-requests must be a non-negative number, got {}",
            settings.delay_between_requests
        )));
    }

    if settings.max_concurrent_downloads < 1 || settings.max_concurrent_downloads > 100 {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-downloads must be between 1 and 100, got {}",
            settings.max_concurrent_downloads
        )));
    }

    if settings.user_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    if settings.request_timeout == 0 {
        return Err(ConfigError::Validation(
            "request-timeout must be at least 1 second".to_string(),
        ));
    }

    if settings.max_retries == 0 {
        return Err(ConfigError::Validation(
            "max-retries must be at least 1".to_string(),
        ));
    }

    for pattern in &settings.allow_list {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

/// Validates storage configuration
fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
    if storage.local_path.trim().is_empty() {
        return Err(ConfigError::Validation(
            "storage.local-path cannot be empty".to_string(),
        ));
    }

    if !storage.local_enabled && storage.object_store.is_none() {
        return Err(ConfigError::Validation(
            "storage.local-enabled is false but no object-store is configured".to_string(),
        ));
    }

    if storage.max_file_size_mb == 0 {
        return Err(ConfigError::Validation(
            "storage.max-file-size-mb must be at least 1".to_string(),
        ));
    }

    if let Some(store) = &storage.object_store {
        match &store.endpoint {
            Some(endpoint) => {
                Url::parse(endpoint).map_err(|e| {
                    ConfigError::InvalidUrl(format!("Invalid object-store endpoint: {}", e))
                })?;
            }
            None if store.kind == ObjectStoreKind::Http => {
                return Err(ConfigError::Validation(
                    "storage.object-store.endpoint is required when kind = \"http\"".to_string(),
                ));
            }
            None => {}
        }

        if store.bucket.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.object-store.bucket cannot be empty".to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates one department, naming it in every error
fn validate_department(key: &str, department: &DepartmentConfig) -> Result<(), ConfigError> {
    let fail = |message: String| ConfigError::Department {
        department: key.to_string(),
        message,
    };

    if department.name.trim().is_empty() {
        return Err(fail("name cannot be empty".to_string()));
    }

    if department.seed_urls.is_empty() {
        return Err(fail("seed-urls must contain at least one URL".to_string()));
    }

    for seed in &department.seed_urls {
        let url = Url::parse(seed)
            .map_err(|e| fail(format!("invalid seed URL '{}': {}", seed, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(fail(format!("seed URL '{}' must use HTTP or HTTPS", seed)));
        }

        if url.host_str().is_none() {
            return Err(fail(format!("seed URL '{}' has no host", seed)));
        }
    }

    if department.max_pages == 0 {
        return Err(fail("max-pages must be at least 1".to_string()));
    }

    if department.time_limit == 0 {
        return Err(fail("time-limit must be at least 1 second".to_string()));
    }

    if let Some(types) = &department.document_types {
        if types.iter().any(|t| t.trim().is_empty()) {
            return Err(fail("document-types cannot contain empty entries".to_string()));
        }
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    let domain = pattern.strip_prefix("*.").unwrap_or(pattern);

    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain pattern '{}' is empty",
            pattern
        )));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
        || domain.contains("..")
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' is malformed",
            domain
        )));
    }

    Ok(())
}
