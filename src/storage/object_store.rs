use crate::config::ObjectStoreConfig;
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder, StatusCode};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Metadata attached to every uploaded object
const SOURCE_METADATA: (&str, &str) = ("source", "govdoc-crawler");

/// Remote blob storage for downloaded documents
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `body` under `key`, replacing any existing object
    async fn put(&self, key: &str, body: Vec<u8>) -> StorageResult<()>;

    /// Whether an object exists under `key`
    async fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Human-readable address of `key`, recorded as the file path when
    /// nothing is kept locally
    fn locator(&self, key: &str) -> String;
}

fn store_error(key: &str, message: impl Into<String>) -> StorageError {
    StorageError::ObjectStore {
        key: key.to_string(),
        message: message.into(),
    }
}

/// Amazon S3, or an S3-compatible service such as MinIO, with SigV4-signed
/// requests
///
/// Credentials and the default region come from the standard AWS chain
/// (environment, profile, instance metadata). The SDK client is built on
/// first use. A custom endpoint switches to path-style addressing.
pub struct S3ObjectStore {
    bucket: String,
    region: Option<String>,
    endpoint: Option<String>,
    client: OnceCell<aws_sdk_s3::Client>,
}

impl S3ObjectStore {
    pub fn from_config(config: &ObjectStoreConfig) -> Self {
        Self {
            bucket: config.bucket.trim_matches('/').to_string(),
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
            client: OnceCell::new(),
        }
    }

    /// Wraps an already configured SDK client
    pub fn with_client(client: aws_sdk_s3::Client, bucket: &str) -> Self {
        Self {
            bucket: bucket.trim_matches('/').to_string(),
            region: None,
            endpoint: None,
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn client(&self) -> &aws_sdk_s3::Client {
        self.client
            .get_or_init(|| async move {
                let mut loader = aws_config::defaults(BehaviorVersion::latest());
                if let Some(region) = &self.region {
                    loader = loader.region(Region::new(region.clone()));
                }
                let shared = loader.load().await;

                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(endpoint) = &self.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }

                info!("S3 client ready for bucket {}", self.bucket);
                aws_sdk_s3::Client::from_conf(builder.build())
            })
            .await
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        // The SDK's standard retry mode covers throttling and 5xx responses
        self.client()
            .await
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/pdf")
            .metadata(SOURCE_METADATA.0, SOURCE_METADATA.1)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| store_error(key, format!("upload failed: {}", DisplayErrorContext(&e))))?;

        debug!("Uploaded s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let result = self
            .client()
            .await
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(SdkError::ServiceError(e)) if e.err().is_not_found() => Ok(false),
            Err(e) => Err(store_error(
                key,
                format!("existence check failed: {}", DisplayErrorContext(&e)),
            )),
        }
    }

    fn locator(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key.trim_start_matches('/'))
    }
}

/// Object store spoken to with plain HTTP `PUT` and `HEAD`
///
/// Objects live at `{endpoint}/{bucket}/{key}`. Suits gateways that accept
/// bearer tokens and endpoints that need no auth at all; S3 itself needs
/// [`S3ObjectStore`].
pub struct HttpObjectStore {
    client: Client,
    endpoint: String,
    bucket: String,
    token: Option<String>,
    max_attempts: u32,
    base_delay: Duration,
}

impl HttpObjectStore {
    pub fn new(client: Client, endpoint: &str, bucket: &str, token: Option<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.trim_matches('/').to_string(),
            token,
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Builds a store from configuration, reading the token from `token-env`
    ///
    /// Validation guarantees an endpoint for this kind of store.
    pub fn from_config(client: Client, config: &ObjectStoreConfig) -> Self {
        let token = config.token_env.as_deref().and_then(|name| {
            let token = std::env::var(name).ok();
            if token.is_none() {
                warn!("Object store token variable {} is not set", name);
            }
            token
        });
        let endpoint = config.endpoint.as_deref().unwrap_or_default();
        Self::new(client, endpoint, &config.bucket, token)
    }

    /// Overrides the upload retry schedule
    pub fn with_retries(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.base_delay = base_delay;
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key.trim_start_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, body: Vec<u8>) -> StorageResult<()> {
        let url = self.object_url(key);
        let mut last_error = String::new();

        for attempt in 0..self.max_attempts {
            let request = self
                .client
                .put(&url)
                .header(CONTENT_TYPE, "application/pdf")
                .header("x-amz-meta-source", SOURCE_METADATA.1)
                .body(body.clone());

            match self.authorized(request).send().await {
                Ok(response) if response.status().is_success() => {
                    debug!("Uploaded {}", url);
                    return Ok(());
                }
                // Auth and missing-bucket failures will not fix themselves
                Ok(response) if response.status().is_client_error() => {
                    return Err(store_error(key, format!("upload rejected: {}", response.status())));
                }
                Ok(response) => last_error = format!("upload failed: {}", response.status()),
                Err(e) => last_error = format!("upload failed: {}", e),
            }

            if attempt + 1 < self.max_attempts {
                let wait = self.base_delay * 2u32.saturating_pow(attempt);
                warn!(
                    "Upload attempt {} for {} failed, retrying in {:?}: {}",
                    attempt + 1,
                    key,
                    wait,
                    last_error
                );
                tokio::time::sleep(wait).await;
            }
        }

        Err(store_error(
            key,
            format!("{} after {} attempts", last_error, self.max_attempts),
        ))
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        let response = self
            .authorized(self.client.head(self.object_url(key)))
            .send()
            .await
            .map_err(|e| store_error(key, e.to_string()))?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(store_error(key, format!("existence check failed: {}", status))),
        }
    }

    fn locator(&self, key: &str) -> String {
        self.object_url(key)
    }
}
