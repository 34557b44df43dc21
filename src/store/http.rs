//! HTTP client for the ActivityWatch server (REST API v0).
//!
//! The store contract is synchronous: the publisher worker and the exporter
//! both run on plain threads. Requests go through an async `reqwest` client;
//! each call runs its whole request inside a private current-thread runtime.

use super::{Bucket, BucketMetadata, BucketStatus, EventStore, StoreError, StoredEvent};
use crate::collector::QueuedEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

/// Store connection settings.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Server host (default: 127.0.0.1)
    pub host: String,
    /// Server port (default: 5600)
    pub port: u16,
    /// Per-request timeout
    pub timeout: Duration,
}

impl StoreConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            timeout: Duration::from_secs(10),
        }
    }

    /// Base URL of the API.
    pub fn api_url(&self) -> String {
        format!("http://{}:{}/api/0", self.host, self.port)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 5600)
    }
}

#[derive(Serialize)]
struct CreateBucket<'a> {
    client: &'a str,
    #[serde(rename = "type")]
    bucket_type: &'a str,
    hostname: &'a str,
}

/// Blocking ActivityWatch client.
pub struct HttpStore {
    config: StoreConfig,
    base: Url,
    client: reqwest::Client,
    runtime: tokio::runtime::Runtime,
}

impl HttpStore {
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        let base = Url::parse(&config.api_url())
            .map_err(|e| StoreError::Client(format!("invalid store address: {e}")))?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StoreError::Client(format!("failed to create HTTP client: {e}")))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::Client(format!("failed to create runtime: {e}")))?;

        Ok(Self {
            config,
            base,
            client,
            runtime,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// `{base}/{segments...}` with each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Result<Url, StoreError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| StoreError::Client("store URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn send(request: RequestBuilder) -> Result<Response, StoreError> {
    request
        .send()
        .await
        .map_err(|e| StoreError::Unreachable(e.to_string()))
}

async fn server_error(response: Response) -> StoreError {
    let status = response.status().as_u16();
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    StoreError::Server { status, message }
}

/// Pass successful responses through, turn the rest into `Server` errors.
async fn check(response: Response) -> Result<Response, StoreError> {
    if response.status().is_success() {
        Ok(response)
    } else {
        Err(server_error(response).await)
    }
}

async fn read_json(response: Response) -> Result<Value, StoreError> {
    check(response)
        .await?
        .json::<Value>()
        .await
        .map_err(|e| StoreError::Serialization(e.to_string()))
}

fn iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, false)
}

impl EventStore for HttpStore {
    fn connect(&self) -> Result<(), StoreError> {
        let url = self.url(&["info"])?;
        self.runtime.block_on(async {
            check(send(self.client.get(url)).await?).await?;
            Ok::<_, StoreError>(())
        })
    }

    fn ensure_bucket(&self, bucket: &Bucket) -> Result<BucketStatus, StoreError> {
        let url = self.url(&["buckets", &bucket.id])?;
        let body = CreateBucket {
            client: &bucket.client,
            bucket_type: &bucket.bucket_type,
            hostname: &bucket.hostname,
        };

        self.runtime.block_on(async {
            let response = send(self.client.post(url).json(&body)).await?;
            match response.status() {
                s if s.is_success() => Ok(BucketStatus::Created),
                StatusCode::NOT_MODIFIED | StatusCode::CONFLICT => Ok(BucketStatus::AlreadyExists),
                _ => Err(server_error(response).await),
            }
        })
    }

    fn insert_events(&self, bucket_id: &str, events: &[QueuedEvent]) -> Result<(), StoreError> {
        let url = self.url(&["buckets", bucket_id, "events"])?;
        self.runtime.block_on(async {
            check(send(self.client.post(url).json(events)).await?).await?;
            Ok::<_, StoreError>(())
        })
    }

    fn list_buckets(&self) -> Result<BTreeMap<String, BucketMetadata>, StoreError> {
        // Trailing slash is part of the route.
        let url = self.url(&["buckets", ""])?;
        let value = self
            .runtime
            .block_on(async { read_json(send(self.client.get(url)).await?).await })?;
        serde_json::from_value(value).map_err(|e| StoreError::Serialization(e.to_string()))
    }

    fn query_events(
        &self,
        bucket_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let url = self.url(&["buckets", bucket_id, "events"])?;
        let params = [
            ("start", iso(start)),
            ("end", iso(end)),
            ("limit", "-1".to_string()),
        ];

        let value = self.runtime.block_on(async {
            let response = send(self.client.get(url).query(&params)).await?;
            if response.status() == StatusCode::NOT_FOUND {
                return Err(StoreError::UnknownBucket(bucket_id.to_string()));
            }
            read_json(response).await
        })?;

        match value {
            Value::Array(items) => Ok(items.iter().map(StoredEvent::from_value).collect()),
            other => Err(StoreError::Serialization(format!(
                "expected an event list, got {other}"
            ))),
        }
    }
}
