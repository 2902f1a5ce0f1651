//! HTTP client for the crowd backend REST API.
//!
//! Endpoints:
//! - `GET /api/temples` - latest reading of every temple
//! - `GET /api/temples/<key>` - latest reading of one temple
//! - `GET /api/history?temple=<key>&limit=<n>` - recent readings, newest-first
//!
//! Every response is wrapped in `{"success": bool, "data": ...}`. A
//! `success: false` body, a non-2xx status, a timeout and an undecodable body
//! are all reported as errors; callers treat them identically.

use crate::error::{RegistryError, RegistryResult};
use crate::fetcher::{HistoryFetcher, SnapshotFetcher};
use crowd_core::{EntityKey, Reading, ReadingPayload};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

/// Default timeout for API requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Response envelope used by every endpoint.
#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(default)]
    pub data: Option<T>,
    #[serde(default)]
    pub message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    /// Unwrap the payload, turning `success: false` into an error.
    pub fn into_data(self, endpoint: &str) -> RegistryResult<T> {
        if !self.success {
            let message = self
                .message
                .unwrap_or_else(|| "success=false".to_string());
            return Err(RegistryError::ApiFailure(format!("{endpoint}: {message}")));
        }
        self.data
            .ok_or_else(|| RegistryError::MalformedResponse(format!("{endpoint}: missing data")))
    }
}

/// Client for the crowd backend REST API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    /// HTTP client.
    client: Client,
    /// Base URL without trailing slash (e.g., "http://192.168.1.10:5090").
    base_url: String,
}

impl ApiClient {
    /// Create a new API client with the default timeout.
    pub fn new(base_url: impl Into<String>) -> RegistryResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Create a new API client with a custom timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> RegistryResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RegistryError::HttpClient(format!("Failed to create HTTP client: {e}")))?;

        let base_url: String = base_url.into();
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the latest reading of every temple.
    pub async fn fetch_temples(&self) -> RegistryResult<Vec<Reading>> {
        let url = format!("{}/api/temples", self.base_url);
        debug!(url = %url, "Fetching temple snapshot");

        let payloads: Vec<ReadingPayload> = self.get_envelope(&url, "temples").await?;

        info!(count = payloads.len(), "Fetched temple snapshot");
        Ok(payloads.into_iter().map(ReadingPayload::into_reading).collect())
    }

    /// Fetch the latest reading of a single temple.
    pub async fn fetch_one(&self, entity: &EntityKey) -> RegistryResult<Reading> {
        let url = format!(
            "{}/api/temples/{}",
            self.base_url,
            urlencoding::encode(entity.as_str())
        );
        debug!(url = %url, entity = %entity, "Fetching single temple");

        let payload: ReadingPayload = self.get_envelope(&url, "temple").await?;
        Ok(payload.into_reading())
    }

    /// Fetch up to `limit` recent readings of one temple, newest-first.
    pub async fn fetch_recent(&self, entity: &EntityKey, limit: usize) -> RegistryResult<Vec<Reading>> {
        let url = format!(
            "{}/api/history?temple={}&limit={}",
            self.base_url,
            urlencoding::encode(entity.as_str()),
            limit
        );
        debug!(url = %url, entity = %entity, limit, "Fetching history");

        let payloads: Vec<ReadingPayload> = self.get_envelope(&url, "history").await?;

        debug!(entity = %entity, count = payloads.len(), "Fetched history");
        Ok(payloads.into_iter().map(ReadingPayload::into_reading).collect())
    }

    async fn get_envelope<T: DeserializeOwned>(&self, url: &str, endpoint: &str) -> RegistryResult<T> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RegistryError::HttpClient(format!("HTTP {status}: {body}")));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| RegistryError::HttpClient(format!("Failed to read response: {e}")))?;

        let envelope: ApiEnvelope<T> = serde_json::from_slice(&body).map_err(|e| {
            RegistryError::MalformedResponse(format!("{endpoint}: {e}"))
        })?;

        envelope.into_data(endpoint)
    }
}

impl SnapshotFetcher for ApiClient {
    async fn fetch_all(&self) -> RegistryResult<Vec<Reading>> {
        self.fetch_temples().await
    }

    async fn fetch_entity(&self, entity: &EntityKey) -> RegistryResult<Reading> {
        self.fetch_one(entity).await
    }
}

impl HistoryFetcher for ApiClient {
    async fn fetch_history(&self, entity: &EntityKey, limit: usize) -> RegistryResult<Vec<Reading>> {
        self.fetch_recent(entity, limit).await
    }
}
