//! Integration client
//!
//! Fetches the extended payload first and falls back to the legacy payload
//! when the extended one is empty, unreachable, or malformed. The caller
//! always receives extended entries; shapes are never mixed in one result.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument};

use super::{wrap_legacy, EXTENDED_PATH, LEGACY_PATH};
use crate::model::StorageLoadExtendedEntry;

// =============================================================================
// Errors
// =============================================================================

/// A body that does not conform to the schema it was checked against
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("payload does not match the {schema} schema: {reason}")]
pub struct ShapeMismatch {
    pub schema: &'static str,
    pub reason: String,
}

/// Errors surfaced by [`LoadClient`]
#[derive(Error, Debug)]
pub enum ClientError {
    /// Request could not be sent or the body not read
    #[error("request to {path} failed: {source}")]
    Http {
        path: String,
        #[source]
        source: reqwest::Error,
    },

    /// Server answered with a non-success status
    #[error("{path} returned HTTP {status}")]
    Status { path: String, status: u16 },

    /// Legacy payload was malformed
    #[error(transparent)]
    Shape(#[from] ShapeMismatch),

    /// Client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Build(String),
}

// =============================================================================
// Schema validation
// =============================================================================

/// Result of validating a response body against a declared schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadShape {
    Extended(Vec<StorageLoadExtendedEntry>),
    Legacy(Vec<i64>),
    Empty,
}

impl PayloadShape {
    /// Normalize to extended entries; legacy loads carry no health fields.
    pub fn into_entries(self) -> Vec<StorageLoadExtendedEntry> {
        match self {
            PayloadShape::Extended(entries) => entries,
            PayloadShape::Legacy(loads) => wrap_legacy(&loads),
            PayloadShape::Empty => Vec::new(),
        }
    }
}

/// Extended element schema. `load` is required and numeric; the health
/// fields are kept only when they carry the right JSON type.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExtendedElement {
    #[serde(deserialize_with = "required_number")]
    load: i64,
    #[serde(default, deserialize_with = "optional_number")]
    temperature: Option<i32>,
    #[serde(default, deserialize_with = "optional_string")]
    overall_status: Option<String>,
    #[serde(default, deserialize_with = "optional_bool")]
    healthy: Option<bool>,
}

impl From<ExtendedElement> for StorageLoadExtendedEntry {
    fn from(e: ExtendedElement) -> Self {
        Self {
            load: e.load,
            temperature: e.temperature,
            overall_status: e.overall_status,
            healthy: e.healthy,
        }
    }
}

fn number_of(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f.round() as i64))
}

fn required_number<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(d)?;
    number_of(&value).ok_or_else(|| serde::de::Error::custom(format!("expected a number, got {}", value)))
}

fn optional_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i32>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(number_of(&value).and_then(|n| i32::try_from(n).ok()))
}

fn optional_string<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn optional_bool<'de, D: Deserializer<'de>>(d: D) -> Result<Option<bool>, D::Error> {
    Ok(Value::deserialize(d)?.as_bool())
}

/// Validate a body against the extended schema.
pub fn validate_extended(body: &str) -> Result<PayloadShape, ShapeMismatch> {
    if body.trim().is_empty() {
        return Ok(PayloadShape::Empty);
    }
    let elements: Vec<ExtendedElement> = serde_json::from_str(body).map_err(|e| ShapeMismatch {
        schema: "extended",
        reason: e.to_string(),
    })?;
    Ok(PayloadShape::Extended(elements.into_iter().map(Into::into).collect()))
}

/// Validate a body against the legacy schema.
pub fn validate_legacy(body: &str) -> Result<PayloadShape, ShapeMismatch> {
    if body.trim().is_empty() {
        return Ok(PayloadShape::Empty);
    }
    let mismatch = |reason: String| ShapeMismatch {
        schema: "legacy",
        reason,
    };
    let elements: Vec<Value> = serde_json::from_str(body).map_err(|e| mismatch(e.to_string()))?;
    let loads = elements
        .iter()
        .map(|v| number_of(v).ok_or_else(|| mismatch(format!("expected a number, got {}", v))))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(PayloadShape::Legacy(loads))
}

// =============================================================================
// Fetching
// =============================================================================

/// Retrieves a raw response body for an endpoint path.
#[async_trait]
pub trait PayloadFetcher: Send + Sync {
    async fn fetch(&self, path: &str) -> Result<String, ClientError>;
}

/// [`PayloadFetcher`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::Build(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PayloadFetcher for HttpFetcher {
    async fn fetch(&self, path: &str) -> Result<String, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let http_error = |source| ClientError::Http {
            path: path.to_string(),
            source,
        };

        let response = self.client.get(&url).send().await.map_err(http_error)?;
        if !response.status().is_success() {
            return Err(ClientError::Status {
                path: path.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.text().await.map_err(http_error)
    }
}

/// Consumer-side adapter negotiating between the two payload shapes
#[derive(Debug, Clone)]
pub struct LoadClient<F = HttpFetcher> {
    fetcher: F,
}

impl LoadClient<HttpFetcher> {
    /// Client for a server at `base_url` (e.g. `http://localhost:3001`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        Ok(Self::with_fetcher(HttpFetcher::new(base_url, timeout)?))
    }
}

impl<F: PayloadFetcher> LoadClient<F> {
    pub fn with_fetcher(fetcher: F) -> Self {
        Self { fetcher }
    }

    /// Storage load entries, from the extended endpoint when it yields a
    /// valid non-empty payload, otherwise from the legacy endpoint.
    #[instrument(skip(self))]
    pub async fn fetch_storage_load(&self) -> Result<Vec<StorageLoadExtendedEntry>, ClientError> {
        match self.fetcher.fetch(EXTENDED_PATH).await {
            Ok(body) => match validate_extended(&body) {
                Ok(PayloadShape::Extended(entries)) => return Ok(entries),
                Ok(_) => debug!("Extended payload empty, falling back to legacy"),
                Err(mismatch) => debug!("{}, falling back to legacy", mismatch),
            },
            Err(e) => debug!("Extended endpoint unavailable ({}), falling back to legacy", e),
        }

        let body = self.fetcher.fetch(LEGACY_PATH).await?;
        Ok(validate_legacy(&body)?.into_entries())
    }
}
