//! cvg-transport-http
//!
//! `POST {base_url}{endpoint}` with the token in `Idempotency-Key`.
//!
//! Status mapping:
//! - 2xx → `Accepted`, or `Replayed` when the server sets
//!   `Idempotent-Replayed: true`
//! - 408, 425, 429, 5xx → `Unavailable`
//! - any other status → `Rejected` with the response text
//!
//! A 2xx body that is empty or not JSON still confirms the write; the receipt
//! is `null`.
//!
//! The bearer key is resolved by the caller and passed in; do not log it.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use cvg_config::{resolve_transport_secret, TransportConfig};
use cvg_execution::{DeliveryRequest, DeliveryResponse, Transport, TransportError};
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const REPLAYED_HEADER: &str = "Idempotent-Replayed";

/// Longest response text carried into a failure reason.
const MAX_REASON_LEN: usize = 512;

#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("base_url", &self.base_url)
            .field("authenticated", &self.api_key.is_some())
            .finish()
    }
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    /// Build from config, reading the bearer key from the env var it names.
    pub fn from_config(cfg: &TransportConfig) -> Result<Self> {
        let secret = resolve_transport_secret(cfg)?;
        Self::new(
            cfg.base_url.clone(),
            Duration::from_millis(cfg.timeout_ms),
            secret.map(|s| s.api_key),
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, req: DeliveryRequest) -> Result<DeliveryResponse, TransportError> {
        let url = self.url(&req.endpoint);
        let mut builder = self
            .http
            .post(&url)
            .header(IDEMPOTENCY_KEY_HEADER, &req.token)
            .json(&req.body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let resp = builder.send().await.map_err(map_reqwest_error)?;
        let status = resp.status();
        debug!(url = %url, token = %req.token, status = status.as_u16(), "http delivery");

        if status.is_success() {
            let replayed = resp
                .headers()
                .get(REPLAYED_HEADER)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"));
            let bytes = resp.bytes().await.map_err(map_reqwest_error)?;
            let receipt = serde_json::from_slice::<Value>(&bytes).unwrap_or(Value::Null);
            return Ok(if replayed {
                DeliveryResponse::Replayed { receipt }
            } else {
                DeliveryResponse::Accepted { receipt }
            });
        }

        let text = resp.text().await.unwrap_or_default();
        let reason = failure_reason(status, &text);
        if is_retryable_status(status) {
            Ok(DeliveryResponse::Unavailable { reason })
        } else {
            Ok(DeliveryResponse::Rejected { reason })
        }
    }
}

pub fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429) || status.is_server_error()
}

fn failure_reason(status: StatusCode, text: &str) -> String {
    let text = text.trim();
    if text.is_empty() {
        return format!("http {}", status.as_u16());
    }
    let mut cut = text.len().min(MAX_REASON_LEN);
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("http {}: {}", status.as_u16(), &text[..cut])
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_decode() || e.is_body() {
        TransportError::Decode(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}
