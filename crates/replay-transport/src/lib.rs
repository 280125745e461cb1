//! OTLP/HTTP delivery of replayed batches.

mod preflight;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use replay_archive::SignalKind;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

pub use preflight::{preflight, PreflightError, PreflightProblem};

/// Default collector address when `OTLP_ENDPOINT` is unset.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:4318";
/// Upper bound on a single delivery attempt.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound on the preflight reachability check.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Collector address and credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Base URL of the OTLP/HTTP receiver, without a trailing slash.
    pub endpoint: String,
    /// Value sent verbatim in the `authorization` header.
    pub api_key: String,
    /// Timeout applied to each POST.
    pub timeout: Duration,
}

impl CollectorConfig {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout: SEND_TIMEOUT,
        }
    }

    /// Require an absolute http(s) endpoint.
    pub fn validate(&self) -> Result<(), TransportError> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(TransportError::Configuration(format!(
                "endpoint `{}` must start with http:// or https://",
                self.endpoint
            )));
        }
        if self.timeout.is_zero() {
            return Err(TransportError::Configuration(
                "timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Receiver URL for one signal kind.
    #[must_use]
    pub fn signal_url(&self, kind: SignalKind) -> String {
        format!("{}/v1/{}", self.endpoint, kind.as_str())
    }
}

impl std::fmt::Debug for CollectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Result of one delivery attempt. Never retried by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The collector answered 2xx or 3xx.
    Delivered { status: u16 },
    /// The collector answered 4xx or 5xx.
    Rejected { status: u16 },
    /// No HTTP response (connection refused, timeout, ...).
    Failed { reason: String },
}

impl DeliveryOutcome {
    /// Classify an HTTP status code.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        if status >= 400 {
            Self::Rejected { status }
        } else {
            Self::Delivered { status }
        }
    }

    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Errors surfaced while building a transport.
#[derive(Debug, Error, PartialEq)]
pub enum TransportError {
    /// Invalid endpoint, credential, or client settings.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Destination for rewritten batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Deliver one payload for `kind`.
    async fn send(&self, kind: SignalKind, payload: String) -> DeliveryOutcome;
}

/// Shared pointer helper for the scheduler.
pub type SharedSink = Arc<dyn BatchSink>;

/// Posts batches to `{endpoint}/v1/{kind}` with JSON and auth headers.
#[derive(Debug, Clone)]
pub struct HttpSink {
    config: CollectorConfig,
    client: Client,
}

impl HttpSink {
    /// Build the HTTP client for `config`.
    pub fn connect(config: CollectorConfig) -> Result<Self, TransportError> {
        config.validate()?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let mut auth = HeaderValue::from_str(&config.api_key).map_err(|_| {
            TransportError::Configuration("api key is not a valid header value".into())
        })?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(|err| TransportError::Configuration(err.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl BatchSink for HttpSink {
    async fn send(&self, kind: SignalKind, payload: String) -> DeliveryOutcome {
        let url = self.config.signal_url(kind);
        match self.client.post(&url).body(payload).send().await {
            Ok(response) => {
                let outcome = DeliveryOutcome::from_status(response.status().as_u16());
                if let DeliveryOutcome::Rejected { status } = outcome {
                    warn!(signal = %kind, status, "collector rejected batch");
                } else {
                    debug!(signal = %kind, url = %url, "batch delivered");
                }
                outcome
            }
            Err(err) => {
                warn!(signal = %kind, error = %err, "batch delivery failed");
                DeliveryOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Delivery captured by [`RecordingSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBatch {
    pub kind: SignalKind,
    pub payload: String,
}

/// In-memory sink for exercising the scheduler without a collector.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<RecordedBatch>>,
    scripted: Mutex<Vec<DeliveryOutcome>>,
}

impl RecordingSink {
    /// Queue the outcome returned by the next `send`; unscripted sends are delivered.
    pub async fn script_outcome(&self, outcome: DeliveryOutcome) {
        self.scripted.lock().await.push(outcome);
    }

    pub async fn sent(&self) -> Vec<RecordedBatch> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl BatchSink for RecordingSink {
    async fn send(&self, kind: SignalKind, payload: String) -> DeliveryOutcome {
        self.sent.lock().await.push(RecordedBatch { kind, payload });
        let mut scripted = self.scripted.lock().await;
        if scripted.is_empty() {
            return DeliveryOutcome::Delivered { status: 200 };
        }
        scripted.remove(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_trimmed() {
        let config = CollectorConfig::new("http://localhost:4318/", "key");
        assert_eq!(
            config.signal_url(SignalKind::Metrics),
            "http://localhost:4318/v1/metrics"
        );
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let config = CollectorConfig::new("localhost:4318", "key");
        assert!(matches!(
            config.validate(),
            Err(TransportError::Configuration(_))
        ));
    }

    #[test]
    fn classifies_status_codes() {
        assert!(DeliveryOutcome::from_status(200).is_delivered());
        assert!(DeliveryOutcome::from_status(302).is_delivered());
        assert_eq!(
            DeliveryOutcome::from_status(400),
            DeliveryOutcome::Rejected { status: 400 }
        );
        assert_eq!(
            DeliveryOutcome::from_status(503),
            DeliveryOutcome::Rejected { status: 503 }
        );
    }

    #[test]
    fn debug_output_hides_api_key() {
        let config = CollectorConfig::new("http://localhost:4318", "hdx-secret");
        assert!(!format!("{config:?}").contains("hdx-secret"));
    }

    #[tokio::test]
    async fn recording_sink_replays_scripted_outcomes() {
        let sink = RecordingSink::default();
        sink.script_outcome(DeliveryOutcome::Rejected { status: 429 })
            .await;
        let first = sink.send(SignalKind::Logs, "a".into()).await;
        let second = sink.send(SignalKind::Logs, "b".into()).await;
        assert_eq!(first, DeliveryOutcome::Rejected { status: 429 });
        assert!(second.is_delivered());
        assert_eq!(sink.sent().await.len(), 2);
    }
}
