use crate::target::{ProbeTarget, Scheme};
use async_trait::async_trait;
use bon::Builder;
use chrono::{DateTime, Utc};
use reqwest::header::HOST;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time;
use tracing::{debug, warn};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_USER_AGENT: &str = "failover-health-probe/0.1";

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to build probe client: {0}")]
    Client(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeFailure {
    Timeout,
    Tls(String),
    Connect(String),
    Status(u16),
    Request(String),
}

impl fmt::Display for ProbeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Tls(detail) => write!(f, "tls error: {}", detail),
            Self::Connect(detail) => write!(f, "connection error: {}", detail),
            Self::Status(code) => write!(f, "unhealthy status {}", code),
            Self::Request(detail) => write!(f, "request error: {}", detail),
        }
    }
}

/// Outcome of a single probe. Every failure mode ends up here; probing never
/// returns an error.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeResult {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency: Duration,
    pub status: Option<u16>,
    pub failure: Option<ProbeFailure>,
}

impl ProbeResult {
    pub fn passed(timestamp: DateTime<Utc>, status: u16, latency: Duration) -> Self {
        Self {
            timestamp,
            success: true,
            latency,
            status: Some(status),
            failure: None,
        }
    }

    pub fn failed(
        timestamp: DateTime<Utc>,
        failure: ProbeFailure,
        latency: Duration,
    ) -> Self {
        let status = match failure {
            ProbeFailure::Status(code) => Some(code),
            _ => None,
        };
        Self {
            timestamp,
            success: false,
            latency,
            status,
            failure: Some(failure),
        }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }
}

pub fn is_healthy_status(status: u16) -> bool {
    (200..400).contains(&status)
}

#[derive(Debug, Clone, Builder)]
pub struct ProbeSettings {
    #[builder(default = DEFAULT_PROBE_TIMEOUT)]
    pub timeout: Duration,

    #[builder(default)]
    pub scheme: Scheme,

    #[builder(into, default = String::from(DEFAULT_USER_AGENT))]
    pub user_agent: String,

    /// Trusted in addition to the bundled web PKI roots.
    #[builder(default)]
    pub root_certificates: Vec<reqwest::Certificate>,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult;
}

#[derive(Debug, Clone)]
pub struct HealthProbe {
    client: reqwest::Client,
    settings: ProbeSettings,
}

impl HealthProbe {
    pub fn new(settings: ProbeSettings) -> Result<Self, ProbeError> {
        // HTTP/1.1 keeps a caller supplied Host header on the wire as-is.
        // Redirects are not followed so a 3xx counts as a healthy answer from
        // the target itself, and a fresh connection is opened for every probe.
        let mut builder = reqwest::Client::builder()
            .http1_only()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .pool_max_idle_per_host(0)
            .user_agent(settings.user_agent.clone());
        for certificate in &settings.root_certificates {
            builder = builder.add_root_certificate(certificate.clone());
        }
        let client = builder.build()?;

        Ok(Self { client, settings })
    }

    pub fn settings(&self) -> &ProbeSettings {
        &self.settings
    }

    pub async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let timestamp = Utc::now();
        let started = Instant::now();

        let outcome = time::timeout(self.settings.timeout, self.exchange(target)).await;
        let latency = started.elapsed();

        let result = match outcome {
            Ok(Ok(status)) if is_healthy_status(status) => {
                ProbeResult::passed(timestamp, status, latency)
            }
            Ok(Ok(status)) => ProbeResult::failed(timestamp, ProbeFailure::Status(status), latency),
            Ok(Err(failure)) => ProbeResult::failed(timestamp, failure, latency),
            Err(_) => ProbeResult::failed(timestamp, ProbeFailure::Timeout, latency),
        };

        match &result.failure {
            Some(failure) => warn!(
                endpoint = %target,
                failure = %failure,
                latency_ms = latency.as_millis() as u64,
                "Health probe failed"
            ),
            None => debug!(
                endpoint = %target,
                status = result.status,
                latency_ms = latency.as_millis() as u64,
                "Health probe succeeded"
            ),
        }

        result
    }

    async fn exchange(&self, target: &ProbeTarget) -> Result<u16, ProbeFailure> {
        let mut request = self.client.get(target.url(self.settings.scheme));
        if let Some(host_header) = target.override_host_header() {
            request = request.header(HOST, host_header);
        }

        let response = request.send().await.map_err(classify)?;
        let status = response.status().as_u16();

        // The response only counts once the body has been read in full.
        response.bytes().await.map_err(classify)?;

        Ok(status)
    }
}

#[async_trait]
impl Probe for HealthProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        HealthProbe::probe(self, target).await
    }
}

fn classify(error: reqwest::Error) -> ProbeFailure {
    if error.is_timeout() {
        return ProbeFailure::Timeout;
    }

    let detail = error_chain(&error);
    if looks_like_tls(&detail) {
        ProbeFailure::Tls(detail)
    } else if error.is_connect() {
        ProbeFailure::Connect(detail)
    } else {
        ProbeFailure::Request(detail)
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut parts = vec![error.to_string()];
    let mut source = error.source();
    while let Some(cause) = source {
        parts.push(cause.to_string());
        source = cause.source();
    }
    parts.join(": ")
}

// reqwest does not expose a TLS error kind, so fall back to the message chain.
fn looks_like_tls(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    ["certificate", "tls", "handshake", "invalid peer"]
        .iter()
        .any(|marker| detail.contains(marker))
}
