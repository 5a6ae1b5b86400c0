//! Function-URL front for a single probe, so a managed DNS health checker
//! that cannot send its own `Host` header can still test a backend under its
//! public identity.

use crate::probe::{HealthProbe, ProbeError, ProbeResult, ProbeSettings, DEFAULT_PROBE_TIMEOUT};
use crate::target::{ProbeTarget, TargetError};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const HEALTH_ENDPOINT_HOST: &str = "HEALTH_ENDPOINT_HOST";
pub const HEALTH_ENDPOINT_PATH: &str = "HEALTH_ENDPOINT_PATH";
pub const OVERRIDE_HOST_HEADER: &str = "OVERRIDE_HOST_HEADER";
pub const HEALTH_PROBE_TIMEOUT_SECS: &str = "HEALTH_PROBE_TIMEOUT_SECS";

#[derive(Debug, Error)]
pub enum ProxyConfigError {
    #[error("environment variable {0} is required")]
    MissingVar(&'static str),
    #[error("invalid probe timeout `{0}`")]
    InvalidTimeout(String),
    #[error(transparent)]
    Target(#[from] TargetError),
    #[error(transparent)]
    Probe(#[from] ProbeError),
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProxyResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl ProxyResponse {
    pub fn from_result(result: &ProbeResult) -> Self {
        if result.is_success() {
            return Self {
                status_code: 204,
                body: None,
            };
        }

        Self {
            status_code: 503,
            body: Some(serde_json::json!({ "error": "Health check failed" }).to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProxySettings {
    pub target: ProbeTarget,
    pub timeout: Duration,
}

impl ProxySettings {
    pub fn from_env() -> Result<Self, ProxyConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ProxyConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let host = lookup(HEALTH_ENDPOINT_HOST)
            .filter(|host| !host.trim().is_empty())
            .ok_or(ProxyConfigError::MissingVar(HEALTH_ENDPOINT_HOST))?;
        let path = lookup(HEALTH_ENDPOINT_PATH).unwrap_or_else(|| "/".to_string());
        let override_host_header = lookup(OVERRIDE_HOST_HEADER);

        let timeout = match lookup(HEALTH_PROBE_TIMEOUT_SECS) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => return Err(ProxyConfigError::InvalidTimeout(raw)),
            },
            None => DEFAULT_PROBE_TIMEOUT,
        };

        Ok(Self {
            target: ProbeTarget::new(host, path, override_host_header)?,
            timeout,
        })
    }
}

pub struct HealthCheckProxy {
    probe: HealthProbe,
    target: ProbeTarget,
}

impl HealthCheckProxy {
    pub fn new(settings: ProxySettings) -> Result<Self, ProxyConfigError> {
        let probe = HealthProbe::new(ProbeSettings::builder().timeout(settings.timeout).build())?;
        Ok(Self {
            probe,
            target: settings.target,
        })
    }

    pub fn target(&self) -> &ProbeTarget {
        &self.target
    }

    pub async fn handle(&self) -> ProxyResponse {
        info!(endpoint = %self.target, "Checking if endpoint is alive");

        let result = self.probe.probe(&self.target).await;
        match &result.failure {
            Some(failure) => warn!(
                endpoint = %self.target,
                failure = %failure,
                status = result.status,
                "Health check on endpoint failed"
            ),
            None => info!(endpoint = %self.target, "Health check succeeded"),
        }

        ProxyResponse::from_result(&result)
    }
}
