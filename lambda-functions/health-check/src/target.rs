use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TargetError {
    #[error("target host must not be empty")]
    EmptyHost,
    #[error("target host `{0}` must be a bare hostname without scheme or path")]
    MalformedHost(String),
    #[error("override host header `{0}` is not a valid header value")]
    InvalidOverride(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Https,
    Http,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Https => write!(f, "https"),
            Self::Http => write!(f, "http"),
        }
    }
}

/// Where a probe connects (`host`) and which virtual host it claims to be
/// talking to (`override_host_header`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeTarget {
    host: String,
    path: String,
    override_host_header: Option<String>,
}

impl ProbeTarget {
    pub fn new(
        host: impl Into<String>,
        path: impl Into<String>,
        override_host_header: Option<String>,
    ) -> Result<Self, TargetError> {
        let host = host.into().trim().to_string();
        validate_host(&host)?;

        let override_host_header = match override_host_header {
            Some(value) if value.trim().is_empty() => None,
            Some(value) => {
                let value = value.trim().to_string();
                if HeaderValue::from_str(&value).is_err() || value.contains(char::is_whitespace) {
                    return Err(TargetError::InvalidOverride(value));
                }
                Some(value)
            }
            None => None,
        };

        Ok(Self {
            host,
            path: normalize_path(path.into()),
            override_host_header,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn override_host_header(&self) -> Option<&str> {
        self.override_host_header.as_deref()
    }

    pub fn url(&self, scheme: Scheme) -> String {
        format!("{}://{}{}", scheme, self.host, self.path)
    }
}

impl fmt::Display for ProbeTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.override_host_header {
            Some(host_header) => write!(f, "{}{} (Host: {})", self.host, self.path, host_header),
            None => write!(f, "{}{}", self.host, self.path),
        }
    }
}

fn validate_host(host: &str) -> Result<(), TargetError> {
    if host.is_empty() {
        return Err(TargetError::EmptyHost);
    }

    let malformed = host.contains("://")
        || host.contains('/')
        || host.contains(char::is_whitespace)
        || host.starts_with(':')
        || reqwest::Url::parse(&format!("https://{}/", host))
            .map(|url| url.host_str().is_none())
            .unwrap_or(true);

    if malformed {
        return Err(TargetError::MalformedHost(host.to_string()));
    }
    Ok(())
}

fn normalize_path(path: String) -> String {
    let path = path.trim();
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}
