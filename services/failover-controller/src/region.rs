use health_check::ProbeTarget;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegionName(String);

impl RegionName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RegionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RegionName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Secondary => write!(f, "secondary"),
        }
    }
}

/// A deployed region as known to the controller. Built once from
/// configuration and never mutated; liveness lives with the region's
/// evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub name: RegionName,
    pub role: Role,
    pub target: ProbeTarget,
    pub tick_interval: Duration,
}

impl Region {
    /// Value the DNS record points at while this region is active.
    pub fn endpoint(&self) -> ActiveEndpoint {
        ActiveEndpoint {
            region: self.name.clone(),
            host: self.target.host().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveEndpoint {
    pub region: RegionName,
    pub host: String,
}

impl fmt::Display for ActiveEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.host, self.region)
    }
}
