use crate::director::FailbackPolicy;
use crate::liveness::{Thresholds, DEFAULT_HEALTHY_THRESHOLD, DEFAULT_UNHEALTHY_THRESHOLD};
use crate::region::{Region, RegionName, Role};
use health_check::{ProbeTarget, Scheme, TargetError};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("expected exactly two regions, found {0}")]
    RegionCount(usize),
    #[error("region `{0}` has no role")]
    MissingRole(String),
    #[error("more than one region has role {0}")]
    DuplicateRole(Role),
    #[error("region name `{0}` is used more than once")]
    DuplicateName(String),
    #[error("region name must not be empty")]
    EmptyName,
    #[error("region `{region}` has an invalid endpoint: {source}")]
    InvalidTarget { region: String, source: TargetError },
    #[error("{0} must be at least 1")]
    ZeroValue(&'static str),
    #[error("region `{region}`: probe timeout {timeout:?} exceeds tick interval {interval:?}")]
    TimeoutExceedsInterval {
        region: String,
        timeout: Duration,
        interval: Duration,
    },
    #[error("[dns] {0} must not be empty")]
    EmptyDnsField(&'static str),
    #[error("region `{region}`: host `{host}` cannot be a CNAME target (no ports or IP addresses)")]
    InvalidDnsTarget { region: String, host: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControllerConfig {
    #[serde(default = "default_healthy_threshold")]
    pub healthy_threshold: u32,
    #[serde(default = "default_unhealthy_threshold")]
    pub unhealthy_threshold: u32,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub sticky_failback: bool,
    #[serde(default)]
    pub min_failback_interval_secs: u64,
    #[serde(default)]
    pub probe_scheme: Scheme,
    #[serde(default)]
    pub admin_addr: Option<SocketAddr>,
    #[serde(default)]
    pub publish_retry: RetryConfig,
    #[serde(default)]
    pub dns: Option<DnsConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub regions: Vec<RegionConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    pub name: String,
    pub host: String,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default)]
    pub override_host_header: Option<String>,
    pub role: Option<Role>,
    #[serde(default)]
    pub tick_interval_secs: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DnsConfig {
    pub hosted_zone_id: String,
    pub record_name: String,
    #[serde(default = "default_ttl")]
    pub ttl: i64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            namespace: default_namespace(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_alert_after")]
    pub alert_after: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            alert_after: default_alert_after(),
        }
    }
}

/// The validated region pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Topology {
    pub primary: Region,
    pub secondary: Region,
}

impl Topology {
    pub fn regions(&self) -> [&Region; 2] {
        [&self.primary, &self.secondary]
    }

    pub fn get(&self, name: &RegionName) -> Option<&Region> {
        self.regions().into_iter().find(|region| &region.name == name)
    }
}

fn default_healthy_threshold() -> u32 {
    DEFAULT_HEALTHY_THRESHOLD
}

fn default_unhealthy_threshold() -> u32 {
    DEFAULT_UNHEALTHY_THRESHOLD
}

fn default_probe_timeout_secs() -> u64 {
    5
}

fn default_tick_interval_secs() -> u64 {
    30
}

fn default_path() -> String {
    "/".to_string()
}

fn default_ttl() -> i64 {
    60
}

fn default_namespace() -> String {
    "DisasterRecovery".to_string()
}

/// A CNAME value must be a bare DNS name.
fn is_cname_target(host: &str) -> bool {
    !host.contains(':') && !host.starts_with('[') && host.parse::<IpAddr>().is_err()
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_alert_after() -> u32 {
    5
}

impl ControllerConfig {
    /// Reads, parses and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.healthy_threshold == 0 {
            return Err(ConfigError::ZeroValue("healthy_threshold"));
        }
        if self.unhealthy_threshold == 0 {
            return Err(ConfigError::ZeroValue("unhealthy_threshold"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(ConfigError::ZeroValue("probe_timeout_secs"));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::ZeroValue("tick_interval_secs"));
        }
        if self.publish_retry.base_delay_ms == 0 {
            return Err(ConfigError::ZeroValue("publish_retry.base_delay_ms"));
        }
        if let Some(dns) = &self.dns {
            if dns.hosted_zone_id.trim().is_empty() {
                return Err(ConfigError::EmptyDnsField("hosted_zone_id"));
            }
            if dns.record_name.trim().is_empty() {
                return Err(ConfigError::EmptyDnsField("record_name"));
            }
            if dns.ttl <= 0 {
                return Err(ConfigError::ZeroValue("dns.ttl"));
            }
        }

        let topology = self.topology()?;
        if self.dns.is_some() {
            for region in topology.regions() {
                let host = region.target.host();
                if !is_cname_target(host) {
                    return Err(ConfigError::InvalidDnsTarget {
                        region: region.name.to_string(),
                        host: host.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            healthy: self.healthy_threshold,
            unhealthy: self.unhealthy_threshold,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn failback_policy(&self) -> FailbackPolicy {
        FailbackPolicy {
            sticky: self.sticky_failback,
            min_failback_interval: Duration::from_secs(self.min_failback_interval_secs),
        }
    }

    pub fn topology(&self) -> Result<Topology, ConfigError> {
        if self.regions.len() != 2 {
            return Err(ConfigError::RegionCount(self.regions.len()));
        }

        let mut names = HashSet::new();
        let mut primary = None;
        let mut secondary = None;

        for region_config in &self.regions {
            let region = self.build_region(region_config)?;
            if !names.insert(region.name.clone()) {
                return Err(ConfigError::DuplicateName(region.name.to_string()));
            }

            let slot = match region.role {
                Role::Primary => &mut primary,
                Role::Secondary => &mut secondary,
            };
            if slot.is_some() {
                return Err(ConfigError::DuplicateRole(region.role));
            }
            *slot = Some(region);
        }

        // Two distinct roles across two regions means both slots are filled.
        match (primary, secondary) {
            (Some(primary), Some(secondary)) => Ok(Topology { primary, secondary }),
            (None, _) => Err(ConfigError::DuplicateRole(Role::Secondary)),
            (_, None) => Err(ConfigError::DuplicateRole(Role::Primary)),
        }
    }

    fn build_region(&self, config: &RegionConfig) -> Result<Region, ConfigError> {
        let name = config.name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        let role = config
            .role
            .ok_or_else(|| ConfigError::MissingRole(name.to_string()))?;

        let target = ProbeTarget::new(
            config.host.clone(),
            config.path.clone(),
            config.override_host_header.clone(),
        )
        .map_err(|source| ConfigError::InvalidTarget {
            region: name.to_string(),
            source,
        })?;

        let interval_secs = config.tick_interval_secs.unwrap_or(self.tick_interval_secs);
        if interval_secs == 0 {
            return Err(ConfigError::ZeroValue("regions.tick_interval_secs"));
        }
        let tick_interval = Duration::from_secs(interval_secs);
        if self.probe_timeout() > tick_interval {
            return Err(ConfigError::TimeoutExceedsInterval {
                region: name.to_string(),
                timeout: self.probe_timeout(),
                interval: tick_interval,
            });
        }

        Ok(Region {
            name: RegionName::new(name),
            role,
            target,
            tick_interval,
        })
    }
}
