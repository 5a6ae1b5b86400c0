pub mod probe;
pub mod proxy;
pub mod target;

pub use probe::{
    is_healthy_status, HealthProbe, Probe, ProbeError, ProbeFailure, ProbeResult, ProbeSettings,
    DEFAULT_PROBE_TIMEOUT,
};
pub use proxy::{HealthCheckProxy, ProxyConfigError, ProxyResponse, ProxySettings};
pub use target::{ProbeTarget, Scheme, TargetError};
