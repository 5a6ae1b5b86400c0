pub mod admin;
pub mod backoff;
pub mod config;
pub mod controller;
pub mod director;
pub mod liveness;
pub mod metrics;
pub mod region;
pub mod service;
pub mod sink;

pub use admin::{handle_line, parse_command, serve, ControlResponse};
pub use backoff::RetryPolicy;
pub use config::{ConfigError, ControllerConfig, DnsConfig, MetricsConfig, RegionConfig, Topology};
pub use controller::{ControlCommand, ControlError, Controller, ControllerStatus, RegionStatus};
pub use director::{DecisionReason, FailbackPolicy, FailoverDecision, FailoverDirector};
pub use liveness::{LivenessEvaluator, LivenessSnapshot, LivenessState, Thresholds, Transition};
pub use metrics::{CloudWatchMetrics, MetricsReporter, NoopMetrics, ProbeSample, PublishOutcome};
pub use region::{ActiveEndpoint, Region, RegionName, Role};
pub use service::{ControlHandle, FailoverService, ServiceSettings, Shutdown};
pub use sink::{DnsSink, LoggingSink, Route53Sink, SinkError};
