use crate::director::FailoverDecision;
use crate::liveness::LivenessState;
use crate::region::{ActiveEndpoint, RegionName};
use async_trait::async_trait;
use aws_sdk_cloudwatch::{
    types::{Dimension, MetricDatum, StandardUnit},
    Client as CloudWatchClient,
};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ProbeSample {
    pub region: RegionName,
    pub success: bool,
    pub latency: Duration,
    pub state: LivenessState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PublishOutcome {
    Acknowledged,
    Failed { consecutive_failures: u32 },
}

/// Metric errors are reported back to the caller, which logs them; they never
/// interrupt probing or publishing.
#[async_trait]
pub trait MetricsReporter: Send + Sync {
    async fn record_probe(&self, sample: &ProbeSample) -> anyhow::Result<()>;

    async fn record_decision(&self, decision: &FailoverDecision) -> anyhow::Result<()>;

    async fn record_publish(
        &self,
        endpoint: &ActiveEndpoint,
        outcome: &PublishOutcome,
    ) -> anyhow::Result<()>;
}

pub struct NoopMetrics;

#[async_trait]
impl MetricsReporter for NoopMetrics {
    async fn record_probe(&self, _sample: &ProbeSample) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_decision(&self, _decision: &FailoverDecision) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_publish(
        &self,
        _endpoint: &ActiveEndpoint,
        _outcome: &PublishOutcome,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

pub struct CloudWatchMetrics {
    client: CloudWatchClient,
    namespace: String,
}

impl CloudWatchMetrics {
    pub fn new(client: CloudWatchClient, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    async fn put(&self, metrics: Vec<MetricDatum>) -> anyhow::Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }

        debug!("Publishing {} metrics to CloudWatch", metrics.len());
        self.client
            .put_metric_data()
            .namespace(&self.namespace)
            .set_metric_data(Some(metrics))
            .send()
            .await?;
        Ok(())
    }
}

fn region_dimension(region: &RegionName) -> Dimension {
    Dimension::builder()
        .name("Region")
        .value(region.as_str())
        .build()
}

fn datum(name: &str, value: f64, unit: StandardUnit, region: &RegionName) -> MetricDatum {
    let timestamp = aws_sdk_cloudwatch::primitives::DateTime::from(std::time::SystemTime::now());
    MetricDatum::builder()
        .metric_name(name)
        .value(value)
        .unit(unit)
        .timestamp(timestamp)
        .dimensions(region_dimension(region))
        .build()
}

pub fn probe_metrics(sample: &ProbeSample) -> Vec<MetricDatum> {
    vec![
        datum(
            "RegionHealthy",
            if sample.state.is_healthy() { 1.0 } else { 0.0 },
            StandardUnit::None,
            &sample.region,
        ),
        datum(
            "ProbeSuccess",
            if sample.success { 1.0 } else { 0.0 },
            StandardUnit::None,
            &sample.region,
        ),
        datum(
            "ProbeLatency",
            sample.latency.as_secs_f64() * 1000.0,
            StandardUnit::Milliseconds,
            &sample.region,
        ),
    ]
}

pub fn publish_metrics(endpoint: &ActiveEndpoint, outcome: &PublishOutcome) -> Vec<MetricDatum> {
    match outcome {
        PublishOutcome::Acknowledged => vec![datum(
            "DnsPublishFailure",
            0.0,
            StandardUnit::Count,
            &endpoint.region,
        )],
        PublishOutcome::Failed {
            consecutive_failures,
        } => vec![
            datum("DnsPublishFailure", 1.0, StandardUnit::Count, &endpoint.region),
            datum(
                "ConsecutivePublishFailures",
                f64::from(*consecutive_failures),
                StandardUnit::Count,
                &endpoint.region,
            ),
        ],
    }
}

#[async_trait]
impl MetricsReporter for CloudWatchMetrics {
    async fn record_probe(&self, sample: &ProbeSample) -> anyhow::Result<()> {
        self.put(probe_metrics(sample)).await
    }

    async fn record_decision(&self, decision: &FailoverDecision) -> anyhow::Result<()> {
        self.put(vec![datum(
            "FailoverDecision",
            1.0,
            StandardUnit::Count,
            &decision.active_region,
        )])
        .await
    }

    async fn record_publish(
        &self,
        endpoint: &ActiveEndpoint,
        outcome: &PublishOutcome,
    ) -> anyhow::Result<()> {
        self.put(publish_metrics(endpoint, outcome)).await
    }
}
