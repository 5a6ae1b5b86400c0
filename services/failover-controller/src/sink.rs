use crate::config::DnsConfig;
use crate::region::ActiveEndpoint;
use async_trait::async_trait;
use aws_sdk_route53::error::{BuildError, DisplayErrorContext};
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use aws_sdk_route53::Client as Route53Client;
use chrono::Utc;
use std::sync::Mutex;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("failed to build DNS change: {0}")]
    Build(#[from] BuildError),
    #[error("DNS provider rejected the change: {0}")]
    Provider(String),
}

/// Authoritative DNS answer for the failover record. `publish` is an upsert:
/// calling it again with the same endpoint must leave the same state.
#[async_trait]
pub trait DnsSink: Send + Sync {
    async fn publish(&self, endpoint: &ActiveEndpoint) -> Result<(), SinkError>;
}

pub struct Route53Sink {
    client: Route53Client,
    hosted_zone_id: String,
    record_name: String,
    ttl: i64,
}

impl Route53Sink {
    pub fn new(client: Route53Client, config: &DnsConfig) -> Self {
        Self {
            client,
            hosted_zone_id: config.hosted_zone_id.clone(),
            record_name: config.record_name.clone(),
            ttl: config.ttl,
        }
    }

    fn change_batch(&self, endpoint: &ActiveEndpoint) -> Result<ChangeBatch, BuildError> {
        let record = ResourceRecord::builder().value(&endpoint.host).build()?;

        let record_set = ResourceRecordSet::builder()
            .name(&self.record_name)
            .r#type(RrType::Cname)
            .ttl(self.ttl)
            .resource_records(record)
            .build()?;

        let change = Change::builder()
            .action(ChangeAction::Upsert)
            .resource_record_set(record_set)
            .build()?;

        ChangeBatch::builder()
            .comment(format!(
                "failover to {} at {}",
                endpoint.region,
                Utc::now().to_rfc3339()
            ))
            .changes(change)
            .build()
    }
}

#[async_trait]
impl DnsSink for Route53Sink {
    async fn publish(&self, endpoint: &ActiveEndpoint) -> Result<(), SinkError> {
        let batch = self.change_batch(endpoint)?;

        self.client
            .change_resource_record_sets()
            .hosted_zone_id(&self.hosted_zone_id)
            .change_batch(batch)
            .send()
            .await
            .map_err(|e| SinkError::Provider(DisplayErrorContext(&e).to_string()))?;

        info!(
            record = %self.record_name,
            endpoint = %endpoint,
            "Upserted failover record"
        );
        Ok(())
    }
}

/// Dry-run sink: logs the decision instead of changing DNS.
#[derive(Default)]
pub struct LoggingSink {
    last: Mutex<Option<ActiveEndpoint>>,
}

impl LoggingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_published(&self) -> Option<ActiveEndpoint> {
        self.last.lock().ok().and_then(|last| last.clone())
    }
}

#[async_trait]
impl DnsSink for LoggingSink {
    async fn publish(&self, endpoint: &ActiveEndpoint) -> Result<(), SinkError> {
        if let Ok(mut last) = self.last.lock() {
            if last.as_ref() == Some(endpoint) {
                return Ok(());
            }
            *last = Some(endpoint.clone());
        }
        info!(endpoint = %endpoint, "Dry run: DNS record would now point at active region");
        Ok(())
    }
}
