//! Task wiring for the control loop.
//!
//! ```text
//! monitor(primary)   ──┐
//!                      ├─ mpsc ─▶ driver ─ watch ─▶ publisher ─▶ DnsSink
//! monitor(secondary) ──┘            ▲
//!                                   └── ControlHandle (admin, tests)
//! ```
//!
//! Each monitor owns its region's evaluator and runs one probe per tick,
//! awaiting it before the next tick. The driver applies events in arrival
//! order. The publisher keeps re-emitting the latest desired endpoint until
//! the sink acknowledges it.

use crate::backoff::RetryPolicy;
use crate::config::{ConfigError, ControllerConfig, Topology};
use crate::controller::{ControlCommand, ControlError, Controller, ControllerStatus};
use crate::director::FailbackPolicy;
use crate::liveness::{LivenessEvaluator, LivenessSnapshot, Thresholds};
use crate::metrics::{MetricsReporter, ProbeSample, PublishOutcome};
use crate::region::{ActiveEndpoint, Region, RegionName};
use crate::sink::DnsSink;
use chrono::Utc;
use health_check::Probe;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

const EVENT_BUFFER: usize = 64;

/// Broadcast shutdown signal shared by every long-running task.
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub topology: Topology,
    pub thresholds: Thresholds,
    pub policy: FailbackPolicy,
    pub retry: RetryPolicy,
}

impl ServiceSettings {
    pub fn from_config(config: &ControllerConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            topology: config.topology()?,
            thresholds: config.thresholds(),
            policy: config.failback_policy(),
            retry: config.publish_retry.into(),
        })
    }
}

enum Event {
    Liveness {
        region: RegionName,
        snapshot: LivenessSnapshot,
    },
    Command {
        command: ControlCommand,
        reply: oneshot::Sender<Result<ControllerStatus, ControlError>>,
    },
}

#[derive(Clone)]
pub struct ControlHandle {
    events: mpsc::Sender<Event>,
}

impl ControlHandle {
    pub async fn execute(&self, command: ControlCommand) -> Result<ControllerStatus, ControlError> {
        let (reply, response) = oneshot::channel();
        self.events
            .send(Event::Command { command, reply })
            .await
            .map_err(|_| ControlError::Stopped)?;
        response.await.map_err(|_| ControlError::Stopped)?
    }

    pub async fn force_activate(
        &self,
        region: RegionName,
    ) -> Result<ControllerStatus, ControlError> {
        self.execute(ControlCommand::ForceActivate { region }).await
    }

    pub async fn clear_override(&self) -> Result<ControllerStatus, ControlError> {
        self.execute(ControlCommand::ClearOverride).await
    }

    pub async fn status(&self) -> Result<ControllerStatus, ControlError> {
        self.execute(ControlCommand::Status).await
    }
}

pub struct FailoverService {
    handle: ControlHandle,
    desired: watch::Receiver<Option<ActiveEndpoint>>,
    tasks: Vec<JoinHandle<()>>,
}

impl FailoverService {
    pub fn spawn(
        settings: ServiceSettings,
        probe: Arc<dyn Probe>,
        sink: Arc<dyn DnsSink>,
        metrics: Arc<dyn MetricsReporter>,
        shutdown: &Shutdown,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (desired_tx, desired_rx) = watch::channel(None);

        let mut tasks = Vec::new();
        for region in settings.topology.regions() {
            tasks.push(tokio::spawn(monitor_region(
                region.clone(),
                settings.thresholds,
                probe.clone(),
                events_tx.clone(),
                metrics.clone(),
                shutdown.subscribe(),
            )));
        }

        let controller = Controller::new(settings.topology, settings.policy);
        tasks.push(tokio::spawn(drive(
            controller,
            events_rx,
            desired_tx,
            metrics.clone(),
            shutdown.subscribe(),
        )));

        tasks.push(tokio::spawn(publish_loop(
            sink,
            metrics,
            settings.retry,
            desired_rx.clone(),
            shutdown.subscribe(),
        )));

        Self {
            handle: ControlHandle { events: events_tx },
            desired: desired_rx,
            tasks,
        }
    }

    pub fn handle(&self) -> ControlHandle {
        self.handle.clone()
    }

    /// Endpoint the DNS record should currently point at.
    pub fn desired(&self) -> watch::Receiver<Option<ActiveEndpoint>> {
        self.desired.clone()
    }

    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        drop(self.handle);
        for task in self.tasks {
            task.await?;
        }
        Ok(())
    }
}

fn spawn_report<F>(report: F)
where
    F: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(e) = report.await {
            warn!(error = %e, "Failed to publish metrics");
        }
    });
}

async fn monitor_region(
    region: Region,
    thresholds: Thresholds,
    probe: Arc<dyn Probe>,
    events: mpsc::Sender<Event>,
    metrics: Arc<dyn MetricsReporter>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut evaluator = LivenessEvaluator::new(thresholds);
    let mut ticker = time::interval(region.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        region = %region.name,
        role = %region.role,
        endpoint = %region.target,
        interval_secs = region.tick_interval.as_secs(),
        "Region monitor starting"
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.recv() => {
                info!(region = %region.name, "Region monitor received shutdown signal, exiting loop");
                break;
            }
        }

        let result = probe.probe(&region.target).await;
        if let Some(transition) = evaluator.observe(&result) {
            info!(
                region = %region.name,
                from = %transition.from,
                to = %transition.to,
                "Region liveness changed"
            );
        }
        let snapshot = evaluator.snapshot();

        let sample = ProbeSample {
            region: region.name.clone(),
            success: result.is_success(),
            latency: result.latency,
            state: snapshot.state,
        };
        let reporter = metrics.clone();
        spawn_report(async move { reporter.record_probe(&sample).await });

        let event = Event::Liveness {
            region: region.name.clone(),
            snapshot,
        };
        if events.send(event).await.is_err() {
            break;
        }
    }
}

async fn drive(
    mut controller: Controller,
    mut events: mpsc::Receiver<Event>,
    desired: watch::Sender<Option<ActiveEndpoint>>,
    metrics: Arc<dyn MetricsReporter>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = shutdown.recv() => break,
        };

        let before = controller.decision().map(|d| d.active_region.clone());
        let now = Utc::now();

        match event {
            Event::Liveness { region, snapshot } => {
                if let Err(e) = controller.record_liveness(&region, snapshot, now) {
                    warn!(region = %region, error = %e, "Dropping liveness update");
                }
            }
            Event::Command { command, reply } => {
                let _ = reply.send(controller.apply(command, now));
            }
        }

        if let Some(decision) = controller.decision() {
            if before.as_ref() != Some(&decision.active_region) {
                let decision = decision.clone();
                let reporter = metrics.clone();
                spawn_report(async move { reporter.record_decision(&decision).await });
            }
        }

        let next = controller.active_endpoint();
        desired.send_if_modified(|current| {
            if *current != next {
                *current = next;
                true
            } else {
                false
            }
        });
    }
}

async fn publish_loop(
    sink: Arc<dyn DnsSink>,
    metrics: Arc<dyn MetricsReporter>,
    retry: RetryPolicy,
    mut desired: watch::Receiver<Option<ActiveEndpoint>>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut acknowledged: Option<ActiveEndpoint> = None;
    // Endpoint the current failure streak belongs to.
    let mut failing: Option<ActiveEndpoint> = None;
    let mut failures: u32 = 0;

    loop {
        let pending = desired
            .borrow_and_update()
            .clone()
            .filter(|endpoint| acknowledged.as_ref() != Some(endpoint));

        if let Some(endpoint) = pending {
            if failing.as_ref() != Some(&endpoint) {
                failures = 0;
            }

            match sink.publish(&endpoint).await {
                Ok(()) => {
                    info!(
                        endpoint = %endpoint,
                        attempts = failures + 1,
                        "Published active region"
                    );
                    failures = 0;
                    failing = None;

                    let reporter = metrics.clone();
                    let reported = endpoint.clone();
                    spawn_report(async move {
                        reporter
                            .record_publish(&reported, &PublishOutcome::Acknowledged)
                            .await
                    });
                    acknowledged = Some(endpoint);
                }
                Err(e) => {
                    // A failed call may still have been applied.
                    acknowledged = None;
                    failing = Some(endpoint.clone());
                    failures = failures.saturating_add(1);
                    if failures >= retry.alert_after {
                        error!(
                            endpoint = %endpoint,
                            consecutive_failures = failures,
                            error = %e,
                            "DNS publish keeps failing"
                        );
                    } else {
                        warn!(
                            endpoint = %endpoint,
                            attempt = failures,
                            error = %e,
                            "DNS publish failed, will retry"
                        );
                    }

                    let reporter = metrics.clone();
                    let outcome = PublishOutcome::Failed {
                        consecutive_failures: failures,
                    };
                    spawn_report(async move { reporter.record_publish(&endpoint, &outcome).await });

                    // A newer decision cuts the backoff short.
                    tokio::select! {
                        _ = time::sleep(retry.delay_for(failures)) => {}
                        changed = desired.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = shutdown.recv() => break,
                    }
                    continue;
                }
            }
        }

        tokio::select! {
            changed = desired.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}
