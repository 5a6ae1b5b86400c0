use async_trait::async_trait;
use chrono::Utc;
use failover_controller::{
    admin, ActiveEndpoint, ControlError, ControllerConfig, DecisionReason, DnsSink,
    FailoverDecision, FailoverService, MetricsReporter, NoopMetrics, ProbeSample,
    PublishOutcome, RegionName, ServiceSettings, Shutdown, SinkError,
};
use health_check::{Probe, ProbeFailure, ProbeResult, ProbeTarget};
use mockall::mock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

const PRIMARY: &str = "eu-north-1";
const SECONDARY: &str = "eu-west-1";
const PRIMARY_HOST: &str = "primary.example.com";
const SECONDARY_HOST: &str = "secondary.example.com";

/// Answers each host from a script; the last verdict repeats once the script
/// runs out.
struct ScriptedProbe {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
}

impl ScriptedProbe {
    fn new(primary: &[bool], secondary: &[bool]) -> Self {
        let mut scripts = HashMap::new();
        scripts.insert(PRIMARY_HOST.to_string(), primary.iter().copied().collect());
        scripts.insert(SECONDARY_HOST.to_string(), secondary.iter().copied().collect());
        Self {
            scripts: Mutex::new(scripts),
        }
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn probe(&self, target: &ProbeTarget) -> ProbeResult {
        let healthy = {
            let mut scripts = self.scripts.lock().unwrap();
            let script = scripts.get_mut(target.host()).unwrap();
            if script.len() > 1 {
                script.pop_front().unwrap()
            } else {
                script.front().copied().unwrap_or(false)
            }
        };

        let latency = Duration::from_millis(12);
        if healthy {
            ProbeResult::passed(Utc::now(), 200, latency)
        } else {
            ProbeResult::failed(Utc::now(), ProbeFailure::Status(503), latency)
        }
    }
}

/// Records every publish attempt and rejects the first `failures` of them.
#[derive(Default)]
struct RecordingSink {
    failures: AtomicU32,
    attempts: Mutex<Vec<ActiveEndpoint>>,
    published: Mutex<Vec<ActiveEndpoint>>,
}

impl RecordingSink {
    fn failing(failures: u32) -> Self {
        Self {
            failures: AtomicU32::new(failures),
            ..Self::default()
        }
    }

    fn attempts(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    fn published_regions(&self) -> Vec<String> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|endpoint| endpoint.region.to_string())
            .collect()
    }
}

#[async_trait]
impl DnsSink for RecordingSink {
    async fn publish(&self, endpoint: &ActiveEndpoint) -> Result<(), SinkError> {
        self.attempts.lock().unwrap().push(endpoint.clone());

        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SinkError::Provider("Throttling: Rate exceeded".to_string()));
        }

        self.published.lock().unwrap().push(endpoint.clone());
        Ok(())
    }
}

/// Applies every change, but reports an error for changes pointing at
/// `flaky_region`, like a provider call that commits and then times out.
struct CommitThenFailSink {
    flaky_region: RegionName,
    record: Mutex<Option<ActiveEndpoint>>,
}

impl CommitThenFailSink {
    fn new(flaky_region: &str) -> Self {
        Self {
            flaky_region: flaky_region.into(),
            record: Mutex::new(None),
        }
    }

    fn record_region(&self) -> Option<String> {
        self.record
            .lock()
            .unwrap()
            .as_ref()
            .map(|endpoint| endpoint.region.to_string())
    }
}

#[async_trait]
impl DnsSink for CommitThenFailSink {
    async fn publish(&self, endpoint: &ActiveEndpoint) -> Result<(), SinkError> {
        *self.record.lock().unwrap() = Some(endpoint.clone());
        if endpoint.region == self.flaky_region {
            return Err(SinkError::Provider("response timed out".to_string()));
        }
        Ok(())
    }
}

/// Keeps the streak length reported with every failed publish.
#[derive(Default)]
struct PublishFailureLog {
    failures: Mutex<Vec<(String, u32)>>,
}

impl PublishFailureLog {
    fn streaks_for(&self, region: &str) -> Vec<u32> {
        self.failures
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == region)
            .map(|(_, streak)| *streak)
            .collect()
    }
}

#[async_trait]
impl MetricsReporter for PublishFailureLog {
    async fn record_probe(&self, _sample: &ProbeSample) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_decision(&self, _decision: &FailoverDecision) -> anyhow::Result<()> {
        Ok(())
    }

    async fn record_publish(
        &self,
        endpoint: &ActiveEndpoint,
        outcome: &PublishOutcome,
    ) -> anyhow::Result<()> {
        if let PublishOutcome::Failed {
            consecutive_failures,
        } = outcome
        {
            self.failures
                .lock()
                .unwrap()
                .push((endpoint.region.to_string(), *consecutive_failures));
        }
        Ok(())
    }
}

mock! {
    pub Sink {}

    #[async_trait]
    impl DnsSink for Sink {
        async fn publish(&self, endpoint: &ActiveEndpoint) -> Result<(), SinkError>;
    }
}

fn settings(tick_interval_secs: u64) -> ServiceSettings {
    let toml = format!(
        r#"
        healthy_threshold = 1
        unhealthy_threshold = 2
        probe_timeout_secs = 5
        tick_interval_secs = {tick_interval_secs}

        [publish_retry]
        base_delay_ms = 500
        max_delay_ms = 4000
        alert_after = 3

        [[regions]]
        name = "{PRIMARY}"
        host = "{PRIMARY_HOST}"
        path = "/health"
        role = "primary"

        [[regions]]
        name = "{SECONDARY}"
        host = "{SECONDARY_HOST}"
        path = "/health"
        role = "secondary"
        "#
    );
    let config = ControllerConfig::from_toml_str(&toml).unwrap();
    ServiceSettings::from_config(&config).unwrap()
}

fn spawn(
    probe: ScriptedProbe,
    sink: Arc<dyn DnsSink>,
    shutdown: &Shutdown,
) -> FailoverService {
    FailoverService::spawn(
        settings(30),
        Arc::new(probe),
        sink,
        Arc::new(NoopMetrics),
        shutdown,
    )
}

async fn ticks(count: u64) {
    tokio::time::sleep(Duration::from_secs(30 * count + 1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_healthy_primary_is_published_once() {
    let sink = Arc::new(RecordingSink::default());
    let shutdown = Shutdown::new();
    let service = spawn(ScriptedProbe::new(&[true], &[false, true]), sink.clone(), &shutdown);

    ticks(4).await;

    assert_eq!(sink.published_regions(), vec![PRIMARY]);
    assert_eq!(
        service.desired().borrow().as_ref().map(|e| e.host.as_str()),
        Some(PRIMARY_HOST)
    );

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failover_and_automatic_failback() {
    let sink = Arc::new(RecordingSink::default());
    let shutdown = Shutdown::new();
    // t0 healthy, t30 first failure, t60 second failure, t120 recovered.
    let primary = [true, false, false, false, true];
    let service = spawn(ScriptedProbe::new(&primary, &[false, true]), sink.clone(), &shutdown);

    ticks(2).await;
    assert_eq!(sink.published_regions(), vec![PRIMARY, SECONDARY]);

    ticks(3).await;
    assert_eq!(sink.published_regions(), vec![PRIMARY, SECONDARY, PRIMARY]);

    let status = service.handle().status().await.unwrap();
    assert_eq!(status.reason, Some(DecisionReason::PrimaryHealthy));

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_all_unhealthy_retains_active_region() {
    let sink = Arc::new(RecordingSink::default());
    let shutdown = Shutdown::new();
    let service = spawn(ScriptedProbe::new(&[true, false], &[false]), sink.clone(), &shutdown);

    ticks(5).await;

    let status = service.handle().status().await.unwrap();
    assert_eq!(status.active_region, Some(RegionName::from(PRIMARY)));
    assert_eq!(status.reason, Some(DecisionReason::AllUnhealthyRetained));
    assert!(status.regions.iter().all(|r| !r.liveness.state.is_healthy()));
    assert_eq!(sink.published_regions(), vec![PRIMARY]);

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_nothing_published_without_a_healthy_region() {
    let sink = Arc::new(RecordingSink::default());
    let shutdown = Shutdown::new();
    let service = spawn(ScriptedProbe::new(&[false], &[false]), sink.clone(), &shutdown);

    ticks(3).await;

    assert_eq!(sink.attempts(), 0);
    assert!(service.desired().borrow().is_none());
    assert_eq!(service.handle().status().await.unwrap().active_region, None);

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_manual_override_pins_region_until_cleared() {
    let sink = Arc::new(RecordingSink::default());
    let shutdown = Shutdown::new();
    let service = spawn(ScriptedProbe::new(&[true], &[false, true]), sink.clone(), &shutdown);
    let handle = service.handle();

    ticks(1).await;
    let status = handle.force_activate(SECONDARY.into()).await.unwrap();
    assert_eq!(status.active_region, Some(RegionName::from(SECONDARY)));
    assert_eq!(status.manual_override, Some(RegionName::from(SECONDARY)));
    assert_eq!(status.reason, Some(DecisionReason::ManualOverride));

    // Healthy primary probes do not undo the override.
    ticks(3).await;
    let status = handle.status().await.unwrap();
    assert_eq!(status.active_region, Some(RegionName::from(SECONDARY)));
    assert_eq!(sink.published_regions(), vec![PRIMARY, SECONDARY]);

    let status = handle.clear_override().await.unwrap();
    assert_eq!(status.manual_override, None);
    assert_eq!(status.active_region, Some(RegionName::from(PRIMARY)));

    ticks(1).await;
    assert_eq!(sink.published_regions(), vec![PRIMARY, SECONDARY, PRIMARY]);

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_unknown_region_is_rejected() {
    let shutdown = Shutdown::new();
    let service = spawn(
        ScriptedProbe::new(&[true], &[true]),
        Arc::new(RecordingSink::default()),
        &shutdown,
    );

    let result = service.handle().force_activate("ap-south-1".into()).await;
    assert_eq!(
        result.unwrap_err(),
        ControlError::UnknownRegion("ap-south-1".into())
    );

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_failed_publish_is_retried_until_acknowledged() {
    let sink = Arc::new(RecordingSink::failing(3));
    let shutdown = Shutdown::new();
    let service = spawn(ScriptedProbe::new(&[true], &[false]), sink.clone(), &shutdown);

    // Backoff of 0.5s, 1s and 2s plus jitter fits well inside one tick.
    tokio::time::sleep(Duration::from_secs(10)).await;

    assert_eq!(sink.attempts(), 4);
    assert_eq!(sink.published_regions(), vec![PRIMARY]);

    ticks(2).await;
    assert_eq!(sink.attempts(), 4);

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_steady_state_publishes_exactly_once() {
    let mut sink = MockSink::new();
    sink.expect_publish()
        .withf(|endpoint| endpoint.region.as_str() == PRIMARY && endpoint.host == PRIMARY_HOST)
        .times(1)
        .returning(|_| Ok(()));
    let sink = Arc::new(sink);

    let shutdown = Shutdown::new();
    let service = spawn(ScriptedProbe::new(&[true], &[false, true]), sink.clone(), &shutdown);

    ticks(6).await;

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_handle_reports_stopped_after_shutdown() {
    let shutdown = Shutdown::new();
    let service = spawn(
        ScriptedProbe::new(&[true], &[false]),
        Arc::new(RecordingSink::default()),
        &shutdown,
    );
    let handle = service.handle();

    shutdown.trigger();
    assert!(service.join().await.is_ok());

    assert_eq!(handle.status().await.unwrap_err(), ControlError::Stopped);
}

async fn round_trip(
    lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    request: &str,
) -> serde_json::Value {
    writer
        .write_all(format!("{}\n", request).as_bytes())
        .await
        .unwrap();
    let line = lines.next_line().await.unwrap().unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn test_admin_interface_round_trip() {
    let shutdown = Shutdown::new();
    let service = FailoverService::spawn(
        settings(3600),
        Arc::new(ScriptedProbe::new(&[true], &[true])),
        Arc::new(RecordingSink::default()),
        Arc::new(NoopMetrics),
        &shutdown,
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let admin_task = tokio::spawn(admin::serve(
        listener,
        service.handle(),
        shutdown.subscribe(),
    ));

    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let forced = round_trip(
        &mut lines,
        &mut writer,
        r#"{"action":"force-activate","region":"eu-west-1"}"#,
    )
    .await;
    assert_eq!(forced["status"], "success");
    assert_eq!(forced["controller"]["active_region"], SECONDARY);
    assert_eq!(forced["controller"]["reason"], "manual-override");

    let rejected = round_trip(&mut lines, &mut writer, "{not json").await;
    assert_eq!(rejected["status"], "failed");
    assert!(rejected.get("controller").is_none());

    let unknown = round_trip(
        &mut lines,
        &mut writer,
        r#"{"action":"force-activate","region":"us-east-1"}"#,
    )
    .await;
    assert_eq!(unknown["status"], "failed");
    assert!(unknown["message"].as_str().unwrap().contains("us-east-1"));

    let status = round_trip(&mut lines, &mut writer, r#"{"action":"status"}"#).await;
    assert_eq!(status["status"], "success");
    assert_eq!(status["controller"]["manual_override"], SECONDARY);
    assert_eq!(status["controller"]["regions"].as_array().unwrap().len(), 2);

    let cleared = round_trip(&mut lines, &mut writer, r#"{"action":"clear-override"}"#).await;
    assert_eq!(cleared["status"], "success");
    assert!(cleared["controller"]["manual_override"].is_null());

    shutdown.trigger();
    tokio_test::assert_ok!(service.join().await);
    tokio_test::assert_ok!(admin_task.await);
}

#[test]
fn test_bundled_config_loads() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("failover.toml");
    let config = ControllerConfig::load(&path).unwrap();
    let settings = ServiceSettings::from_config(&config).unwrap();

    assert_eq!(settings.topology.primary.name.as_str(), PRIMARY);
    assert_eq!(settings.topology.secondary.name.as_str(), SECONDARY);
    assert_eq!(
        settings.topology.primary.target.override_host_header(),
        Some("api.example.com")
    );
    assert_eq!(config.dns.unwrap().record_name, "api.example.com");
}

#[tokio::test(start_paused = true)]
async fn test_failback_is_republished_after_ambiguous_failure() {
    let sink = Arc::new(CommitThenFailSink::new(SECONDARY));
    let shutdown = Shutdown::new();
    // Primary is lost at t60 and back at t90.
    let probe = ScriptedProbe::new(&[true, false, false, true], &[false, true]);
    let service = spawn(probe, sink.clone(), &shutdown);

    ticks(2).await;
    assert_eq!(sink.record_region().as_deref(), Some(SECONDARY));

    ticks(2).await;
    assert_eq!(
        service.desired().borrow().as_ref().map(|e| e.region.to_string()),
        Some(PRIMARY.to_string())
    );
    assert_eq!(sink.record_region().as_deref(), Some(PRIMARY));

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_new_decision_starts_a_fresh_failure_streak() {
    let metrics = Arc::new(PublishFailureLog::default());
    let shutdown = Shutdown::new();
    let service = FailoverService::spawn(
        settings(30),
        Arc::new(ScriptedProbe::new(&[true], &[false, true])),
        Arc::new(RecordingSink::failing(u32::MAX)),
        metrics.clone(),
        &shutdown,
    );

    ticks(1).await;
    let primary_streak = metrics.streaks_for(PRIMARY);
    assert!(primary_streak.len() > 3);
    assert_eq!(primary_streak[..3], [1, 2, 3]);

    service.handle().force_activate(SECONDARY.into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(metrics.streaks_for(SECONDARY), vec![1]);

    shutdown.trigger();
    assert!(service.join().await.is_ok());
}
