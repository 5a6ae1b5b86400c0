use anyhow::Context;
use aws_config::BehaviorVersion;
use clap::Parser;
use failover_controller::{
    admin, CloudWatchMetrics, ControllerConfig, DnsSink, FailoverService, LoggingSink,
    MetricsReporter, NoopMetrics, Route53Sink, ServiceSettings, Shutdown,
};
use health_check::{HealthProbe, ProbeSettings};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Active/passive DNS failover controller")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "FAILOVER_CONFIG", default_value = "failover.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let args = Args::parse();
    let config = ControllerConfig::load(&args.config)
        .with_context(|| format!("failed to load config from {}", args.config.display()))?;
    let settings = ServiceSettings::from_config(&config).context("invalid region topology")?;

    info!(
        primary = %settings.topology.primary.name,
        secondary = %settings.topology.secondary.name,
        sticky = settings.policy.sticky,
        "Starting failover controller"
    );

    let aws = aws_config::defaults(BehaviorVersion::latest()).load().await;

    let sink: Arc<dyn DnsSink> = match &config.dns {
        Some(dns) => Arc::new(Route53Sink::new(aws_sdk_route53::Client::new(&aws), dns)),
        None => {
            warn!("No [dns] section configured, decisions will only be logged");
            Arc::new(LoggingSink::new())
        }
    };

    let metrics: Arc<dyn MetricsReporter> = if config.metrics.enabled {
        Arc::new(CloudWatchMetrics::new(
            aws_sdk_cloudwatch::Client::new(&aws),
            config.metrics.namespace.clone(),
        ))
    } else {
        Arc::new(NoopMetrics)
    };

    let probe = HealthProbe::new(
        ProbeSettings::builder()
            .timeout(config.probe_timeout())
            .scheme(config.probe_scheme)
            .build(),
    )
    .context("failed to build probe client")?;

    let shutdown = Shutdown::new();
    let service = FailoverService::spawn(settings, Arc::new(probe), sink, metrics, &shutdown);

    let admin_task = match config.admin_addr {
        Some(addr) => {
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind admin listener on {}", addr))?;
            Some(tokio::spawn(admin::serve(
                listener,
                service.handle(),
                shutdown.subscribe(),
            )))
        }
        None => None,
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");

    shutdown.trigger();
    service.join().await.context("controller task panicked")?;
    if let Some(task) = admin_task {
        task.await.context("admin task panicked")?;
    }

    info!("Failover controller stopped");
    Ok(())
}
