use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use jobkeeper::{
    config::Config,
    database::Database,
    engine::{CronEngine, EngineSettings, SchedulingEngine},
    jobs::{
        housekeeping::{HOUSEKEEPING_COMPONENT, HOUSEKEEPING_JOB},
        JobRegistry, RecordHousekeepingJob,
    },
    services::{
        log_job_events, ExecutionRunner, HealthStateEvaluator, JobLifecycleManager,
        RecordingListener,
    },
    web::{AppState, WebServer},
};

#[derive(Parser)]
#[command(name = "jobkeeper")]
#[command(version)]
#[command(about = "Scheduled job orchestration with execution history and health states")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "jobkeeper.toml")]
    config: String,

    /// Listening IP address
    #[arg(short = 'H', long, value_name = "IP")]
    host: Option<String>,

    /// Listening port
    #[arg(short, long, value_name = "PORT")]
    port: Option<u16>,

    /// Database URL (overrides config file)
    #[arg(short = 'd', long, value_name = "URL")]
    database_url: Option<String>,

    /// Log level
    #[arg(short = 'v', long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_filter = if cli.log_level == "trace" {
        format!("jobkeeper={},tower_http=trace", cli.log_level)
    } else {
        format!("jobkeeper={}", cli.log_level)
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting jobkeeper v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::load(&cli.config)?;
    info!("Configuration loaded from: {}", cli.config);

    if let Some(host) = cli.host {
        config.web.host = host;
    }
    if let Some(port) = cli.port {
        config.web.port = port;
    }
    if let Some(database_url) = cli.database_url {
        config.database.url = database_url;
    }

    info!("Using database: {}", config.database.url);
    let database = Database::new(&config.database).await?;
    database.migrate().await?;
    info!("Database connection established and migrations applied");

    let registry = Arc::new(JobRegistry::new().register(
        HOUSEKEEPING_COMPONENT,
        HOUSEKEEPING_JOB,
        Arc::new(RecordHousekeepingJob::new(database.clone(), &config.records)),
    ));

    let node = config.scheduler.instance_name.clone();
    let runner = Arc::new(ExecutionRunner::new(
        registry.clone(),
        Duration::from_millis(config.scheduler.interruptible_wait_ms),
        node.clone(),
    ));
    tokio::spawn(log_job_events(runner.subscribe()));
    let recorder = Arc::new(RecordingListener::new(
        database.clone(),
        config.records.enabled,
        node,
    ));
    let engine = Arc::new(
        CronEngine::new(
            database.clone(),
            EngineSettings::from_config(&config.scheduler, &config.database),
            runner,
        )
        .with_listener(recorder),
    );
    let scheduling: Arc<dyn SchedulingEngine> = engine.clone();

    let lifecycle = Arc::new(JobLifecycleManager::new(scheduling.clone(), registry));
    for tenant in config.active_tenants() {
        lifecycle
            .reconcile_tenant(
                &tenant.name,
                &tenant.components,
                config.scheduler.validate_on_startup,
            )
            .await;
    }

    let engine_task = tokio::spawn(Arc::clone(&engine).start());

    let health = Arc::new(HealthStateEvaluator::new(scheduling, database.clone()));
    let web_server = WebServer::new(AppState {
        config,
        database,
        lifecycle,
        health,
    })?;

    let shutdown = CancellationToken::new();
    let server_shutdown = shutdown.clone();
    info!(
        "Starting web server on {}:{}",
        web_server.host(),
        web_server.port()
    );
    let server_task = tokio::spawn(web_server.serve(server_shutdown));

    shutdown_signal().await;
    info!("Shutdown requested");
    shutdown.cancel();
    engine.shutdown();

    match server_task.await {
        Ok(Err(e)) => error!("Web server failed: {}", e),
        Err(e) => error!("Web server task panicked: {}", e),
        Ok(Ok(())) => {}
    }
    if let Err(e) = engine_task.await {
        error!("Engine task panicked: {}", e);
    }

    info!("jobkeeper stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
