//! Firewatch - a single-camera fire monitor.
//!
//! Starts the detection and status loops, the alarm actuator and the local
//! operator console. Configuration comes from `FIREWATCH_*` environment
//! variables; see [`firewatch::config`].

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use firewatch::actuator::{Actuator, ActuatorWorker, DisconnectedActuator, open_serial};
use firewatch::alarm::AlarmCoordinator;
use firewatch::api::{AppState, router};
use firewatch::config::MonitorConfig;
use firewatch::history::EventLog;
use firewatch::monitor::Monitor;
use firewatch::source::{DetectionSource, ReplaySource, SyntheticSource};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("firewatch=info".parse()?))
        .init();

    let config = MonitorConfig::from_env();
    info!(
        port = config.port,
        history = %config.history_path.display(),
        serial = %config.serial_port,
        arm_delay_secs = config.arm_delay.as_secs_f64(),
        alarm_secs = config.alarm_duration.as_secs_f64(),
        "Starting Firewatch"
    );

    let actuator = connect_actuator(&config).await;
    let worker = ActuatorWorker::spawn(actuator).context("spawning actuator worker")?;
    let alarm = AlarmCoordinator::new(Arc::new(worker), config.alarm_duration);

    let log = {
        let (path, evidence, location) = (
            config.history_path.clone(),
            config.evidence_dir.clone(),
            config.location.clone(),
        );
        tokio::task::spawn_blocking(move || EventLog::open(path, evidence, location))
            .await
            .context("loading history")?
    };

    let monitor = Arc::new(Monitor::new(&config, alarm.clone(), Arc::new(log)));
    let source = open_source(&config)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (status_tx, status_rx) = watch::channel(monitor.status());

    let detection = tokio::spawn(monitor.clone().run_detection_loop(source, shutdown_rx.clone()));
    let status = tokio::spawn(monitor.clone().run_status_loop(status_tx, shutdown_rx));

    let app = router(AppState::new(monitor.clone(), status_rx))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()));

    // Console is for the local operator only
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding console to {addr}"))?;
    info!(%addr, "Operator console listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("console server failed")?;

    for (name, task) in [("detection", detection), ("status", status)] {
        if let Err(e) = task.await {
            warn!(task = name, error = %e, "Background loop ended abnormally");
        }
    }

    alarm.shutdown().await;
    info!("Firewatch stopped");

    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown requested"),
        Err(e) => {
            warn!(error = %e, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

/// Open the alarm board, falling back to a disconnected stand-in so the
/// monitor keeps detecting and logging without it.
async fn connect_actuator(config: &MonitorConfig) -> Box<dyn Actuator> {
    if !config.serial_enabled() {
        info!("Serial actuator disabled");
        return Box::new(DisconnectedActuator);
    }

    let (port, baud, settle) = (
        config.serial_port.clone(),
        config.serial_baud,
        config.serial_settle,
    );
    let opened = tokio::task::spawn_blocking(move || open_serial(&port, baud, settle)).await;

    match opened {
        Ok(Ok(actuator)) => Box::new(actuator),
        Ok(Err(e)) => {
            warn!(error = %e, "Alarm actuator unavailable, continuing without it");
            Box::new(DisconnectedActuator)
        }
        Err(e) => {
            warn!(error = %e, "Actuator setup task failed, continuing without it");
            Box::new(DisconnectedActuator)
        }
    }
}

fn open_source(config: &MonitorConfig) -> anyhow::Result<Box<dyn DetectionSource>> {
    match &config.replay_path {
        Some(path) => {
            let replay = ReplaySource::open(path, config.replay_loop)
                .with_context(|| format!("opening replay {}", path.display()))?;
            Ok(Box::new(replay))
        }
        None => {
            info!("No replay configured, using synthetic detections");
            Ok(Box::new(SyntheticSource::default()))
        }
    }
}
