use anyhow::{Context, Result};
use framestore::config::Config;
use framestore::control::{start_api_server, AppState};
use framestore::dir_backend::DirectoryStore;
use framestore::frame::FrameMessage;
use framestore::ingest::IngestServer;
use framestore::writer::{FrameWriter, WriterError};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting framestore service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // The whole engine sits behind one mutex: the writer loop and the
    // control plane take turns, so lifecycle calls never interleave with an
    // in-flight submit.
    let writer = Arc::new(Mutex::new(FrameWriter::new(
        config.writer.clone(),
        Box::new(DirectoryStore::new()),
    )));

    if config.service.auto_start {
        writer
            .lock()
            .start()
            .context("Failed to start writer at boot")?;
    }

    // Bounded queue between transport and writer; backpressure reaches the
    // stream instead of growing memory.
    let (frame_tx, frame_rx) = mpsc::channel::<FrameMessage>(config.ingest.queue_size);

    // Spawn ingest listener task
    let ingest = IngestServer::new(config.ingest.clone(), frame_tx);
    let ingest_handle = tokio::spawn(async move {
        if let Err(e) = ingest.run().await {
            error!(error = %e, "Ingest listener error");
        }
    });

    // Spawn control API task
    let api_state = AppState {
        writer: writer.clone(),
    };
    let control_config = config.control.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &control_config).await {
            error!(error = %e, "Control API server error");
        }
    });

    // Spawn writer loop task
    let writer_handle = tokio::spawn(write_loop(writer.clone(), frame_rx));

    info!("Framestore service started");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down framestore service");

    // Stop intake first, then finalize the open container.
    ingest_handle.abort();
    api_handle.abort();
    writer_handle.abort();

    writer
        .lock()
        .stop()
        .context("Failed to finalize open container")?;

    info!("Framestore service stopped");

    Ok(())
}

/// Consume frames from the ingest queue and drive the writer.
///
/// Frames are processed strictly one at a time; each submit blocks until
/// the payload is handed to the storage backend.
async fn write_loop(writer: Arc<Mutex<FrameWriter>>, mut rx: mpsc::Receiver<FrameMessage>) {
    while let Some(frame) = rx.recv().await {
        let result = writer.lock().submit(&frame);
        match result {
            Ok(_) => {}
            Err(WriterError::NotStarted) => {
                debug!(
                    frame_index = frame.frame_index,
                    "Writer not started, frame dropped"
                );
            }
            Err(e) => {
                error!(
                    frame_index = frame.frame_index,
                    error = %e,
                    "Frame write failed"
                );
            }
        }
    }

    info!("Frame queue closed");
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
