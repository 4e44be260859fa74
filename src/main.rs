//! Zone occupancy service
//!
//! Consumes per-frame vehicle detections, decides per operator-drawn zone
//! whether it is occupied, and serves the aggregate counts.
//!
//! Module structure:
//! - `domain/` - Core types (boxes, zones, detections, class table)
//! - `io/` - External interfaces (MQTT, replay, HTTP, Prometheus)
//! - `services/` - Occupancy logic (smoother, selector, hysteresis, engine, pipeline)
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;
use zone_occupancy::infra::{Config, IngestSource, Metrics};
use zone_occupancy::io::{start_http_server, start_mqtt_client, start_replay, HttpState};
use zone_occupancy::services::{FramePipeline, OccupancyEngine, StatusPublisher};

/// Zone occupancy service - parking-spot occupancy from detector frames
#[derive(Parser, Debug)]
#[command(name = "zone-occupancy", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Replay frames from a JSONL file ("-" for stdin) instead of MQTT
    #[arg(short, long)]
    replay: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with configurable level via RUST_LOG env var
    // Default: INFO, use RUST_LOG=debug for per-frame visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "zone-occupancy starting");

    let args = Args::parse();

    let mut config = match args.config.as_deref() {
        Some(path) => Config::load_from_path(path),
        None => Config::load(&std::env::args().collect::<Vec<_>>()),
    };
    if let Some(path) = args.replay.as_deref() {
        config = config.with_replay_file(path);
    }

    let engine_config = config.engine_config();
    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        source = %config.ingest_source().as_str(),
        zones = %config.initial_zones().len(),
        conf_threshold = %engine_config.conf_threshold,
        overlap_threshold = %engine_config.overlap_threshold,
        min_box_area = %engine_config.min_box_area,
        confirm_frames = %engine_config.confirm_frames,
        release_frames = %engine_config.release_frames,
        skip_frames = %config.skip_frames(),
        http_port = %config.http_port(),
        "config_loaded"
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Create shared components
    let metrics = Arc::new(Metrics::new());
    let publisher = Arc::new(StatusPublisher::new());

    // Bounded channels for backpressure
    let (frame_tx, frame_rx) = mpsc::channel(config.frame_queue());
    let (command_tx, command_rx) = mpsc::channel(config.command_queue());

    // Start the pipeline (sole owner of the engine)
    let classes = config.class_table();
    info!(allowed = ?classes.allowed_ids(), known = %classes.len(), "class_table_loaded");
    let engine =
        OccupancyEngine::new(config.engine_config().clone(), classes, config.initial_zones().to_vec());
    let pipeline = FramePipeline::new(engine, publisher.clone(), metrics.clone(), config.skip_frames());
    let pipeline_shutdown = shutdown_rx.clone();
    let pipeline_handle = tokio::spawn(pipeline.run(frame_rx, command_rx, pipeline_shutdown));

    // Start frame ingest
    match config.ingest_source() {
        IngestSource::Mqtt => {
            let mqtt_config = config.clone();
            let mqtt_metrics = metrics.clone();
            let mqtt_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = start_mqtt_client(&mqtt_config, frame_tx, mqtt_metrics, mqtt_shutdown).await {
                    error!(error = %e, "MQTT client error");
                }
            });
        }
        IngestSource::Replay => {
            let path = config.replay_file().to_string();
            let interval_ms = config.frame_interval_ms();
            let replay_metrics = metrics.clone();
            let replay_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                if let Err(e) = start_replay(&path, interval_ms, frame_tx, replay_metrics, replay_shutdown).await {
                    error!(error = %format!("{e:#}"), "replay error");
                }
            });
        }
    }

    // Start HTTP surface (if port > 0)
    let http_port = config.http_port();
    if http_port > 0 {
        let state = Arc::new(HttpState::new(
            publisher.clone(),
            metrics.clone(),
            command_tx,
            config.site_id().to_string(),
            config.preview_content_type().to_string(),
        ));
        let http_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_http_server(http_port, state, http_shutdown).await {
                error!(error = %e, "HTTP server error");
            }
        });
    }

    // Start metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    let mut reporter_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        loop {
            tokio::select! {
                _ = interval.tick() => metrics_clone.report().log(),
                _ = reporter_shutdown.changed() => return,
            }
        }
    });

    // Serve until Ctrl+C; a finished replay keeps serving the last status
    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");
    let _ = shutdown_tx.send(true);

    if let Err(e) = pipeline_handle.await {
        error!(error = %e, "pipeline task failed");
    }

    let snapshot = publisher.read();
    info!(
        total = %snapshot.total,
        occupied = %snapshot.occupied,
        free = %snapshot.free,
        frames = %snapshot.frame,
        "zone-occupancy shutdown complete"
    );
    Ok(())
}
