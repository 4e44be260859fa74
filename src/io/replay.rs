//! JSONL frame replay from a file or stdin
//!
//! One detector frame per line. Blank lines are ignored, invalid lines are
//! counted and skipped. Unlike MQTT ingest, replay waits for queue space so
//! no recorded frame is dropped.

use crate::domain::types::DetectorFrame;
use crate::infra::metrics::Metrics;
use crate::io::frames::parse_frame;
use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

/// Replay summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub lines: u64,
    pub frames: u64,
    pub invalid: u64,
}

/// Replay `path` ("-" for stdin) into the frame channel
pub async fn start_replay(
    path: &str,
    frame_interval_ms: u64,
    frame_tx: mpsc::Sender<DetectorFrame>,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<ReplayStats> {
    let interval = Duration::from_millis(frame_interval_ms);
    let stats = if path == "-" {
        info!(source = "stdin", "replay_started");
        replay_lines(BufReader::new(tokio::io::stdin()), interval, frame_tx, &metrics, shutdown).await?
    } else {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open replay file {path}"))?;
        info!(source = %path, "replay_started");
        replay_lines(BufReader::new(file), interval, frame_tx, &metrics, shutdown).await?
    };

    info!(lines = %stats.lines, frames = %stats.frames, invalid = %stats.invalid, "replay_finished");
    Ok(stats)
}

/// Replay every line of `reader`; stops early on shutdown or a closed channel
pub async fn replay_lines<R>(
    reader: R,
    interval: Duration,
    frame_tx: mpsc::Sender<DetectorFrame>,
    metrics: &Metrics,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<ReplayStats>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut stats = ReplayStats::default();

    while let Some(line) = lines.next_line().await.context("Failed to read replay input")? {
        stats.lines += 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let frame = match parse_frame(line.as_bytes()) {
            Ok(frame) => frame,
            Err(e) => {
                stats.invalid += 1;
                metrics.record_frame_parse_error();
                warn!(line = %stats.lines, error = %e, "replay_line_invalid");
                continue;
            }
        };

        tokio::select! {
            sent = frame_tx.send(frame) => {
                if sent.is_err() {
                    warn!("Frame channel closed");
                    return Ok(stats);
                }
                stats.frames += 1;
            }
            _ = shutdown.changed() => {
                info!("replay_shutdown");
                return Ok(stats);
            }
        }

        if !interval.is_zero() {
            tokio::time::sleep(interval).await;
        }
    }

    Ok(stats)
}
