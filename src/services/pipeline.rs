//! Frame pipeline - the single sequential owner of the occupancy engine
//!
//! Frames and operator commands arrive on separate bounded channels and are
//! handled one at a time on this task, so zone edits can never interleave
//! with a hysteresis step. The task lives until shutdown, even after the
//! frame source is gone. Results leave through the `StatusPublisher` and
//! the lock-free metrics.

use crate::domain::types::DetectorFrame;
use crate::infra::metrics::Metrics;
use crate::io::frames::decode_preview;
use crate::services::engine::{CommandOutcome, FrameOutcome, OccupancyEngine, ZoneCommand};
use crate::services::status::StatusPublisher;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct FramePipeline {
    engine: OccupancyEngine,
    publisher: Arc<StatusPublisher>,
    metrics: Arc<Metrics>,
    /// Frames skipped between processed frames
    skip_frames: u32,
    /// Frames received, processed or not
    received: u64,
    /// Occupied flags after the last step, for transition logging
    last_flags: Vec<bool>,
}

impl FramePipeline {
    pub fn new(
        engine: OccupancyEngine,
        publisher: Arc<StatusPublisher>,
        metrics: Arc<Metrics>,
        skip_frames: u32,
    ) -> Self {
        let last_flags = vec![false; engine.zones().len()];
        metrics.set_occupancy(engine.zones().len(), 0, 0);
        publisher.publish_counts(engine.counts(), 0);
        publisher.publish_any_class(engine.any_class());
        Self { engine, publisher, metrics, skip_frames, received: 0, last_flags }
    }

    /// Run until shutdown
    ///
    /// A closed frame source only stops frame intake; operator commands keep
    /// being applied and published until shutdown.
    pub async fn run(
        mut self,
        mut frames: mpsc::Receiver<DetectorFrame>,
        mut commands: mpsc::Receiver<ZoneCommand>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!(zones = %self.engine.zones().len(), skip_frames = %self.skip_frames, "pipeline_started");

        let mut frames_open = true;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(frames = %self.engine.frames_processed(), "pipeline_shutdown");
                        return;
                    }
                }
                Some(command) = commands.recv() => {
                    self.handle_command(command);
                }
                maybe_frame = frames.recv(), if frames_open => {
                    match maybe_frame {
                        Some(frame) => {
                            self.metrics.set_frame_queue_depth(frames.len() as u64);
                            self.handle_frame(frame);
                        }
                        None => {
                            frames_open = false;
                            self.metrics.set_frame_queue_depth(0);
                            info!(frames = %self.engine.frames_processed(), "frame_source_closed");
                        }
                    }
                }
            }
        }
    }

    /// Handle one received frame; returns the outcome when it was processed
    pub fn handle_frame(&mut self, frame: DetectorFrame) -> Option<FrameOutcome> {
        let index = self.received;
        self.received += 1;
        if index % (u64::from(self.skip_frames) + 1) != 0 {
            self.metrics.record_frame_skipped();
            return None;
        }

        let start = Instant::now();
        let outcome = self.engine.process_frame(&frame);

        self.publisher.publish_counts(outcome.counts, outcome.frame);
        if let Some(encoded) = frame.preview.as_deref() {
            match decode_preview(encoded) {
                Ok(bytes) => {
                    self.publisher.publish_preview(bytes);
                    self.metrics.record_preview(true);
                }
                Err(e) => {
                    self.metrics.record_preview(false);
                    warn!(frame = %outcome.frame, error = %e, "preview_decode_failed");
                }
            }
        }

        self.log_transitions(&outcome);

        let latency_us = start.elapsed().as_micros() as u64;
        self.metrics.record_frame_processed(latency_us, frame.detections.len(), outcome.admitted);
        self.metrics.record_tracks_expired(outcome.tracks_expired);
        self.metrics.set_occupancy(
            outcome.counts.total,
            outcome.counts.occupied,
            self.engine.active_tracks(),
        );

        debug!(
            frame = %outcome.frame,
            detections = %frame.detections.len(),
            admitted = %outcome.admitted,
            occupied = %outcome.counts.occupied,
            free = %outcome.counts.free,
            latency_us = %latency_us,
            "frame_processed"
        );

        Some(outcome)
    }

    /// Apply an operator command between frames
    pub fn handle_command(&mut self, command: ZoneCommand) -> CommandOutcome {
        let kind = command.as_str();
        let outcome = self.engine.apply(command);
        self.metrics.record_zone_command();

        // Flags follow the counters: removed tails vanish, appended zones start free
        self.last_flags = self.engine.occupied_flags();

        let counts = self.engine.counts();
        self.publisher.publish_counts(counts, self.engine.frames_processed());
        self.publisher.publish_any_class(self.engine.any_class());
        self.metrics.set_occupancy(counts.total, counts.occupied, self.engine.active_tracks());

        info!(
            command = %kind,
            zones_before = %outcome.zones_before,
            zones_after = %outcome.zones_after,
            draft_points = %outcome.draft_points,
            any_class = %self.engine.any_class(),
            "zone_command_applied"
        );
        outcome
    }

    fn log_transitions(&mut self, outcome: &FrameOutcome) {
        self.last_flags.resize(outcome.occupied.len(), false);
        for (idx, (&now, prev)) in outcome.occupied.iter().zip(self.last_flags.iter_mut()).enumerate() {
            if now == *prev {
                continue;
            }
            if now {
                let track = outcome.matches.get(idx).and_then(|m| m.as_ref()).map(|m| m.track_id.0);
                info!(zone = %idx, frame = %outcome.frame, track_id = ?track, "zone_occupied");
            } else {
                info!(zone = %idx, frame = %outcome.frame, "zone_released");
            }
            *prev = now;
        }
    }

    #[inline]
    pub fn engine(&self) -> &OccupancyEngine {
        &self.engine
    }

    #[inline]
    pub fn frames_received(&self) -> u64 {
        self.received
    }
}
