//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering—these are statistical counters only.
//! Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Read all buckets without resetting them
#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total frames processed by the engine (monotonic)
    frames_total: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of frame latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max frame latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Frame processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Frames received but skipped by the frame-skip setting (monotonic)
    frames_skipped: AtomicU64,
    /// Frames dropped at ingest because the pipeline queue was full (monotonic)
    frames_dropped: AtomicU64,
    /// Detector payloads that failed to parse (monotonic)
    frame_parse_errors: AtomicU64,
    /// Raw detections seen (monotonic)
    detections_total: AtomicU64,
    /// Detections that passed the admission gate (monotonic)
    detections_admitted: AtomicU64,
    /// Zone commands applied (monotonic)
    zone_commands_total: AtomicU64,
    /// Zone commands rejected because the command queue was full (monotonic)
    zone_commands_dropped: AtomicU64,
    /// Track buffers expired for inactivity (monotonic)
    tracks_expired_total: AtomicU64,
    /// Preview artifacts published (monotonic)
    previews_published: AtomicU64,
    /// Preview payloads that failed to decode (monotonic)
    preview_decode_errors: AtomicU64,
    /// Current zone count
    zones_total: AtomicU64,
    /// Current occupied zone count
    zones_occupied: AtomicU64,
    /// Current live track buffers
    active_tracks: AtomicU64,
    /// Current frame queue depth (updated by sampler)
    frame_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter, not atomic)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            frames_skipped: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frame_parse_errors: AtomicU64::new(0),
            detections_total: AtomicU64::new(0),
            detections_admitted: AtomicU64::new(0),
            zone_commands_total: AtomicU64::new(0),
            zone_commands_dropped: AtomicU64::new(0),
            tracks_expired_total: AtomicU64::new(0),
            previews_published: AtomicU64::new(0),
            preview_decode_errors: AtomicU64::new(0),
            zones_total: AtomicU64::new(0),
            zones_occupied: AtomicU64::new(0),
            active_tracks: AtomicU64::new(0),
            frame_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a frame was processed with given latency (lock-free)
    #[inline]
    pub fn record_frame_processed(&self, latency_us: u64, detections: usize, admitted: usize) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.detections_total.fetch_add(detections as u64, Ordering::Relaxed);
        self.detections_admitted.fetch_add(admitted as u64, Ordering::Relaxed);

        // Update histogram bucket
        let bucket = bucket_index(latency_us);
        self.latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        // Update max
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    /// Set point-in-time occupancy gauges
    #[inline]
    pub fn set_occupancy(&self, zones_total: usize, zones_occupied: usize, active_tracks: usize) {
        self.zones_total.store(zones_total as u64, Ordering::Relaxed);
        self.zones_occupied.store(zones_occupied as u64, Ordering::Relaxed);
        self.active_tracks.store(active_tracks as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_skipped(&self) {
        self.frames_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped due to channel full (lock-free)
    #[inline]
    pub fn record_frame_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_frame_parse_error(&self) {
        self.frame_parse_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_command(&self) {
        self.zone_commands_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_command_dropped(&self) {
        self.zone_commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tracks_expired(&self, count: usize) {
        self.tracks_expired_total.fetch_add(count as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_preview(&self, decoded: bool) {
        if decoded {
            self.previews_published.fetch_add(1, Ordering::Relaxed);
        } else {
            self.preview_decode_errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Set current frame queue depth (called by sampler)
    #[inline]
    pub fn set_frame_queue_depth(&self, depth: u64) {
        self.frame_queue_depth.store(depth, Ordering::Relaxed);
    }

    /// Get total frames processed
    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frame_parse_errors(&self) -> u64 {
        self.frame_parse_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zone_commands_total(&self) -> u64 {
        self.zone_commands_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn zone_commands_dropped(&self) -> u64 {
        self.zone_commands_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn previews_published(&self) -> u64 {
        self.previews_published.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn preview_decode_errors(&self) -> u64 {
        self.preview_decode_errors.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Same as `report()` but leaves the periodic counters untouched
    ///
    /// Used by scrapers so they don't steal the reporter's interval.
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let (frames_count, latency_sum, max_latency, lat_buckets) = if reset {
            (
                self.frames_since_report.swap(0, Ordering::Relaxed),
                self.latency_sum_us.swap(0, Ordering::Relaxed),
                self.latency_max_us.swap(0, Ordering::Relaxed),
                swap_buckets(&self.latency_buckets),
            )
        } else {
            (
                self.frames_since_report.load(Ordering::Relaxed),
                self.latency_sum_us.load(Ordering::Relaxed),
                self.latency_max_us.load(Ordering::Relaxed),
                load_buckets(&self.latency_buckets),
            )
        };

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            if reset {
                *last = Instant::now();
            }
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_per_sec,
            avg_frame_latency_us: avg_latency,
            max_frame_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            frame_parse_errors: self.frame_parse_errors.load(Ordering::Relaxed),
            detections_total: self.detections_total.load(Ordering::Relaxed),
            detections_admitted: self.detections_admitted.load(Ordering::Relaxed),
            zone_commands_total: self.zone_commands_total.load(Ordering::Relaxed),
            zone_commands_dropped: self.zone_commands_dropped.load(Ordering::Relaxed),
            tracks_expired_total: self.tracks_expired_total.load(Ordering::Relaxed),
            previews_published: self.previews_published.load(Ordering::Relaxed),
            preview_decode_errors: self.preview_decode_errors.load(Ordering::Relaxed),
            zones_total: self.zones_total.load(Ordering::Relaxed),
            zones_occupied: self.zones_occupied.load(Ordering::Relaxed),
            active_tracks: self.active_tracks.load(Ordering::Relaxed),
            frame_queue_depth: self.frame_queue_depth.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_us: u64,
    pub max_frame_latency_us: u64,
    /// Frame processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub frames_skipped: u64,
    pub frames_dropped: u64,
    pub frame_parse_errors: u64,
    pub detections_total: u64,
    pub detections_admitted: u64,
    pub zone_commands_total: u64,
    pub zone_commands_dropped: u64,
    pub tracks_expired_total: u64,
    pub previews_published: u64,
    pub preview_decode_errors: u64,
    pub zones_total: u64,
    pub zones_occupied: u64,
    pub active_tracks: u64,
    pub frame_queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.1}", self.frames_per_sec),
            avg_latency_us = %self.avg_frame_latency_us,
            max_latency_us = %self.max_frame_latency_us,
            p99_us = %self.lat_p99_us,
            zones = %self.zones_total,
            occupied = %self.zones_occupied,
            tracks = %self.active_tracks,
            dropped = %self.frames_dropped,
            parse_errors = %self.frame_parse_errors,
            "metrics"
        );
    }
}
