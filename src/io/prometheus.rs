//! Prometheus text exposition for the occupancy metrics
//!
//! Served at `GET /metrics` by the HTTP surface.

use crate::infra::metrics::{Metrics, MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(output: &mut String, name: &str, help: &str, typ: MetricType, site: &str, val: u64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in METRICS_BUCKET_BOUNDS.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
///
/// Reads a non-resetting snapshot so scrapes don't disturb the periodic reporter.
pub fn format_prometheus_metrics(metrics: &Metrics, site_id: &str) -> String {
    let summary = metrics.snapshot();
    let mut output = String::with_capacity(4096);

    write_frame_metrics(&mut output, site_id, &summary);
    write_latency_metrics(&mut output, site_id, &summary);
    write_occupancy_metrics(&mut output, site_id, &summary);
    write_command_metrics(&mut output, site_id, &summary);

    output
}

fn write_frame_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_metric(output, "occupancy_frames_total", "Frames processed by the engine", MetricType::Counter, site, s.frames_total);
    write_metric(output, "occupancy_frames_skipped_total", "Frames skipped by skip_frames", MetricType::Counter, site, s.frames_skipped);
    write_metric(output, "occupancy_frames_dropped_total", "Frames dropped due to channel full", MetricType::Counter, site, s.frames_dropped);
    write_metric(output, "occupancy_frame_parse_errors_total", "Detector payloads that failed to parse", MetricType::Counter, site, s.frame_parse_errors);
    write_metric(output, "occupancy_detections_total", "Raw detections received", MetricType::Counter, site, s.detections_total);
    write_metric(output, "occupancy_detections_admitted_total", "Detections passing the admission gate", MetricType::Counter, site, s.detections_admitted);
    write_metric(output, "occupancy_tracks_expired_total", "Track buffers expired for inactivity", MetricType::Counter, site, s.tracks_expired_total);
    write_metric(output, "occupancy_previews_total", "Preview artifacts published", MetricType::Counter, site, s.previews_published);
    write_metric(output, "occupancy_preview_errors_total", "Preview payloads that failed to decode", MetricType::Counter, site, s.preview_decode_errors);
    write_metric(output, "occupancy_frame_queue_depth", "Current frame queue depth", MetricType::Gauge, site, s.frame_queue_depth);
}

fn write_latency_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_histogram(
        output,
        "occupancy_frame_latency_us",
        "Frame processing latency in microseconds",
        site,
        &s.lat_buckets,
        s.avg_frame_latency_us,
    );
    write_metric(output, "occupancy_frame_latency_p50_us", "50th percentile frame latency", MetricType::Gauge, site, s.lat_p50_us);
    write_metric(output, "occupancy_frame_latency_p99_us", "99th percentile frame latency", MetricType::Gauge, site, s.lat_p99_us);
}

fn write_occupancy_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_metric(output, "occupancy_zones_total", "Configured zones", MetricType::Gauge, site, s.zones_total);
    write_metric(output, "occupancy_zones_occupied", "Zones currently occupied", MetricType::Gauge, site, s.zones_occupied);
    write_metric(
        output,
        "occupancy_zones_free",
        "Zones currently free",
        MetricType::Gauge,
        site,
        s.zones_total.saturating_sub(s.zones_occupied),
    );
    write_metric(output, "occupancy_active_tracks", "Live track buffers", MetricType::Gauge, site, s.active_tracks);
}

fn write_command_metrics(output: &mut String, site: &str, s: &MetricsSummary) {
    write_metric(output, "occupancy_zone_commands_total", "Zone commands applied", MetricType::Counter, site, s.zone_commands_total);
    write_metric(
        output,
        "occupancy_zone_commands_dropped_total",
        "Zone commands rejected due to queue full",
        MetricType::Counter,
        site,
        s.zone_commands_dropped,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(150, 3, 1);
        metrics.record_frame_processed(250, 2, 2);
        metrics.set_occupancy(4, 1, 3);

        let output = format_prometheus_metrics(&metrics, "lot_a");

        assert!(output.contains("occupancy_frames_total{site=\"lot_a\"} 2"));
        assert!(output.contains("occupancy_frame_latency_us_bucket{site=\"lot_a\",le=\"200\"} 1"));
        assert!(output.contains("occupancy_frame_latency_us_bucket{site=\"lot_a\",le=\"+Inf\"} 2"));
        assert!(output.contains("occupancy_zones_free{site=\"lot_a\"} 3"));
        assert!(output.contains("occupancy_detections_admitted_total{site=\"lot_a\"} 3"));
    }

    #[test]
    fn test_scrape_does_not_reset_reporter() {
        let metrics = Metrics::new();
        metrics.record_frame_processed(150, 0, 0);
        let _ = format_prometheus_metrics(&metrics, "lot_a");
        let summary = metrics.report();
        assert_eq!(summary.max_frame_latency_us, 150);
    }
}
