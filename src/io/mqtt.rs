//! MQTT client for receiving detector frames

use crate::domain::types::DetectorFrame;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::frames::parse_frame;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

/// What happened to one incoming payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Forwarded {
    Queued,
    Dropped,
    Invalid,
    Closed,
}

/// Rate-limits a warning to at most one per second
struct WarnThrottle {
    last: Option<Instant>,
}

impl WarnThrottle {
    fn new() -> Self {
        Self { last: None }
    }

    fn ready(&mut self) -> bool {
        if self.last.is_some_and(|t| t.elapsed() <= Duration::from_secs(1)) {
            return false;
        }
        self.last = Some(Instant::now());
        true
    }
}

/// Parse a payload and hand it to the pipeline without blocking
fn forward_payload(payload: &[u8], frame_tx: &mpsc::Sender<DetectorFrame>, metrics: &Metrics) -> Forwarded {
    let frame = match parse_frame(payload) {
        Ok(frame) => frame,
        Err(e) => {
            metrics.record_frame_parse_error();
            debug!(error = %e, bytes = %payload.len(), "frame_parse_failed");
            return Forwarded::Invalid;
        }
    };

    match frame_tx.try_send(frame) {
        Ok(()) => Forwarded::Queued,
        Err(TrySendError::Full(_)) => {
            metrics.record_frame_dropped();
            Forwarded::Dropped
        }
        Err(TrySendError::Closed(_)) => Forwarded::Closed,
    }
}

/// Start the MQTT client and send parsed frames to the channel
///
/// Frames are sent via try_send to avoid blocking the MQTT eventloop.
/// Dropped and unparsable payloads are counted in metrics and logged (rate-limited).
pub async fn start_mqtt_client(
    config: &Config,
    frame_tx: mpsc::Sender<DetectorFrame>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("zone-occupancy-{}", config.site_id());
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));
    // Frames carry an optional preview image
    mqttoptions.set_max_packet_size(8 * 1024 * 1024, 8 * 1024 * 1024);

    // Set credentials if configured
    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }

    let (client, mut eventloop) = AsyncClient::new(mqttoptions, 100);
    client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await?;

    info!(topic = %config.mqtt_topic(), host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_subscribed");

    let mut drop_warn = WarnThrottle::new();
    let mut parse_warn = WarnThrottle::new();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        match forward_payload(&publish.payload, &frame_tx, &metrics) {
                            Forwarded::Queued => {}
                            Forwarded::Dropped => {
                                if drop_warn.ready() {
                                    warn!(dropped = %metrics.frames_dropped(), "mqtt_frame_dropped: channel full");
                                }
                            }
                            Forwarded::Invalid => {
                                if parse_warn.ready() {
                                    warn!(topic = %publish.topic, errors = %metrics.frame_parse_errors(), "mqtt_frame_invalid");
                                }
                            }
                            Forwarded::Closed => {
                                warn!("Frame channel closed");
                                return Ok(());
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("MQTT connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "MQTT error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FRAME: &[u8] = br#"{"width":100,"height":100,"detections":[]}"#;

    #[test]
    fn test_forward_valid_frame() {
        let (tx, mut rx) = mpsc::channel(2);
        let metrics = Metrics::new();
        assert_eq!(forward_payload(FRAME, &tx, &metrics), Forwarded::Queued);
        let frame = rx.try_recv().unwrap();
        assert_eq!(frame.width, 100);
    }

    #[test]
    fn test_forward_invalid_payload_counted() {
        let (tx, mut rx) = mpsc::channel(2);
        let metrics = Metrics::new();
        assert_eq!(forward_payload(b"{broken", &tx, &metrics), Forwarded::Invalid);
        assert_eq!(metrics.frame_parse_errors(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_forward_full_channel_drops() {
        let (tx, _rx) = mpsc::channel(1);
        let metrics = Metrics::new();
        assert_eq!(forward_payload(FRAME, &tx, &metrics), Forwarded::Queued);
        assert_eq!(forward_payload(FRAME, &tx, &metrics), Forwarded::Dropped);
        assert_eq!(metrics.frames_dropped(), 1);
    }

    #[test]
    fn test_forward_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let metrics = Metrics::new();
        assert_eq!(forward_payload(FRAME, &tx, &metrics), Forwarded::Closed);
    }

    #[test]
    fn test_warn_throttle() {
        let mut throttle = WarnThrottle::new();
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }

    #[test]
    fn test_warn_throttle_reopens_after_window() {
        let mut throttle = WarnThrottle::new();
        assert!(throttle.last.is_none());
        assert!(throttle.ready());
        throttle.last = Instant::now().checked_sub(Duration::from_secs(2));
        assert!(throttle.ready());
        assert!(!throttle.ready());
    }
}
