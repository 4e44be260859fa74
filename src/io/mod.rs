//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `frames` - Detector frame JSON format and preview decoding
//! - `mqtt` - MQTT client for receiving detector frames
//! - `replay` - JSONL frame replay from file or stdin
//! - `http` - Status, preview and operator HTTP endpoint
//! - `prometheus` - Prometheus text formatting for `/metrics`

pub mod frames;
pub mod http;
pub mod mqtt;
pub mod prometheus;
pub mod replay;

// Re-export commonly used types
pub use frames::{decode_preview, parse_frame};
pub use http::{start_http_server, HttpState};
pub use mqtt::start_mqtt_client;
pub use replay::{start_replay, ReplayStats};
