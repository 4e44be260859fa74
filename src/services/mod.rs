//! Services - occupancy logic and state management
//!
//! This module contains the core occupancy services:
//! - `smoother` - Per-track moving-average box smoothing
//! - `geometry` - Zone rasterization and box overlap
//! - `selector` - Admission gate and per-zone representative selection
//! - `hysteresis` - Bounded per-zone occupancy counters
//! - `zone_set` - Operator-editable zone list with cached masks
//! - `engine` - Per-frame composition of the above
//! - `status` - Latest-value status store for readers
//! - `pipeline` - Async task owning the engine

pub mod engine;
pub mod geometry;
pub mod hysteresis;
pub mod pipeline;
pub mod selector;
pub mod smoother;
pub mod status;
pub mod zone_set;

// Re-export commonly used types
pub use engine::{CommandOutcome, EngineConfig, FrameOutcome, OccupancyEngine, ZoneCommand};
pub use pipeline::FramePipeline;
pub use status::{OccupancyCounts, StatusPublisher, StatusSnapshot};
