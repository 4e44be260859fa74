//! Domain models - core types shared by the engine and its adapters
//!
//! - `Zone`, `Point`, `BoxXyxy` - frame geometry
//! - `Detection`, `DetectorFrame` - per-frame detector output
//! - `ClassTable` - class id to name lookup and obstacle allow-list

pub mod classes;
pub mod types;

// Re-export commonly used types at module level
pub use classes::ClassTable;
pub use types::{BoxXyxy, ClassId, Detection, DetectorFrame, Point, TrackId, Zone};
