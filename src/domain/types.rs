//! Shared types for the zone occupancy service

use serde::{Deserialize, Serialize};

/// Newtype wrapper for tracker-assigned track IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct TrackId(pub i64);

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Newtype wrapper for detector class IDs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
pub struct ClassId(pub i32);

impl std::fmt::Display for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Integer pixel coordinate, serialized as `[x, y]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "[i32; 2]", into = "[i32; 2]")]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    #[inline]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl From<[i32; 2]> for Point {
    fn from([x, y]: [i32; 2]) -> Self {
        Self { x, y }
    }
}

impl From<Point> for [i32; 2] {
    fn from(p: Point) -> Self {
        [p.x, p.y]
    }
}

/// Axis-aligned box in corner form, serialized as `[x1, y1, x2, y2]`
///
/// Coordinates are inclusive pixel indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BoxXyxy {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl BoxXyxy {
    #[inline]
    pub const fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Clamp to a frame of `width` x `height` pixels
    ///
    /// The top-left corner is clamped to 0, the bottom-right corner to the
    /// last pixel. No reordering happens, so an inverted box stays degenerate.
    pub fn clamp_to(&self, width: u32, height: u32) -> Self {
        let max_x = last_pixel(width);
        let max_y = last_pixel(height);
        Self {
            x1: self.x1.max(0),
            y1: self.y1.max(0),
            x2: self.x2.min(max_x),
            y2: self.y2.min(max_y),
        }
    }

    /// Box area `(x2 - x1) * (y2 - y1)`, floored at 1
    #[inline]
    pub fn area(&self) -> i64 {
        let w = i64::from(self.x2) - i64::from(self.x1);
        let h = i64::from(self.y2) - i64::from(self.y1);
        (w * h).max(1)
    }
}

/// Index of the last pixel along an axis of `len` pixels, saturating at `i32::MAX`
#[inline]
pub fn last_pixel(len: u32) -> i32 {
    i32::try_from(len).unwrap_or(i32::MAX).saturating_sub(1).max(0)
}

impl From<[i32; 4]> for BoxXyxy {
    fn from([x1, y1, x2, y2]: [i32; 4]) -> Self {
        Self { x1, y1, x2, y2 }
    }
}

impl From<BoxXyxy> for [i32; 4] {
    fn from(b: BoxXyxy) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// Operator-defined quadrilateral, serialized as `[[x, y]; 4]`
///
/// Zones carry no identity beyond their index in the zone list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Zone {
    points: [Point; 4],
}

impl Zone {
    pub const fn new(points: [Point; 4]) -> Self {
        Self { points }
    }

    /// Axis-aligned rectangle zone, mostly useful for configs and tests
    pub const fn rect(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self::new([Point::new(x1, y1), Point::new(x2, y1), Point::new(x2, y2), Point::new(x1, y2)])
    }

    #[inline]
    pub fn points(&self) -> &[Point; 4] {
        &self.points
    }
}

impl TryFrom<&[Point]> for Zone {
    type Error = ZoneShapeError;

    fn try_from(points: &[Point]) -> Result<Self, Self::Error> {
        let points: [Point; 4] = points.try_into().map_err(|_| ZoneShapeError(points.len()))?;
        Ok(Self { points })
    }
}

/// A zone was built from a point list that is not exactly 4 points long
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneShapeError(pub usize);

impl std::fmt::Display for ZoneShapeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "zone needs exactly 4 points, got {}", self.0)
    }
}

impl std::error::Error for ZoneShapeError {}

/// One raw detection as reported by the detector/tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub track_id: TrackId,
    #[serde(rename = "box")]
    pub bbox: BoxXyxy,
    pub class_id: ClassId,
    pub confidence: f32,
}

/// Largest frame side accepted from the wire, in pixels
pub const MAX_FRAME_DIMENSION: u32 = 16_384;

/// Everything the detector hands over for one frame
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetectorFrame {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
    /// Base64-encoded preview artifact (opaque to the engine)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

impl DetectorFrame {
    pub fn new(width: u32, height: u32, detections: Vec<Detection>) -> Self {
        Self { width, height, detections, preview: None }
    }
}
