//! Zone rasterization and box overlap
//!
//! A zone is rasterized once per frame size into per-row pixel spans. The
//! overlap of a box is then a row-by-row span intersection, which gives the
//! same counts as intersecting two binary masks without allocating them.

use crate::domain::types::{last_pixel, BoxXyxy, Point, Zone};
use smallvec::SmallVec;

/// Tolerance for pixels lying exactly on a slanted edge
const EDGE_EPS: f64 = 1e-9;

/// Inclusive pixel run `[start, end]` on one row
type Span = (i32, i32);

/// Rasterized zone at a fixed frame resolution
#[derive(Debug, Clone)]
pub struct ZoneMask {
    width: u32,
    height: u32,
    /// Frame row of `rows[0]`
    first_row: i32,
    /// rows[y - first_row] = sorted, non-overlapping spans covered by the zone
    rows: Vec<SmallVec<[Span; 2]>>,
}

impl ZoneMask {
    /// Rasterize `zone` into a `width` x `height` frame
    ///
    /// Boundary pixels are part of the zone. Self-intersecting quadrilaterals
    /// are filled with the even-odd rule. Only rows the zone can touch are
    /// stored, so memory follows the zone, not the frame.
    pub fn rasterize(zone: &Zone, width: u32, height: u32) -> Self {
        let mut mask = Self { width, height, first_row: 0, rows: Vec::new() };
        if width == 0 || height == 0 {
            return mask;
        }

        let pts = zone.points();
        let max_x = last_pixel(width);
        let max_y = last_pixel(height);
        let y_lo = pts.iter().map(|p| p.y).min().unwrap_or(0).max(0);
        let y_hi = pts.iter().map(|p| p.y).max().unwrap_or(-1).min(max_y);
        if y_lo > y_hi {
            return mask;
        }

        mask.first_row = y_lo;
        let row_count = (i64::from(y_hi) - i64::from(y_lo) + 1) as usize;
        mask.rows = Vec::with_capacity(row_count);
        for y in y_lo..=y_hi {
            let mut spans = row_spans(pts, y);
            for span in spans.iter_mut() {
                span.0 = span.0.max(0);
                span.1 = span.1.min(max_x);
            }
            spans.retain(|s| s.0 <= s.1);
            mask.rows.push(merge_spans(spans));
        }

        mask
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of pixels covered by the zone
    pub fn area(&self) -> u64 {
        self.rows.iter().flatten().map(|&(a, b)| (i64::from(b) - i64::from(a) + 1) as u64).sum()
    }

    /// Pixels shared by the zone and the inclusive box rectangle
    pub fn intersection(&self, bbox: &BoxXyxy) -> u64 {
        if bbox.x2 < bbox.x1 || bbox.y2 < bbox.y1 || self.rows.is_empty() {
            return 0;
        }
        let last_row = i64::from(self.first_row) + self.rows.len() as i64 - 1;
        let y_start = i64::from(bbox.y1).max(i64::from(self.first_row));
        let y_end = i64::from(bbox.y2).min(last_row);
        if y_start > y_end {
            return 0;
        }

        let offset = i64::from(self.first_row);
        let mut count = 0u64;
        for row in &self.rows[(y_start - offset) as usize..=(y_end - offset) as usize] {
            for &(a, b) in row {
                let lo = a.max(bbox.x1);
                let hi = b.min(bbox.x2);
                if hi >= lo {
                    count += (i64::from(hi) - i64::from(lo) + 1) as u64;
                }
            }
        }
        count
    }

    /// Fraction of the box covered by the zone, in `[0, 1]`
    ///
    /// Normalized by the box area (floored at 1), not the zone area.
    pub fn overlap_ratio(&self, bbox: &BoxXyxy) -> f64 {
        let inter = self.intersection(bbox) as f64;
        (inter / bbox.area() as f64).clamp(0.0, 1.0)
    }
}

/// Spans of row `y` before clipping and merging
fn row_spans(pts: &[Point; 4], y: i32) -> SmallVec<[Span; 4]> {
    let yf = f64::from(y);
    let mut crossings: SmallVec<[f64; 4]> = SmallVec::new();
    let mut spans: SmallVec<[Span; 4]> = SmallVec::new();

    for i in 0..pts.len() {
        let a = pts[i];
        let b = pts[(i + 1) % pts.len()];

        if a.y == b.y {
            // Horizontal edge lies on exactly one row
            if a.y == y {
                spans.push((a.x.min(b.x), a.x.max(b.x)));
            }
            continue;
        }

        let (lo, hi) = if a.y < b.y { (a, b) } else { (b, a) };
        if y >= lo.y && y < hi.y {
            let t = (yf - f64::from(lo.y)) / (f64::from(hi.y) - f64::from(lo.y));
            crossings.push(f64::from(lo.x) + t * (f64::from(hi.x) - f64::from(lo.x)));
        }
    }

    crossings.sort_by(|a, b| a.total_cmp(b));
    for pair in crossings.chunks_exact(2) {
        let start = (pair[0] - EDGE_EPS).ceil() as i32;
        let end = (pair[1] + EDGE_EPS).floor() as i32;
        if start <= end {
            spans.push((start, end));
        }
    }

    // Vertices sitting on this row (covers apexes the half-open rule skips)
    for p in pts.iter().filter(|p| p.y == y) {
        spans.push((p.x, p.x));
    }

    spans
}

fn merge_spans(mut spans: SmallVec<[Span; 4]>) -> SmallVec<[Span; 2]> {
    spans.sort_unstable();
    let mut merged: SmallVec<[Span; 2]> = SmallVec::new();
    for (a, b) in spans {
        match merged.last_mut() {
            Some(last) if a <= last.1 + 1 => last.1 = last.1.max(b),
            _ => merged.push((a, b)),
        }
    }
    merged
}
