//! Operator-editable zone list
//!
//! The list only supports whole replace, append-one, remove-last and
//! remove-all, so per-index state held elsewhere can always be reconciled by
//! resizing from the tail. Rasterized masks are cached per frame size and
//! dropped on every mutation.

use crate::domain::types::{Point, Zone};
use crate::services::geometry::ZoneMask;
use smallvec::SmallVec;

pub struct ZoneSet {
    zones: Vec<Zone>,
    /// Points clicked so far for the next zone
    draft: SmallVec<[Point; 4]>,
    /// Masks for `zones` at `mask_size`, rebuilt lazily
    masks: Vec<ZoneMask>,
    mask_size: Option<(u32, u32)>,
    /// Bumped on every mutation
    generation: u64,
}

impl ZoneSet {
    pub fn new(zones: Vec<Zone>) -> Self {
        Self { zones, draft: SmallVec::new(), masks: Vec::new(), mask_size: None, generation: 0 }
    }

    pub fn replace(&mut self, zones: Vec<Zone>) {
        self.zones = zones;
        self.invalidate();
    }

    pub fn append(&mut self, zone: Zone) {
        self.zones.push(zone);
        self.invalidate();
    }

    pub fn remove_last(&mut self) -> Option<Zone> {
        let removed = self.zones.pop();
        if removed.is_some() {
            self.invalidate();
        }
        removed
    }

    /// Remove every zone, returning how many were removed
    pub fn remove_all(&mut self) -> usize {
        let removed = self.zones.len();
        self.zones.clear();
        if removed > 0 {
            self.invalidate();
        }
        removed
    }

    /// Add one point of the 4-click gesture
    ///
    /// The fourth point closes the draft into a zone, which is appended and
    /// returned.
    pub fn push_point(&mut self, point: Point) -> Option<Zone> {
        self.draft.push(point);
        if self.draft.len() < 4 {
            return None;
        }
        let zone = Zone::try_from(&self.draft[..]).ok();
        self.draft.clear();
        if let Some(zone) = zone {
            self.append(zone);
        }
        zone
    }

    pub fn clear_draft(&mut self) {
        self.draft.clear();
    }

    #[inline]
    pub fn draft(&self) -> &[Point] {
        &self.draft
    }

    #[inline]
    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.zones.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Masks for every zone at the given frame size, in zone order
    pub fn masks(&mut self, width: u32, height: u32) -> &[ZoneMask] {
        if self.mask_size != Some((width, height)) || self.masks.len() != self.zones.len() {
            self.masks =
                self.zones.iter().map(|z| ZoneMask::rasterize(z, width, height)).collect();
            self.mask_size = Some((width, height));
        }
        &self.masks
    }

    fn invalidate(&mut self) {
        self.masks.clear();
        self.mask_size = None;
        self.generation += 1;
    }
}
