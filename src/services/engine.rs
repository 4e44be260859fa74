//! Zone occupancy engine
//!
//! Turns one detector frame at a time into per-zone occupancy:
//! clamp -> smooth -> admit -> select -> sync -> hysteresis -> counts.
//! The engine is strictly sequential and owns all per-frame state. Zone edits
//! go through `apply` on the same owner so they never interleave with a step.

use crate::domain::classes::ClassTable;
use crate::domain::types::{DetectorFrame, Point, Zone};
use crate::services::hysteresis::OccupancyCounters;
use crate::services::selector::{select_candidates, Admission, Candidate, ZoneMatch};
use crate::services::smoother::TrackSmoother;
use crate::services::status::OccupancyCounts;
use crate::services::zone_set::ZoneSet;
use tracing::debug;

/// Every engine tunable, fixed at construction except `any_class_as_obstacle`
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub conf_threshold: f32,
    pub overlap_threshold: f64,
    pub min_box_area: i64,
    pub confirm_frames: u32,
    pub release_frames: u32,
    pub smoothing_window: usize,
    /// Frames a track buffer survives without an observation
    pub track_idle_frames: u64,
    pub any_class_as_obstacle: bool,
    pub allowed_classes: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            conf_threshold: 0.35,
            overlap_threshold: 0.2,
            min_box_area: 300,
            confirm_frames: 3,
            release_frames: 2,
            smoothing_window: 3,
            track_idle_frames: 30,
            any_class_as_obstacle: false,
            allowed_classes: ["car", "truck", "bus", "motorcycle", "bicycle"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Operator edits and runtime toggles, applied between frames
#[derive(Debug, Clone, PartialEq)]
pub enum ZoneCommand {
    Replace(Vec<Zone>),
    Append(Zone),
    /// One click of the 4-point drawing gesture
    AddPoint(Point),
    ClearDraft,
    RemoveLast,
    RemoveAll,
    SetAnyClass(bool),
}

impl ZoneCommand {
    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneCommand::Replace(_) => "replace",
            ZoneCommand::Append(_) => "append",
            ZoneCommand::AddPoint(_) => "add_point",
            ZoneCommand::ClearDraft => "clear_draft",
            ZoneCommand::RemoveLast => "remove_last",
            ZoneCommand::RemoveAll => "remove_all",
            ZoneCommand::SetAnyClass(_) => "set_any_class",
        }
    }
}

/// What a command changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandOutcome {
    pub zones_before: usize,
    pub zones_after: usize,
    /// Points pending in the drawing gesture after the command
    pub draft_points: usize,
}

/// Result of one processed frame
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub frame: u64,
    pub counts: OccupancyCounts,
    /// Occupied flag per zone, in zone order
    pub occupied: Vec<bool>,
    /// Representative detection per zone, in zone order
    pub matches: Vec<Option<ZoneMatch>>,
    /// Detections that passed the admission gate
    pub admitted: usize,
    /// Track buffers dropped for inactivity during this frame
    pub tracks_expired: usize,
}

pub struct OccupancyEngine {
    config: EngineConfig,
    classes: ClassTable,
    smoother: TrackSmoother,
    zones: ZoneSet,
    counters: OccupancyCounters,
    frame: u64,
    any_class: bool,
}

impl OccupancyEngine {
    pub fn new(config: EngineConfig, classes: ClassTable, zones: Vec<Zone>) -> Self {
        let smoother = TrackSmoother::new(config.smoothing_window, config.track_idle_frames);
        let mut counters = OccupancyCounters::new(config.confirm_frames, config.release_frames);
        counters.sync(zones.len());
        let any_class = config.any_class_as_obstacle;
        Self { config, classes, smoother, zones: ZoneSet::new(zones), counters, frame: 0, any_class }
    }

    /// Process one frame
    ///
    /// A frame without detections is a normal frame: every counter decays.
    pub fn process_frame(&mut self, frame: &DetectorFrame) -> FrameOutcome {
        self.frame += 1;
        let frame_idx = self.frame;

        let admission = Admission {
            conf_threshold: self.config.conf_threshold,
            min_box_area: self.config.min_box_area,
            any_class: self.any_class,
        };

        let mut candidates = Vec::with_capacity(frame.detections.len());
        for det in &frame.detections {
            let clamped = det.bbox.clamp_to(frame.width, frame.height);
            let (bbox, confidence) =
                self.smoother.observe(det.track_id, clamped, det.confidence, frame_idx);
            let candidate =
                Candidate { track_id: det.track_id, bbox, class_id: det.class_id, confidence };
            if admission.admits(&candidate, &self.classes) {
                candidates.push(candidate);
            }
        }

        let zone_count = self.zones.len();
        let masks = self.zones.masks(frame.width, frame.height);
        let matches = select_candidates(
            zone_count,
            &candidates,
            self.config.overlap_threshold,
            |idx, bbox| masks[idx].overlap_ratio(bbox),
        );

        self.counters.sync(zone_count);
        let matched: Vec<bool> = matches.iter().map(Option::is_some).collect();
        self.counters.step(&matched);

        let tracks_expired = self.smoother.expire_idle(frame_idx);
        if tracks_expired > 0 {
            debug!(frame = %frame_idx, expired = %tracks_expired, live = %self.smoother.len(), "track_buffers_expired");
        }

        let counts = OccupancyCounts::from_occupied(zone_count, self.counters.occupied_count());
        FrameOutcome {
            frame: frame_idx,
            counts,
            occupied: self.counters.flags(),
            matches,
            admitted: candidates.len(),
            tracks_expired,
        }
    }

    /// Apply an operator command and resynchronize counters in the same step
    pub fn apply(&mut self, command: ZoneCommand) -> CommandOutcome {
        let zones_before = self.zones.len();
        match command {
            ZoneCommand::Replace(zones) => self.zones.replace(zones),
            ZoneCommand::Append(zone) => self.zones.append(zone),
            ZoneCommand::AddPoint(point) => {
                self.zones.push_point(point);
            }
            ZoneCommand::ClearDraft => self.zones.clear_draft(),
            ZoneCommand::RemoveLast => {
                self.zones.remove_last();
            }
            ZoneCommand::RemoveAll => {
                self.zones.remove_all();
            }
            ZoneCommand::SetAnyClass(enabled) => self.any_class = enabled,
        }
        self.counters.sync(self.zones.len());

        CommandOutcome {
            zones_before,
            zones_after: self.zones.len(),
            draft_points: self.zones.draft().len(),
        }
    }

    pub fn set_any_class(&mut self, enabled: bool) {
        self.any_class = enabled;
    }

    #[inline]
    pub fn any_class(&self) -> bool {
        self.any_class
    }

    #[inline]
    pub fn zones(&self) -> &[Zone] {
        self.zones.zones()
    }

    #[inline]
    pub fn counters(&self) -> &[i32] {
        self.counters.counters()
    }

    /// Occupied flag per zone, in zone order
    pub fn occupied_flags(&self) -> Vec<bool> {
        self.counters.flags()
    }

    #[inline]
    pub fn frames_processed(&self) -> u64 {
        self.frame
    }

    /// Live track buffers held by the smoother
    #[inline]
    pub fn active_tracks(&self) -> usize {
        self.smoother.len()
    }

    pub fn counts(&self) -> OccupancyCounts {
        OccupancyCounts::from_occupied(self.zones.len(), self.counters.occupied_count())
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn classes(&self) -> &ClassTable {
        &self.classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{BoxXyxy, ClassId, Detection, TrackId};
    use std::collections::BTreeMap;

    const W: u32 = 1020;
    const H: u32 = 500;

    fn classes() -> ClassTable {
        ClassTable::new(
            BTreeMap::from([(ClassId(0), "person".to_string()), (ClassId(2), "car".to_string())]),
            ["car"],
        )
    }

    fn engine(zones: Vec<Zone>) -> OccupancyEngine {
        OccupancyEngine::new(EngineConfig::default(), classes(), zones)
    }

    fn car(track: i64, bbox: BoxXyxy) -> Detection {
        Detection { track_id: TrackId(track), bbox, class_id: ClassId(2), confidence: 0.9 }
    }

    fn frame(detections: Vec<Detection>) -> DetectorFrame {
        DetectorFrame::new(W, H, detections)
    }

    fn parked() -> Vec<Detection> {
        vec![car(1, BoxXyxy::new(20, 20, 80, 80))]
    }

    #[test]
    fn test_occupied_exactly_on_third_frame() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100)]);

        assert_eq!(e.process_frame(&frame(parked())).occupied, vec![false]);
        assert_eq!(e.process_frame(&frame(parked())).occupied, vec![false]);
        let third = e.process_frame(&frame(parked()));
        assert_eq!(third.occupied, vec![true]);
        assert_eq!(third.counts, OccupancyCounts { total: 1, free: 0, occupied: 1 });

        let fourth = e.process_frame(&frame(Vec::new()));
        assert_eq!(fourth.occupied, vec![false]);
        assert_eq!(e.counters(), &[2]);
    }

    #[test]
    fn test_empty_frame_decays() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100), Zone::rect(200, 0, 300, 100)]);
        e.process_frame(&frame(Vec::new()));
        e.process_frame(&frame(Vec::new()));
        e.process_frame(&frame(Vec::new()));
        assert_eq!(e.counters(), &[-2, -2]);
        assert_eq!(e.frames_processed(), 3);
    }

    #[test]
    fn test_filtered_detections_do_not_match() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100)]);
        let person = Detection {
            track_id: TrackId(1),
            bbox: BoxXyxy::new(20, 20, 80, 80),
            class_id: ClassId(0),
            confidence: 0.9,
        };
        let weak = Detection { confidence: 0.1, ..car(2, BoxXyxy::new(20, 20, 80, 80)) };
        let tiny = car(3, BoxXyxy::new(20, 20, 30, 30));

        let out = e.process_frame(&frame(vec![person, weak, tiny]));
        assert_eq!(out.admitted, 0);
        assert!(out.matches[0].is_none());
    }

    #[test]
    fn test_any_class_mode_admits_people() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100)]);
        let person = Detection {
            track_id: TrackId(1),
            bbox: BoxXyxy::new(20, 20, 80, 80),
            class_id: ClassId(0),
            confidence: 0.9,
        };
        assert_eq!(e.process_frame(&frame(vec![person.clone()])).admitted, 0);

        e.apply(ZoneCommand::SetAnyClass(true));
        assert!(e.any_class());
        let out = e.process_frame(&frame(vec![person]));
        assert_eq!(out.admitted, 1);
        assert_eq!(out.matches[0].map(|m| m.track_id), Some(TrackId(1)));
    }

    #[test]
    fn test_boxes_clamped_to_frame() {
        let mut e = engine(vec![Zone::rect(980, 450, 1019, 499)]);
        // Box spills past the frame; clamped to (990, 460)-(1019, 499)
        let out = e.process_frame(&frame(vec![car(1, BoxXyxy::new(990, 460, 1100, 600))]));
        let m = out.matches[0].expect("clamped box should match");
        assert_eq!(m.bbox, BoxXyxy::new(990, 460, 1019, 499));
    }

    #[test]
    fn test_smoothing_uses_history() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100)]);
        e.process_frame(&frame(vec![car(1, BoxXyxy::new(20, 20, 80, 80))]));
        let out = e.process_frame(&frame(vec![car(1, BoxXyxy::new(40, 40, 100, 100))]));
        assert_eq!(out.matches[0].unwrap().bbox, BoxXyxy::new(30, 30, 90, 90));
    }

    #[test]
    fn test_append_starts_at_zero() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100)]);
        for _ in 0..3 {
            e.process_frame(&frame(parked()));
        }

        let outcome = e.apply(ZoneCommand::Append(Zone::rect(200, 0, 300, 100)));
        assert_eq!((outcome.zones_before, outcome.zones_after), (1, 2));
        assert_eq!(e.counters(), &[3, 0]);

        let in_second = vec![car(1, BoxXyxy::new(20, 20, 80, 80)), car(2, BoxXyxy::new(220, 20, 280, 80))];
        assert_eq!(e.process_frame(&frame(in_second.clone())).occupied, vec![true, false]);
        assert_eq!(e.process_frame(&frame(in_second.clone())).occupied, vec![true, false]);
        assert_eq!(e.process_frame(&frame(in_second)).occupied, vec![true, true]);
    }

    #[test]
    fn test_remove_last_while_confirmed() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100), Zone::rect(200, 0, 300, 100)]);
        let both = vec![car(1, BoxXyxy::new(20, 20, 80, 80)), car(2, BoxXyxy::new(220, 20, 280, 80))];
        let only_second = vec![car(2, BoxXyxy::new(220, 20, 280, 80))];
        e.process_frame(&frame(both.clone()));
        e.process_frame(&frame(both));
        e.process_frame(&frame(only_second.clone()));
        e.process_frame(&frame(only_second));
        assert_eq!(e.counters(), &[0, 3]);

        e.apply(ZoneCommand::RemoveLast);
        assert_eq!(e.counters(), &[0]);
        assert_eq!(e.zones(), &[Zone::rect(0, 0, 100, 100)]);
        assert_eq!(e.counts(), OccupancyCounts { total: 1, free: 1, occupied: 0 });
    }

    #[test]
    fn test_remove_all_and_draw_again() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100)]);
        for _ in 0..3 {
            e.process_frame(&frame(parked()));
        }
        e.apply(ZoneCommand::RemoveAll);
        assert!(e.counters().is_empty());
        assert_eq!(e.process_frame(&frame(parked())).counts, OccupancyCounts::default());

        for p in [Point::new(0, 0), Point::new(100, 0), Point::new(100, 100)] {
            assert_eq!(e.apply(ZoneCommand::AddPoint(p)).zones_after, 0);
        }
        let outcome = e.apply(ZoneCommand::AddPoint(Point::new(0, 100)));
        assert_eq!(outcome.zones_after, 1);
        assert_eq!(outcome.draft_points, 0);
        assert_eq!(e.counters(), &[0]);
    }

    #[test]
    fn test_idle_tracks_expire() {
        let config = EngineConfig { track_idle_frames: 2, ..EngineConfig::default() };
        let mut e = OccupancyEngine::new(config, classes(), vec![Zone::rect(0, 0, 100, 100)]);
        e.process_frame(&frame(parked()));
        assert_eq!(e.active_tracks(), 1);
        e.process_frame(&frame(Vec::new()));
        e.process_frame(&frame(Vec::new()));
        assert_eq!(e.active_tracks(), 1);
        let out = e.process_frame(&frame(Vec::new()));
        assert_eq!(out.tracks_expired, 1);
        assert_eq!(e.active_tracks(), 0);
    }

    #[test]
    fn test_one_detection_claims_one_zone() {
        // Overlapping zones: the detection belongs to zone 0 only
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100), Zone::rect(0, 0, 200, 200)]);
        for _ in 0..3 {
            e.process_frame(&frame(parked()));
        }
        assert_eq!(e.counts(), OccupancyCounts { total: 2, free: 1, occupied: 1 });
        assert_eq!(e.counters(), &[3, -2]);
    }

    #[test]
    fn test_oversized_frame_still_scores_boxes() {
        let mut e = engine(vec![Zone::rect(0, 0, 100, 100)]);
        let huge = DetectorFrame::new(1 << 31, u32::MAX, parked());
        let flags: Vec<bool> = (0..3).map(|_| e.process_frame(&huge).occupied[0]).collect();
        assert_eq!(flags, vec![false, false, true]);
    }
}
