//! Admissibility filter and per-zone candidate selection

use crate::domain::classes::ClassTable;
use crate::domain::types::{BoxXyxy, ClassId, TrackId};

/// A smoothed detection ready for zone matching
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub track_id: TrackId,
    pub bbox: BoxXyxy,
    pub class_id: ClassId,
    pub confidence: f32,
}

/// The representative detection chosen for one zone in one frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ZoneMatch {
    pub track_id: TrackId,
    pub bbox: BoxXyxy,
    pub class_id: ClassId,
    pub confidence: f32,
    pub overlap: f64,
}

/// Thresholds that decide whether a detection may count at all
#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub conf_threshold: f32,
    pub min_box_area: i64,
    pub any_class: bool,
}

impl Admission {
    /// Confidence, class and size gate
    pub fn admits(&self, candidate: &Candidate, classes: &ClassTable) -> bool {
        if !(candidate.confidence >= self.conf_threshold) {
            return false;
        }
        if !self.any_class && !classes.is_allowed(candidate.class_id) {
            return false;
        }
        candidate.bbox.area() >= self.min_box_area
    }
}

/// Pick at most one representative per zone
///
/// `overlap(zone_idx, bbox)` returns the overlap ratio of a box against a
/// zone. Each candidate is tested against zones in index order and is bound
/// to the first zone it qualifies for. Within a zone the candidate with the
/// highest overlap wins, confidence breaks overlap ties, and exact ties keep
/// the earlier candidate.
pub fn select_candidates<F>(
    zone_count: usize,
    candidates: &[Candidate],
    overlap_threshold: f64,
    mut overlap: F,
) -> Vec<Option<ZoneMatch>>
where
    F: FnMut(usize, &BoxXyxy) -> f64,
{
    let mut matches: Vec<Option<ZoneMatch>> = vec![None; zone_count];

    for candidate in candidates {
        for (idx, slot) in matches.iter_mut().enumerate() {
            let ratio = overlap(idx, &candidate.bbox);
            if ratio < overlap_threshold {
                continue;
            }

            let replace = match slot {
                None => true,
                Some(prev) => {
                    ratio > prev.overlap
                        || (ratio == prev.overlap && candidate.confidence > prev.confidence)
                }
            };
            if replace {
                *slot = Some(ZoneMatch {
                    track_id: candidate.track_id,
                    bbox: candidate.bbox,
                    class_id: candidate.class_id,
                    confidence: candidate.confidence,
                    overlap: ratio,
                });
            }
            // First eligible zone wins, whether or not it kept this candidate
            break;
        }
    }

    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, HashMap};

    fn candidate(track: i64, conf: f32) -> Candidate {
        Candidate {
            track_id: TrackId(track),
            bbox: BoxXyxy::new(track as i32, 0, track as i32 + 10, 10),
            class_id: ClassId(2),
            confidence: conf,
        }
    }

    /// Overlap table keyed by (zone, box.x1) since x1 encodes the track
    fn table(entries: &[((usize, i64), f64)]) -> impl FnMut(usize, &BoxXyxy) -> f64 {
        let map: HashMap<(usize, i64), f64> = entries.iter().copied().collect();
        move |zone: usize, bbox: &BoxXyxy| map.get(&(zone, i64::from(bbox.x1))).copied().unwrap_or(0.0)
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let cands = [candidate(1, 0.9)];
        let matches = select_candidates(1, &cands, 0.2, table(&[((0, 1), 0.2)]));
        assert_eq!(matches[0].map(|m| m.track_id), Some(TrackId(1)));

        let matches = select_candidates(1, &cands, 0.2, table(&[((0, 1), 0.199_999)]));
        assert!(matches[0].is_none());
    }

    #[test]
    fn test_overlap_beats_confidence() {
        let cands = [candidate(1, 0.4), candidate(2, 0.9)];
        let overlaps = table(&[((0, 1), 0.5), ((0, 2), 0.3)]);
        let matches = select_candidates(1, &cands, 0.2, overlaps);
        let m = matches[0].unwrap();
        assert_eq!(m.track_id, TrackId(1));
        assert_eq!(m.overlap, 0.5);

        // Same outcome regardless of arrival order
        let cands = [candidate(2, 0.9), candidate(1, 0.4)];
        let overlaps = table(&[((0, 1), 0.5), ((0, 2), 0.3)]);
        assert_eq!(select_candidates(1, &cands, 0.2, overlaps)[0].unwrap().track_id, TrackId(1));
    }

    #[test]
    fn test_confidence_breaks_overlap_tie() {
        let cands = [candidate(1, 0.5), candidate(2, 0.8)];
        let overlaps = table(&[((0, 1), 0.6), ((0, 2), 0.6)]);
        let m = select_candidates(1, &cands, 0.2, overlaps)[0].unwrap();
        assert_eq!(m.track_id, TrackId(2));
    }

    #[test]
    fn test_exact_tie_keeps_first() {
        let cands = [candidate(1, 0.5), candidate(2, 0.5)];
        let overlaps = table(&[((0, 1), 0.6), ((0, 2), 0.6)]);
        let m = select_candidates(1, &cands, 0.2, overlaps)[0].unwrap();
        assert_eq!(m.track_id, TrackId(1));
    }

    #[test]
    fn test_first_eligible_zone_wins() {
        // Track 1 qualifies for zones 0 and 1, better in zone 1
        let cands = [candidate(1, 0.9)];
        let overlaps = table(&[((0, 1), 0.3), ((1, 1), 0.9)]);
        let matches = select_candidates(2, &cands, 0.2, overlaps);
        assert!(matches[0].is_some());
        assert!(matches[1].is_none());
    }

    #[test]
    fn test_losing_candidate_does_not_fall_through() {
        // Track 2 loses zone 0 to track 1 and must not claim zone 1
        let cands = [candidate(1, 0.9), candidate(2, 0.9)];
        let overlaps = table(&[((0, 1), 0.8), ((0, 2), 0.4), ((1, 2), 0.9)]);
        let matches = select_candidates(2, &cands, 0.2, overlaps);
        assert_eq!(matches[0].unwrap().track_id, TrackId(1));
        assert!(matches[1].is_none());
    }

    #[test]
    fn test_no_zones_no_matches() {
        let cands = [candidate(1, 0.9)];
        assert!(select_candidates(0, &cands, 0.2, |_, _| 1.0).is_empty());
    }

    #[test]
    fn test_admission_gates() {
        let classes = ClassTable::new(
            BTreeMap::from([(ClassId(0), "person".to_string()), (ClassId(2), "car".to_string())]),
            ["car"],
        );
        let gate = Admission { conf_threshold: 0.35, min_box_area: 300, any_class: false };

        let mut c = Candidate {
            track_id: TrackId(1),
            bbox: BoxXyxy::new(0, 0, 20, 15),
            class_id: ClassId(2),
            confidence: 0.35,
        };
        assert!(gate.admits(&c, &classes));

        c.confidence = 0.34;
        assert!(!gate.admits(&c, &classes));

        c.confidence = f32::NAN;
        assert!(!gate.admits(&c, &classes));

        c.confidence = 0.9;
        c.bbox = BoxXyxy::new(0, 0, 20, 14);
        assert!(!gate.admits(&c, &classes));

        c.bbox = BoxXyxy::new(0, 0, 20, 15);
        c.class_id = ClassId(0);
        assert!(!gate.admits(&c, &classes));

        let any = Admission { any_class: true, ..gate };
        assert!(any.admits(&c, &classes));
    }
}
