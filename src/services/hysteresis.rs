//! Per-zone occupancy hysteresis
//!
//! One bounded counter per zone. A match moves the counter up, an empty frame
//! moves it down, and the zone only reads as occupied once the counter sits at
//! the confirm bound. The counter array is indexed exactly like the zone list
//! and must be synchronized to its length before every step.

/// Bounded occupancy counters, one per zone
#[derive(Debug, Clone)]
pub struct OccupancyCounters {
    counters: Vec<i32>,
    confirm_frames: i32,
    release_frames: i32,
}

impl OccupancyCounters {
    pub fn new(confirm_frames: u32, release_frames: u32) -> Self {
        Self {
            counters: Vec::new(),
            confirm_frames: i32::try_from(confirm_frames.max(1)).unwrap_or(i32::MAX),
            release_frames: i32::try_from(release_frames).unwrap_or(i32::MAX),
        }
    }

    /// Reconcile the counter array with the zone count
    ///
    /// New zones are appended at the tail with counter 0; removed zones are
    /// truncated from the tail. Zone deletions must only ever be "last" or
    /// "all" for indices to stay aligned. Returns true if the length changed.
    pub fn sync(&mut self, zone_count: usize) -> bool {
        if self.counters.len() == zone_count {
            return false;
        }
        self.counters.resize(zone_count, 0);
        true
    }

    /// Advance every counter by one frame
    ///
    /// `matched[i]` tells whether zone `i` had a representative this frame.
    /// Zones beyond `matched.len()` count as unmatched.
    pub fn step(&mut self, matched: &[bool]) {
        for (idx, counter) in self.counters.iter_mut().enumerate() {
            if matched.get(idx).copied().unwrap_or(false) {
                *counter = counter.saturating_add(1).min(self.confirm_frames);
            } else {
                *counter = counter.saturating_sub(1).max(-self.release_frames);
            }
        }
    }

    /// Occupied flag of one zone, derived from its counter
    #[inline]
    pub fn is_occupied(&self, idx: usize) -> bool {
        self.counters.get(idx).is_some_and(|&c| c >= self.confirm_frames)
    }

    /// Occupied flags for all zones
    pub fn flags(&self) -> Vec<bool> {
        self.counters.iter().map(|&c| c >= self.confirm_frames).collect()
    }

    pub fn occupied_count(&self) -> usize {
        self.counters.iter().filter(|&&c| c >= self.confirm_frames).count()
    }

    #[inline]
    pub fn counters(&self) -> &[i32] {
        &self.counters
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    #[inline]
    pub fn confirm_frames(&self) -> i32 {
        self.confirm_frames
    }

    #[inline]
    pub fn release_frames(&self) -> i32 {
        self.release_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(zones: usize) -> OccupancyCounters {
        let mut c = OccupancyCounters::new(3, 2);
        c.sync(zones);
        c
    }

    #[test]
    fn test_confirm_after_three_matches() {
        let mut c = counters(1);

        c.step(&[true]);
        assert!(!c.is_occupied(0));
        c.step(&[true]);
        assert!(!c.is_occupied(0));
        c.step(&[true]);
        assert!(c.is_occupied(0));
        assert_eq!(c.counters(), &[3]);

        // A single miss drops the flag immediately
        c.step(&[false]);
        assert!(!c.is_occupied(0));
        assert_eq!(c.counters(), &[2]);
    }

    #[test]
    fn test_counter_saturates_at_bounds() {
        let mut c = counters(1);
        for _ in 0..10 {
            c.step(&[true]);
        }
        assert_eq!(c.counters(), &[3]);
        for _ in 0..10 {
            c.step(&[false]);
        }
        assert_eq!(c.counters(), &[-2]);
    }

    #[test]
    fn test_recovery_from_release_floor() {
        let mut c = counters(1);
        c.step(&[false]);
        c.step(&[false]);
        assert_eq!(c.counters(), &[-2]);

        // From -2 it takes 5 matches to reach the confirm bound
        for _ in 0..4 {
            c.step(&[true]);
            assert!(!c.is_occupied(0));
        }
        c.step(&[true]);
        assert!(c.is_occupied(0));
    }

    #[test]
    fn test_bounds_hold_for_arbitrary_sequences() {
        let mut c = counters(4);
        // Deterministic xorshift sequence of match patterns
        let mut state: u32 = 0x9e37_79b9;
        for _ in 0..500 {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            let matched: Vec<bool> = (0..4).map(|i| state & (1 << i) != 0).collect();
            c.step(&matched);
            for &v in c.counters() {
                assert!((-2..=3).contains(&v), "counter {v} out of bounds");
            }
        }
    }

    #[test]
    fn test_sync_appends_zero_at_tail() {
        let mut c = counters(1);
        for _ in 0..3 {
            c.step(&[true]);
        }
        assert!(c.sync(3));
        assert_eq!(c.counters(), &[3, 0, 0]);
        assert!(c.is_occupied(0));
        assert!(!c.is_occupied(2));
    }

    #[test]
    fn test_sync_truncates_from_tail() {
        let mut c = counters(3);
        c.step(&[true, false, true]);
        c.step(&[true, false, true]);
        c.step(&[true, false, true]);
        assert_eq!(c.counters(), &[3, -2, 3]);

        assert!(c.sync(2));
        assert_eq!(c.counters(), &[3, -2]);
        assert!(c.is_occupied(0));
        assert_eq!(c.occupied_count(), 1);
    }

    #[test]
    fn test_sync_is_idempotent() {
        let mut c = counters(2);
        c.step(&[true, false]);
        let before = c.counters().to_vec();
        assert!(!c.sync(2));
        assert!(!c.sync(2));
        assert_eq!(c.counters(), before.as_slice());
    }

    #[test]
    fn test_short_match_slice_counts_as_miss() {
        let mut c = counters(2);
        c.step(&[true]);
        assert_eq!(c.counters(), &[1, -1]);
    }

    #[test]
    fn test_flags_and_out_of_range_index() {
        let mut c = counters(2);
        for _ in 0..3 {
            c.step(&[false, true]);
        }
        assert_eq!(c.flags(), vec![false, true]);
        assert!(!c.is_occupied(5));
    }

    #[test]
    fn test_huge_bounds_saturate() {
        let mut c = OccupancyCounters::new(u32::MAX, u32::MAX);
        c.sync(1);
        assert_eq!(c.confirm_frames(), i32::MAX);
        assert_eq!(c.release_frames(), i32::MAX);
        c.step(&[false]);
        assert_eq!(c.counters(), &[-1]);
        assert!(!c.is_occupied(0));
    }
}
