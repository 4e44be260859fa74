//! Per-track box smoothing
//!
//! Keeps the last N observations of each track and reports their mean, so a
//! box lags the detector by up to N frames but stops jittering. Buffers of
//! tracks that stop appearing are expired after an idle window.

use crate::domain::types::{BoxXyxy, TrackId};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;

/// One buffered observation
#[derive(Debug, Clone, Copy)]
struct Observation {
    bbox: BoxXyxy,
    confidence: f32,
}

#[derive(Debug)]
struct TrackBuffer {
    history: VecDeque<Observation>,
    last_seen_frame: u64,
}

/// Rolling-mean smoother keyed by track id
pub struct TrackSmoother {
    tracks: FxHashMap<TrackId, TrackBuffer>,
    /// FIFO capacity per track
    window: usize,
    /// Frames a track may go unobserved before its buffer is dropped
    idle_frames: u64,
}

impl TrackSmoother {
    pub fn new(window: usize, idle_frames: u64) -> Self {
        Self { tracks: FxHashMap::default(), window: window.max(1), idle_frames }
    }

    /// Record an observation and return the smoothed box and confidence
    ///
    /// The box is the per-coordinate mean (truncated) over every buffered
    /// observation of `track_id`, including this one.
    pub fn observe(
        &mut self,
        track_id: TrackId,
        bbox: BoxXyxy,
        confidence: f32,
        frame: u64,
    ) -> (BoxXyxy, f32) {
        let window = self.window;
        let buffer = self.tracks.entry(track_id).or_insert_with(|| TrackBuffer {
            history: VecDeque::with_capacity(window),
            last_seen_frame: frame,
        });

        buffer.history.push_back(Observation { bbox, confidence });
        while buffer.history.len() > window {
            buffer.history.pop_front();
        }
        buffer.last_seen_frame = frame;

        let n = buffer.history.len() as i64;
        let (mut x1, mut y1, mut x2, mut y2) = (0i64, 0i64, 0i64, 0i64);
        let mut conf = 0f32;
        for obs in &buffer.history {
            x1 += i64::from(obs.bbox.x1);
            y1 += i64::from(obs.bbox.y1);
            x2 += i64::from(obs.bbox.x2);
            y2 += i64::from(obs.bbox.y2);
            conf += obs.confidence;
        }

        let smoothed = BoxXyxy::new((x1 / n) as i32, (y1 / n) as i32, (x2 / n) as i32, (y2 / n) as i32);
        (smoothed, conf / n as f32)
    }

    /// Drop buffers not observed within the idle window
    ///
    /// Returns the number of buffers removed.
    pub fn expire_idle(&mut self, current_frame: u64) -> usize {
        let before = self.tracks.len();
        let idle = self.idle_frames;
        self.tracks.retain(|_, buf| current_frame.saturating_sub(buf.last_seen_frame) <= idle);
        before - self.tracks.len()
    }

    /// Number of live track buffers
    #[inline]
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    #[inline]
    pub fn window(&self) -> usize {
        self.window
    }

    /// Buffered observation count for a track (0 if unknown)
    pub fn history_len(&self, track_id: TrackId) -> usize {
        self.tracks.get(&track_id).map_or(0, |b| b.history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_observation_is_identity() {
        let mut smoother = TrackSmoother::new(3, 30);
        let raw = BoxXyxy::new(13, 27, 101, 88);
        let (smoothed, conf) = smoother.observe(TrackId(1), raw, 0.73, 1);
        assert_eq!(smoothed, raw);
        assert!((conf - 0.73).abs() < 1e-6);
    }

    #[test]
    fn test_mean_over_window() {
        let mut smoother = TrackSmoother::new(3, 30);
        smoother.observe(TrackId(1), BoxXyxy::new(0, 0, 10, 10), 0.5, 1);
        let (b, conf) = smoother.observe(TrackId(1), BoxXyxy::new(10, 10, 21, 20), 0.7, 2);
        // (0+10)/2, (0+10)/2, (10+21)/2 truncated, (10+20)/2
        assert_eq!(b, BoxXyxy::new(5, 5, 15, 15));
        assert!((conf - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_oldest_evicted_past_capacity() {
        let mut smoother = TrackSmoother::new(3, 30);
        smoother.observe(TrackId(1), BoxXyxy::new(90, 90, 190, 190), 0.9, 1);
        smoother.observe(TrackId(1), BoxXyxy::new(0, 0, 100, 100), 0.6, 2);
        smoother.observe(TrackId(1), BoxXyxy::new(0, 0, 100, 100), 0.6, 3);
        let (b, conf) = smoother.observe(TrackId(1), BoxXyxy::new(0, 0, 100, 100), 0.6, 4);

        assert_eq!(smoother.history_len(TrackId(1)), 3);
        assert_eq!(b, BoxXyxy::new(0, 0, 100, 100));
        assert!((conf - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_tracks_are_independent() {
        let mut smoother = TrackSmoother::new(3, 30);
        smoother.observe(TrackId(1), BoxXyxy::new(0, 0, 10, 10), 0.5, 1);
        let (b, _) = smoother.observe(TrackId(2), BoxXyxy::new(50, 50, 60, 60), 0.5, 1);
        assert_eq!(b, BoxXyxy::new(50, 50, 60, 60));
        assert_eq!(smoother.len(), 2);
    }

    #[test]
    fn test_expire_idle_tracks() {
        let mut smoother = TrackSmoother::new(3, 5);
        smoother.observe(TrackId(1), BoxXyxy::new(0, 0, 10, 10), 0.5, 1);
        smoother.observe(TrackId(2), BoxXyxy::new(0, 0, 10, 10), 0.5, 4);

        // Track 1 last seen at frame 1: 6 frames idle at frame 7 (> 5)
        assert_eq!(smoother.expire_idle(6), 0);
        assert_eq!(smoother.expire_idle(7), 1);
        assert_eq!(smoother.len(), 1);
        assert_eq!(smoother.history_len(TrackId(1)), 0);
        assert_eq!(smoother.history_len(TrackId(2)), 1);
    }

    #[test]
    fn test_reappearing_track_after_expiry_starts_fresh() {
        let mut smoother = TrackSmoother::new(3, 2);
        smoother.observe(TrackId(1), BoxXyxy::new(100, 100, 200, 200), 0.9, 1);
        smoother.expire_idle(10);

        let raw = BoxXyxy::new(0, 0, 10, 10);
        let (b, _) = smoother.observe(TrackId(1), raw, 0.4, 11);
        assert_eq!(b, raw);
    }
}
