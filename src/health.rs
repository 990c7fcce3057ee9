//! Rolling health history and successive-difference damage detection.
//!
//! Fixed capacity, no heap: backed by a `heapless::Deque`. When full, the
//! oldest sample is overwritten.
//!
//! # Invariants
//!
//! - Only strictly positive decreases count as damage. Regeneration and
//!   round resets (health going up) never produce a sample.
//! - At most `N` samples are retained.

use core::fmt;

use heapless::Deque;

/// Default ring capacity, a little over one second at 60 fps.
pub const DEFAULT_HISTORY_LEN: usize = 64;

/// One `(frame, p1_health, p2_health)` observation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthSample {
    /// Frame the values were read on.
    pub frame_number: u64,
    /// Player one health in game units.
    pub p1: i64,
    /// Player two health in game units.
    pub p2: i64,
}

/// Damage each player took between two successive samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DamageDelta {
    /// Frame of the newer sample.
    pub frame_number: u64,
    /// Damage taken by player one (0 when health held or rose).
    pub p1: i64,
    /// Damage taken by player two (0 when health held or rose).
    pub p2: i64,
}

impl DamageDelta {
    /// True when either player took damage.
    pub fn any(&self) -> bool {
        self.p1 > 0 || self.p2 > 0
    }
}

/// Bounded ring of recent health samples.
pub struct HealthHistory<const N: usize = DEFAULT_HISTORY_LEN> {
    samples: Deque<HealthSample, N>,
}

impl<const N: usize> Default for HealthHistory<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> HealthHistory<N> {
    /// Empty history.
    pub fn new() -> Self {
        Self { samples: Deque::new() }
    }

    /// Append a sample and return the damage since the previous one.
    ///
    /// The first sample, and any sample that does not advance the frame,
    /// reports zero damage.
    pub fn record(&mut self, frame_number: u64, p1: i64, p2: i64) -> DamageDelta {
        let delta = match self.samples.back() {
            Some(prev) if frame_number > prev.frame_number => DamageDelta {
                frame_number,
                p1: prev.p1.saturating_sub(p1).max(0),
                p2: prev.p2.saturating_sub(p2).max(0),
            },
            _ => DamageDelta { frame_number, ..DamageDelta::default() },
        };

        if self.samples.is_full() {
            self.samples.pop_front();
        }
        // Cannot fail: a slot was freed above when full.
        let _ = self.samples.push_back(HealthSample { frame_number, p1, p2 });
        delta
    }

    /// Most recent sample.
    pub fn latest(&self) -> Option<&HealthSample> {
        self.samples.back()
    }

    /// Samples oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HealthSample> {
        self.samples.iter()
    }

    /// Damage taken by each player over the last `frames` frames, summed
    /// from successive differences within the retained window.
    pub fn recent_damage(&self, frames: u64) -> (i64, i64) {
        let Some(last) = self.samples.back() else {
            return (0, 0);
        };
        let cutoff = last.frame_number.saturating_sub(frames);

        let mut p1 = 0;
        let mut p2 = 0;
        let mut prev: Option<&HealthSample> = None;
        for s in self.samples.iter() {
            if let Some(p) = prev {
                if s.frame_number > cutoff {
                    p1 = p.p1.saturating_sub(s.p1).max(0).saturating_add(p1);
                    p2 = p.p2.saturating_sub(s.p2).max(0).saturating_add(p2);
                }
            }
            prev = Some(s);
        }
        (p1, p2)
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Ring capacity.
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl<const N: usize> fmt::Debug for HealthHistory<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HealthHistory")
            .field("len", &self.samples.len())
            .field("capacity", &N)
            .field("latest", &self.samples.back())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_reports_no_damage() {
        let mut h: HealthHistory = HealthHistory::new();
        let d = h.record(0, 100, 100);
        assert!(!d.any());
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn test_decrease_is_damage() {
        let mut h: HealthHistory = HealthHistory::new();
        h.record(10, 100, 100);
        let d = h.record(11, 100, 70);
        assert_eq!(d, DamageDelta { frame_number: 11, p1: 0, p2: 30 });
    }

    #[test]
    fn test_increase_is_ignored() {
        let mut h: HealthHistory = HealthHistory::new();
        h.record(10, 40, 40);
        let d = h.record(11, 100, 100);
        assert!(!d.any(), "round reset must not read as damage");
    }

    #[test]
    fn test_repeated_frame_reports_no_damage() {
        let mut h: HealthHistory = HealthHistory::new();
        h.record(10, 100, 100);
        let d = h.record(10, 50, 50);
        assert!(!d.any());
    }

    #[test]
    fn test_ring_overwrites_oldest() {
        let mut h: HealthHistory<4> = HealthHistory::new();
        for f in 0..10 {
            h.record(f, 100, 100);
        }
        assert_eq!(h.len(), 4);
        assert_eq!(h.iter().next().map(|s| s.frame_number), Some(6));
        assert_eq!(h.latest().map(|s| s.frame_number), Some(9));
    }

    #[test]
    fn test_recent_damage_window() {
        let mut h: HealthHistory = HealthHistory::new();
        h.record(0, 100, 100);
        h.record(1, 100, 90); // outside a 2-frame window ending at 4
        h.record(2, 100, 90);
        h.record(3, 95, 80);
        h.record(4, 95, 70);
        assert_eq!(h.recent_damage(2), (5, 20));
        assert_eq!(h.recent_damage(100), (5, 30));
    }

    #[test]
    fn test_extreme_values_saturate() {
        let mut h: HealthHistory = HealthHistory::new();
        h.record(0, i64::MAX, i64::MAX);
        let d = h.record(1, i64::MIN, 0);
        assert_eq!((d.p1, d.p2), (i64::MAX, i64::MAX));
        h.record(2, i64::MIN, -5);
        assert_eq!(h.recent_damage(10), (i64::MAX, i64::MAX));
    }

    #[test]
    fn test_clear() {
        let mut h: HealthHistory = HealthHistory::new();
        h.record(0, 1, 1);
        h.clear();
        assert!(h.is_empty());
        assert_eq!(h.capacity(), DEFAULT_HISTORY_LEN);
    }
}
