use std::time::{Duration, Instant};

use crate::beat::BeatTimes;

/// Tempo from the median inter-beat interval.
///
/// Returns 0 with fewer than two beats. Intervals are sorted and the element
/// at index `len / 2` is taken as the median, so for an even count the upper
/// of the two middle intervals wins.
///
/// # Example
/// ```
/// use std::time::{Duration, Instant};
/// use bw_audio::beat::BeatTimes;
/// use bw_audio::tempo::estimate_bpm;
///
/// let t0 = Instant::now();
/// let mut beats = BeatTimes::new(Duration::from_secs(10));
/// for ms in [0, 500, 1000] {
///     beats.push(t0 + Duration::from_millis(ms));
/// }
/// assert!((estimate_bpm(&beats) - 120.0).abs() < 1e-3);
/// ```
#[must_use]
pub fn estimate_bpm(beats: &BeatTimes) -> f32 {
    if beats.len() < 2 {
        return 0.0;
    }

    let times: Vec<Instant> = beats.iter().copied().collect();
    let mut intervals: Vec<f64> = times
        .windows(2)
        .map(|w| w[1].saturating_duration_since(w[0]).as_secs_f64())
        .collect();

    intervals.sort_by(f64::total_cmp);
    let median = intervals[intervals.len() / 2];

    if median <= 0.0 {
        return 0.0;
    }
    (60.0 / median) as f32
}

/// Throttled BPM estimate, recomputed at most once per `refresh_interval`.
///
/// Between recomputations the cached value is returned unchanged.
pub struct TempoTracker {
    refresh_interval: Duration,
    last_update: Option<Instant>,
    bpm: f32,
}

impl TempoTracker {
    /// Tracker recomputing at most every `refresh_interval`.
    #[must_use]
    pub fn new(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            last_update: None,
            bpm: 0.0,
        }
    }

    /// Return the current BPM, recomputing from `beats` if the refresh
    /// interval has elapsed since the last recomputation.
    pub fn update(&mut self, beats: &BeatTimes, now: Instant) -> f32 {
        let due = self
            .last_update
            .is_none_or(|last| now.saturating_duration_since(last) >= self.refresh_interval);
        if due {
            self.bpm = estimate_bpm(beats);
            self.last_update = Some(now);
        }
        self.bpm
    }

    /// Cached estimate.
    #[must_use]
    pub fn bpm(&self) -> f32 {
        self.bpm
    }

    pub fn reset(&mut self) {
        self.last_update = None;
        self.bpm = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn beats_at(t0: Instant, offsets_ms: &[u64]) -> BeatTimes {
        let mut beats = BeatTimes::new(Duration::from_secs(10));
        for &ms in offsets_ms {
            beats.push(t0 + Duration::from_millis(ms));
        }
        beats
    }

    #[test]
    fn zero_or_one_beat_is_zero_bpm() {
        let t0 = Instant::now();
        assert!(estimate_bpm(&beats_at(t0, &[])).abs() < f32::EPSILON);
        assert!(estimate_bpm(&beats_at(t0, &[0])).abs() < f32::EPSILON);
    }

    #[test]
    fn regular_half_second_is_120() {
        let t0 = Instant::now();
        let bpm = estimate_bpm(&beats_at(t0, &[0, 500, 1000]));
        assert!((bpm - 120.0).abs() < 1e-3);
    }

    #[test]
    fn even_count_takes_upper_middle() {
        // Intervals [0.4, 0.8] -> index 1 -> 0.8 s -> 75 BPM.
        let t0 = Instant::now();
        let bpm = estimate_bpm(&beats_at(t0, &[0, 400, 1200]));
        assert!((bpm - 75.0).abs() < 1e-3);
    }

    #[test]
    fn median_ignores_outlier_interval() {
        // Intervals 0.5, 0.5, 2.0, 0.5 -> sorted [0.5, 0.5, 0.5, 2.0] -> 0.5 s.
        let t0 = Instant::now();
        let bpm = estimate_bpm(&beats_at(t0, &[0, 500, 1000, 3000, 3500]));
        assert!((bpm - 120.0).abs() < 1e-3);
    }

    #[test]
    fn tracker_throttles_recomputation() {
        let t0 = Instant::now();
        let mut tracker = TempoTracker::new(Duration::from_secs(1));

        // First call always computes: nothing yet.
        let empty = beats_at(t0, &[]);
        assert!(tracker.update(&empty, t0).abs() < f32::EPSILON);

        // Beats appear, but less than a second elapsed: cached 0 is reused.
        let beats = beats_at(t0, &[0, 500, 1000]);
        let bpm = tracker.update(&beats, t0 + Duration::from_millis(900));
        assert!(bpm.abs() < f32::EPSILON);

        // One second after the last recompute: refreshed.
        let bpm = tracker.update(&beats, t0 + Duration::from_secs(1));
        assert!((bpm - 120.0).abs() < 1e-3);
        assert!((tracker.bpm() - 120.0).abs() < 1e-3);
    }
}
