use std::collections::VecDeque;
use std::time::{Duration, Instant};

use bw_core::config::BeatConfig;

/// Fixed-capacity FIFO of per-frame RMS energies.
///
/// Never holds more than `capacity` values; the oldest one is evicted on
/// overflow.
#[derive(Debug, Clone)]
pub struct EnergyHistory {
    values: VecDeque<f32>,
    capacity: usize,
}

impl EnergyHistory {
    /// Empty history holding at most `capacity` values.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Append a value, evicting the oldest when over capacity.
    pub fn push(&mut self, energy: f32) {
        self.values.push_back(energy);
        while self.values.len() > self.capacity {
            self.values.pop_front();
        }
    }

    /// `true` once `capacity` values have been seen.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.values.len() >= self.capacity
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Arithmetic mean, 0 when empty.
    #[must_use]
    pub fn mean(&self) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().sum::<f32>() / self.values.len() as f32
    }

    /// Population variance around `mean`, 0 when empty.
    #[must_use]
    pub fn variance(&self, mean: f32) -> f32 {
        if self.values.is_empty() {
            return 0.0;
        }
        self.values.iter().map(|e| (e - mean) * (e - mean)).sum::<f32>() / self.values.len() as f32
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Time-ordered beat timestamps over a trailing window.
///
/// After each insertion, every entry older than `window` relative to the new
/// timestamp is evicted.
#[derive(Debug, Clone)]
pub struct BeatTimes {
    times: VecDeque<Instant>,
    window: Duration,
}

impl BeatTimes {
    /// Empty history with the given trailing window.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            times: VecDeque::with_capacity(64),
            window,
        }
    }

    /// Record a beat at `now` and evict entries older than the window.
    pub fn push(&mut self, now: Instant) {
        self.times.push_back(now);
        while let Some(&oldest) = self.times.front() {
            if now.saturating_duration_since(oldest) > self.window {
                self.times.pop_front();
            } else {
                break;
            }
        }
    }

    /// Timestamps, oldest first.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &Instant> {
        self.times.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.times.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    /// Most recent beat.
    #[must_use]
    pub fn latest(&self) -> Option<Instant> {
        self.times.back().copied()
    }

    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn clear(&mut self) {
        self.times.clear();
    }
}

/// Energy-based onset detection with adaptive threshold.
///
/// A beat is declared when the current frame energy exceeds the recent mean
/// by `sensitivity`, the recent energies actually vary (`min_variance`), and
/// the previous beat is at least `min_interval` old. Nothing is declared until
/// the energy history is full.
///
/// # Example
/// ```
/// use std::time::Instant;
/// use bw_audio::beat::BeatDetector;
/// let mut detector = BeatDetector::new();
/// assert!(!detector.detect_beat(0.5, Instant::now()));
/// ```
pub struct BeatDetector {
    energy: EnergyHistory,
    beats: BeatTimes,
    sensitivity: f32,
    min_variance: f32,
    min_interval: Duration,
    last_beat: Option<Instant>,
}

impl BeatDetector {
    /// Detector with the reference parameters (43 frames, 1.3, 0.01, 300 ms, 10 s).
    #[must_use]
    pub fn new() -> Self {
        Self::from_config(&BeatConfig::default())
    }

    /// Detector configured from the `[beat]` config section.
    #[must_use]
    pub fn from_config(config: &BeatConfig) -> Self {
        Self {
            energy: EnergyHistory::new(config.history_size),
            beats: BeatTimes::new(config.window()),
            sensitivity: config.sensitivity,
            min_variance: config.min_variance,
            min_interval: config.min_interval(),
            last_beat: None,
        }
    }

    /// Feed one frame energy observed at `now`. Returns `true` on a beat.
    pub fn detect_beat(&mut self, current_energy: f32, now: Instant) -> bool {
        self.energy.push(current_energy);

        // Warm-up: no decision until a full window of energies exists.
        if !self.energy.is_full() {
            return false;
        }

        let mean = self.energy.mean();
        let variance = self.energy.variance(mean);

        let spaced = self
            .last_beat
            .is_none_or(|last| now.saturating_duration_since(last) > self.min_interval);

        let is_beat =
            current_energy > mean * self.sensitivity && variance > self.min_variance && spaced;

        if is_beat {
            self.last_beat = Some(now);
            self.beats.push(now);
            log::trace!(
                "beat: energy={current_energy:.4} mean={mean:.4} var={variance:.5} beats={}",
                self.beats.len()
            );
        }

        is_beat
    }

    /// Beat timestamps over the trailing window.
    #[must_use]
    pub fn beat_times(&self) -> &BeatTimes {
        &self.beats
    }

    /// Recent frame energies.
    #[must_use]
    pub fn energy_history(&self) -> &EnergyHistory {
        &self.energy
    }

    /// Time of the last declared beat.
    #[must_use]
    pub fn last_beat(&self) -> Option<Instant> {
        self.last_beat
    }

    /// Forget all session state.
    pub fn reset(&mut self) {
        self.energy.clear();
        self.beats.clear();
        self.last_beat = None;
    }
}

impl Default for BeatDetector {
    fn default() -> Self {
        Self::new()
    }
}
