use std::sync::Arc;

use bw_core::config::AnalysisConfig;
use realfft::num_complex::Complex;
use realfft::{RealFftPlanner, RealToComplex};

use crate::error::AudioError;

/// Inclusive frequency range, in Hz.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BandRange {
    /// Lower bound (inclusive).
    pub low_hz: f32,
    /// Upper bound (inclusive).
    pub high_hz: f32,
}

impl BandRange {
    /// Reference bass range, 20-200 Hz.
    pub const BASS: Self = Self::new(20.0, 200.0);
    /// Reference treble range, 4-20 kHz.
    pub const TREBLE: Self = Self::new(4000.0, 20000.0);

    /// Build a range from its bounds.
    #[must_use]
    pub const fn new(low_hz: f32, high_hz: f32) -> Self {
        Self { low_hz, high_hz }
    }

    /// `true` if `freq` lies inside the range, bounds included.
    #[inline(always)]
    #[must_use]
    pub fn contains(&self, freq: f32) -> bool {
        freq >= self.low_hz && freq <= self.high_hz
    }
}

/// Magnitude statistics of one band for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SpectralBand {
    /// Mean magnitude over the bins of the band, 0 when no bin fell inside.
    pub average_magnitude: f32,
    /// Frequency of the strongest bin.
    pub peak_frequency_hz: f32,
    /// Magnitude of the strongest bin.
    pub peak_magnitude: f32,
    /// Number of bins aggregated.
    pub sample_count: usize,
}

/// Running sum/count/peak for one band while walking the spectrum.
#[derive(Default)]
struct BandAccumulator {
    sum: f32,
    count: usize,
    peak_frequency_hz: f32,
    peak_magnitude: f32,
}

impl BandAccumulator {
    #[inline(always)]
    fn add(&mut self, freq: f32, magnitude: f32) {
        self.sum += magnitude;
        self.count += 1;
        if magnitude > self.peak_magnitude {
            self.peak_magnitude = magnitude;
            self.peak_frequency_hz = freq;
        }
    }

    fn finish(self) -> SpectralBand {
        SpectralBand {
            average_magnitude: if self.count > 0 {
                self.sum / self.count as f32
            } else {
                0.0
            },
            peak_frequency_hz: self.peak_frequency_hz,
            peak_magnitude: self.peak_magnitude,
            sample_count: self.count,
        }
    }
}

/// Band statistics and presence flags for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BandReport {
    /// Low band.
    pub bass: SpectralBand,
    /// High band.
    pub treble: SpectralBand,
    /// Bass average above the bass threshold.
    pub has_bass: bool,
    /// Treble average above the treble threshold.
    pub has_treble: bool,
}

/// Frequency of FFT bin `bin` for an `n`-point transform.
///
/// # Example
/// ```
/// use bw_audio::spectrum::bin_frequency;
/// assert!((bin_frequency(8, 48000, 2048) - 187.5).abs() < 1e-3);
/// ```
#[inline]
#[must_use]
pub fn bin_frequency(bin: usize, sample_rate: u32, n: usize) -> f32 {
    bin as f32 * sample_rate as f32 / n as f32
}

/// Hamming-windowed FFT with bass/treble aggregation.
///
/// Plan, window and buffers are built once; `analyze` does not allocate.
///
/// # Example
/// ```
/// use bw_audio::spectrum::SpectralAnalyzer;
/// let mut analyzer = SpectralAnalyzer::new(2048);
/// let report = analyzer.analyze(&vec![0.0; 2048], 48000).unwrap();
/// assert!(!report.has_bass && !report.has_treble);
/// ```
pub struct SpectralAnalyzer {
    fft_size: usize,
    input_buf: Vec<f32>,
    spectrum_buf: Vec<Complex<f32>>,
    scratch: Vec<Complex<f32>>,
    plan: Arc<dyn RealToComplex<f32>>,
    /// Hamming window coefficients.
    window: Vec<f32>,
    bass: BandRange,
    treble: BandRange,
    bass_threshold: f32,
    treble_threshold: f32,
}

impl SpectralAnalyzer {
    /// Create an analyzer with the reference bands and thresholds (0.001).
    ///
    /// # Panics
    /// Panics if `size` is smaller than 2. Power-of-two sizes are expected;
    /// the configuration layer guarantees it.
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self::with_bands(size, BandRange::BASS, BandRange::TREBLE, 0.001, 0.001)
    }

    /// Create an analyzer from the `[analysis]` config section.
    #[must_use]
    pub fn from_config(config: &AnalysisConfig) -> Self {
        Self::with_bands(
            config.frame_size,
            BandRange::new(config.bass_low_hz, config.bass_high_hz),
            BandRange::new(config.treble_low_hz, config.treble_high_hz),
            config.bass_threshold,
            config.treble_threshold,
        )
    }

    /// Create an analyzer with explicit bands and presence thresholds.
    ///
    /// # Panics
    /// Panics if `size` is smaller than 2.
    #[must_use]
    pub fn with_bands(
        size: usize,
        bass: BandRange,
        treble: BandRange,
        bass_threshold: f32,
        treble_threshold: f32,
    ) -> Self {
        assert!(size >= 2, "FFT size must be >= 2");

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(size);

        let input_buf = plan.make_input_vec();
        let spectrum_buf = plan.make_output_vec();
        let scratch = plan.make_scratch_vec();

        let denom = (size - 1) as f32;
        let window: Vec<f32> = (0..size)
            .map(|i| 0.54 - 0.46 * (2.0 * std::f32::consts::PI * i as f32 / denom).cos())
            .collect();

        Self {
            fft_size: size,
            input_buf,
            spectrum_buf,
            scratch,
            plan,
            window,
            bass,
            treble,
            bass_threshold,
            treble_threshold,
        }
    }

    /// Window, transform and aggregate one frame.
    ///
    /// Bins `1..N/2` are classified by frequency; bins outside both bands
    /// are ignored.
    ///
    /// # Errors
    /// Returns [`AudioError::FrameLength`] if `frame` is not exactly
    /// `fft_size` samples long.
    pub fn analyze(&mut self, frame: &[f32], sample_rate: u32) -> Result<BandReport, AudioError> {
        if frame.len() != self.fft_size {
            return Err(AudioError::FrameLength {
                expected: self.fft_size,
                got: frame.len(),
            });
        }

        for ((slot, &sample), &w) in self.input_buf.iter_mut().zip(frame).zip(&self.window) {
            *slot = sample * w;
        }

        self.plan
            .process_with_scratch(
                &mut self.input_buf,
                &mut self.spectrum_buf,
                &mut self.scratch,
            )
            .map_err(|e| AudioError::Fft(e.to_string()))?;

        let n = self.fft_size as f32;
        let mut bass = BandAccumulator::default();
        let mut treble = BandAccumulator::default();

        for (i, c) in self
            .spectrum_buf
            .iter()
            .enumerate()
            .take(self.fft_size / 2)
            .skip(1)
        {
            let freq = bin_frequency(i, sample_rate, self.fft_size);
            // realfft ne normalise pas : une seule division par N.
            let magnitude = (c.re * c.re + c.im * c.im).sqrt() / n;

            if self.bass.contains(freq) {
                bass.add(freq, magnitude);
            } else if self.treble.contains(freq) {
                treble.add(freq, magnitude);
            }
        }

        let bass = bass.finish();
        let treble = treble.finish();

        Ok(BandReport {
            bass,
            treble,
            has_bass: bass.average_magnitude > self.bass_threshold,
            has_treble: treble.average_magnitude > self.treble_threshold,
        })
    }

    /// FFT window size.
    #[must_use]
    pub fn fft_size(&self) -> usize {
        self.fft_size
    }
}
