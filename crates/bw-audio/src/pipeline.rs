use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bw_core::clock::{Clock, SystemClock};
use bw_core::config::BeatwireConfig;
use bw_core::result::AnalysisResult;

use crate::accumulator::{FrameAccumulator, StreamFormat};
use crate::beat::BeatDetector;
use crate::spectrum::{BandReport, SpectralAnalyzer};
use crate::tempo::TempoTracker;

/// Destination of analysis results.
///
/// CONTRAT : `publish` ne doit JAMAIS bloquer. It runs on the capture thread;
/// a slow consumer must lose results rather than stall ingestion.
pub trait ResultSink: Send {
    /// Hand one result over.
    fn publish(&mut self, result: AnalysisResult);
}

impl<F> ResultSink for F
where
    F: FnMut(AnalysisResult) + Send,
{
    fn publish(&mut self, result: AnalysisResult) {
        self(result);
    }
}

/// Bounded-channel sink: `try_send`, dropping results when the queue is full.
///
/// # Example
/// ```
/// use bw_audio::pipeline::{ChannelSink, ResultSink};
/// use bw_core::result::AnalysisResult;
///
/// let (tx, rx) = flume::bounded(1);
/// let mut sink = ChannelSink::new(tx);
/// sink.publish(AnalysisResult::default());
/// sink.publish(AnalysisResult::default()); // queue full: dropped
/// assert_eq!(rx.len(), 1);
/// assert_eq!(sink.dropped(), 1);
/// ```
pub struct ChannelSink {
    tx: flume::Sender<AnalysisResult>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSink {
    /// Wrap the sending half of a bounded channel.
    #[must_use]
    pub fn new(tx: flume::Sender<AnalysisResult>) -> Self {
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Results lost to a full or disconnected queue so far.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Shared handle on the drop counter, readable after the sink moved.
    #[must_use]
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

impl ResultSink for ChannelSink {
    fn publish(&mut self, result: AnalysisResult) {
        match self.tx.try_send(result) {
            Ok(()) => {}
            Err(flume::TrySendError::Full(_)) => {
                let n = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                log::trace!("publisher queue full, result dropped ({n} total)");
            }
            Err(flume::TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Running counters for diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct PipelineStats {
    /// Frames that produced a result.
    pub frames_analyzed: u64,
    /// Frames dropped after a spectral analysis failure.
    pub frames_dropped: u64,
    /// Loudest bass average seen this session.
    pub max_bass_level: f32,
    /// Loudest treble average seen this session.
    pub max_treble_level: f32,
}

/// Everything that runs on a completed frame. Split from the accumulator so
/// both can be borrowed at once while a chunk is being ingested.
struct FrameProcessor {
    spectral: SpectralAnalyzer,
    beat: BeatDetector,
    tempo: TempoTracker,
    clock: Arc<dyn Clock>,
    sink: Box<dyn ResultSink>,
    stats: PipelineStats,
    debug_interval: u32,
}

impl FrameProcessor {
    fn process(&mut self, frame: &[f32], sample_rate: u32) -> Option<AnalysisResult> {
        let now = self.clock.now();
        let energy = rms(frame);

        let beat_detected = self.beat.detect_beat(energy, now);
        let current_bpm = self.tempo.update(self.beat.beat_times(), now);

        let report = match self.spectral.analyze(frame, sample_rate) {
            Ok(report) => report,
            Err(e) => {
                self.stats.frames_dropped += 1;
                log::warn!("Frame ignorée : {e}");
                return None;
            }
        };

        let result = AnalysisResult {
            has_bass: report.has_bass,
            has_treble: report.has_treble,
            bass_level: report.bass.average_magnitude,
            treble_level: report.treble.average_magnitude,
            beat_detected,
            current_bpm,
        };

        self.record(energy, &report, current_bpm);
        self.sink.publish(result);
        Some(result)
    }

    fn record(&mut self, energy: f32, report: &BandReport, bpm: f32) {
        let stats = &mut self.stats;
        stats.frames_analyzed += 1;
        stats.max_bass_level = stats.max_bass_level.max(report.bass.average_magnitude);
        stats.max_treble_level = stats.max_treble_level.max(report.treble.average_magnitude);

        if self.debug_interval == 0 || stats.frames_analyzed % u64::from(self.debug_interval) != 0
        {
            return;
        }
        log::debug!(
            "#{}: energy={energy:.6} bass={:.6} (max={:.6}) treble={:.6} (max={:.6}) bpm={bpm:.1}",
            stats.frames_analyzed,
            report.bass.average_magnitude,
            stats.max_bass_level,
            report.treble.average_magnitude,
            stats.max_treble_level,
        );
        if report.bass.peak_magnitude > 0.0 {
            log::debug!(
                "  strongest bass: {:.0} Hz @ {:.6}",
                report.bass.peak_frequency_hz,
                report.bass.peak_magnitude
            );
        }
        if report.treble.peak_magnitude > 0.0 {
            log::debug!(
                "  strongest treble: {:.0} Hz @ {:.6}",
                report.treble.peak_frequency_hz,
                report.treble.peak_magnitude
            );
        }
    }
}

/// Root-mean-square of a frame, 0 for an empty slice.
///
/// # Example
/// ```
/// use bw_audio::pipeline::rms;
/// assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
/// ```
#[must_use]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Capture chunk → frames → beat/tempo/bands → one `AnalysisResult` per frame.
///
/// Runs synchronously on whatever thread delivers the chunks; no internal
/// parallelism, frames are processed in arrival order.
///
/// # Example
/// ```
/// use bw_audio::accumulator::StreamFormat;
/// use bw_audio::pipeline::AnalysisPipeline;
/// use bw_core::config::BeatwireConfig;
/// use bw_core::result::AnalysisResult;
///
/// let mut results = Vec::new();
/// let (tx, rx) = flume::unbounded();
/// let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), move |r: AnalysisResult| {
///     let _ = tx.send(r);
/// });
/// let silence = vec![0u8; 2048 * 2 * 2]; // one frame of 16-bit stereo
/// assert_eq!(pipeline.push_chunk(&silence, StreamFormat::new(48000, 2, 16)), 1);
/// results.extend(rx.try_iter());
/// assert!(!results[0].has_bass && !results[0].beat_detected);
/// ```
pub struct AnalysisPipeline {
    accumulator: FrameAccumulator,
    processor: FrameProcessor,
    last_sample_rate: u32,
}

impl AnalysisPipeline {
    /// Build a pipeline timed by the system clock.
    #[must_use]
    pub fn new(config: &BeatwireConfig, sink: impl ResultSink + 'static) -> Self {
        Self::with_clock(config, sink, Arc::new(SystemClock))
    }

    /// Build a pipeline timed by `clock`.
    #[must_use]
    pub fn with_clock(
        config: &BeatwireConfig,
        sink: impl ResultSink + 'static,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            accumulator: FrameAccumulator::new(config.analysis.frame_size),
            processor: FrameProcessor {
                spectral: SpectralAnalyzer::from_config(&config.analysis),
                beat: BeatDetector::from_config(&config.beat),
                tempo: TempoTracker::new(config.tempo.refresh_interval()),
                clock,
                sink: Box::new(sink),
                stats: PipelineStats::default(),
                debug_interval: config.analysis.debug_interval,
            },
            last_sample_rate: 0,
        }
    }

    /// Ingest one capture chunk. Returns how many results were published.
    pub fn push_chunk(&mut self, bytes: &[u8], format: StreamFormat) -> usize {
        self.last_sample_rate = format.sample_rate;
        let processor = &mut self.processor;
        let mut published = 0;
        self.accumulator.ingest_with(bytes, format, |frame| {
            if processor.process(frame, format.sample_rate).is_some() {
                published += 1;
            }
        });
        published
    }

    /// Analyse one already-assembled mono frame.
    ///
    /// Returns `None` (and logs a warning) if the frame cannot be analysed,
    /// e.g. because its length differs from the configured frame size.
    pub fn process_frame(&mut self, frame: &[f32], sample_rate: u32) -> Option<AnalysisResult> {
        self.processor.process(frame, sample_rate)
    }

    /// End-of-session decision on the partial frame.
    ///
    /// With `flush_partial` the pending samples are zero-padded to a full
    /// frame and analysed; otherwise they are discarded.
    pub fn finish(&mut self, flush_partial: bool) -> Option<AnalysisResult> {
        if flush_partial {
            let frame = self.accumulator.take_partial()?;
            log::debug!("Flush de la frame partielle ({} échantillons)", frame.len());
            self.processor.process(&frame, self.last_sample_rate)
        } else {
            let discarded = self.accumulator.discard_partial();
            if discarded > 0 {
                log::debug!("Frame partielle abandonnée : {discarded} échantillons");
            }
            None
        }
    }

    /// Session counters.
    #[must_use]
    pub fn stats(&self) -> PipelineStats {
        self.processor.stats
    }

    /// Samples waiting for the current frame to fill.
    #[must_use]
    pub fn pending_samples(&self) -> usize {
        self.accumulator.pending()
    }

    /// Samples skipped because of an unsupported bit depth.
    #[must_use]
    pub fn skipped_samples(&self) -> u64 {
        self.accumulator.skipped_samples()
    }

    /// Last BPM estimate.
    #[must_use]
    pub fn current_bpm(&self) -> f32 {
        self.processor.tempo.bpm()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bw_core::clock::ManualClock;
    use bw_core::config::BeatConfig;

    use super::*;

    const N: usize = 2048;

    fn collector() -> (flume::Receiver<AnalysisResult>, impl ResultSink + 'static) {
        let (tx, rx) = flume::unbounded();
        let sink = move |r: AnalysisResult| {
            let _ = tx.send(r);
        };
        (rx, sink)
    }

    fn f32_frame(value: f32) -> Vec<u8> {
        std::iter::repeat_n(value, N)
            .flat_map(f32::to_le_bytes)
            .collect()
    }

    #[test]
    fn silent_frame_yields_empty_result() {
        let (rx, sink) = collector();
        let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), sink);
        let published = pipeline.push_chunk(&vec![0u8; N * 2 * 2], StreamFormat::new(48000, 2, 16));
        assert_eq!(published, 1);

        let result = rx.try_recv().unwrap();
        assert_eq!(result, AnalysisResult::default());
    }

    #[test]
    fn one_result_per_completed_frame_across_chunks() {
        let (rx, sink) = collector();
        let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), sink);
        let fmt = StreamFormat::new(44100, 1, 16);

        // 5000 mono samples in odd-sized chunks -> 2 frames, 904 pending.
        let bytes = vec![0u8; 5000 * 2];
        let mut total = 0;
        for chunk in bytes.chunks(734) {
            total += pipeline.push_chunk(chunk, fmt);
        }
        assert_eq!(total, 2);
        assert_eq!(rx.try_iter().count(), 2);
        assert_eq!(pipeline.pending_samples(), 5000 - 2 * N);
        assert_eq!(pipeline.stats().frames_analyzed, 2);
    }

    #[test]
    fn malformed_frame_is_dropped_and_pipeline_continues() {
        let (rx, sink) = collector();
        let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), sink);

        assert!(pipeline.process_frame(&[0.0; 100], 48000).is_none());
        assert_eq!(pipeline.stats().frames_dropped, 1);
        assert!(rx.try_recv().is_err());

        assert!(pipeline.process_frame(&vec![0.0; N], 48000).is_some());
        assert_eq!(rx.try_iter().count(), 1);
    }

    #[test]
    fn unsupported_depth_publishes_nothing() {
        let (rx, sink) = collector();
        let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), sink);
        assert_eq!(
            pipeline.push_chunk(&vec![0u8; N * 3], StreamFormat::new(48000, 1, 24)),
            0
        );
        assert!(rx.try_recv().is_err());
        assert_eq!(pipeline.skipped_samples(), N as u64);
    }

    #[test]
    fn beats_and_throttled_bpm() {
        // Short history so that one loud frame in four is a beat.
        let config = BeatwireConfig {
            beat: BeatConfig {
                history_size: 4,
                min_variance: 0.0,
                ..BeatConfig::default()
            },
            ..BeatwireConfig::default()
        };
        let clock = Arc::new(ManualClock::new());
        let (rx, sink) = collector();
        let mut pipeline =
            AnalysisPipeline::with_clock(&config, sink, Arc::clone(&clock) as Arc<dyn Clock>);
        let fmt = StreamFormat::new(48000, 1, 32);
        let quiet = f32_frame(0.0);
        let loud = f32_frame(0.8);

        // Frame k (1-based) at t = (k-1) * 0.5 s; every 4th frame is loud.
        let mut results = Vec::new();
        for k in 1..=12 {
            let bytes = if k % 4 == 0 { &loud } else { &quiet };
            assert_eq!(pipeline.push_chunk(bytes, fmt), 1);
            results.extend(rx.try_iter());
            clock.advance(Duration::from_millis(500));
        }

        let beat_frames: Vec<usize> = results
            .iter()
            .enumerate()
            .filter(|(_, r)| r.beat_detected)
            .map(|(i, _)| i + 1)
            .collect();
        assert_eq!(beat_frames, vec![4, 8, 12]);

        // Beats at 1.5 s and 3.5 s, last recompute at 5.0 s -> 2 s interval.
        assert!((results[11].current_bpm - 30.0).abs() < 1e-3);
        assert!((pipeline.current_bpm() - 30.0).abs() < 1e-3);
        // Before the second beat only one timestamp exists.
        assert!(results[6].current_bpm.abs() < f32::EPSILON);
    }

    #[test]
    fn finish_discards_partial_by_default() {
        let (rx, sink) = collector();
        let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), sink);
        pipeline.push_chunk(&vec![0u8; 100 * 4], StreamFormat::new(48000, 1, 32));
        assert_eq!(pipeline.pending_samples(), 100);

        assert!(pipeline.finish(false).is_none());
        assert_eq!(pipeline.pending_samples(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn finish_can_flush_partial() {
        let (rx, sink) = collector();
        let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), sink);
        pipeline.push_chunk(&vec![0u8; 100 * 4], StreamFormat::new(48000, 1, 32));

        assert!(pipeline.finish(true).is_some());
        assert_eq!(rx.try_iter().count(), 1);
        assert!(pipeline.finish(true).is_none());
    }

    #[test]
    fn channel_sink_never_blocks() {
        let (tx, rx) = flume::bounded(2);
        let mut pipeline = AnalysisPipeline::new(&BeatwireConfig::default(), ChannelSink::new(tx));
        let fmt = StreamFormat::new(48000, 1, 32);
        for _ in 0..5 {
            pipeline.push_chunk(&f32_frame(0.0), fmt);
        }
        assert_eq!(rx.len(), 2);
    }

    #[test]
    fn rms_of_dc_frame() {
        assert!((rms(&[0.8; 16]) - 0.8).abs() < 1e-6);
        assert!(rms(&[]).abs() < f32::EPSILON);
    }
}
