use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bw_broadcast::ResultTap;
use bw_core::clock::Clock;
use bw_core::result::AnalysisResult;

const BAND_INTERVAL: Duration = Duration::from_millis(50);
const BEAT_INTERVAL: Duration = Duration::from_millis(100);
/// BPM drift that triggers a `[BPM UPDATE]` line.
const BPM_UPDATE_DELTA: f32 = 5.0;

/// Terminal view of the result stream.
///
/// Bass, treble and beat markers are rate-limited so a 23 Hz result stream
/// stays readable; tempo changes are always reported.
pub struct ConsolePresenter {
    clock: Arc<dyn Clock>,
    last_bass: Option<Instant>,
    last_treble: Option<Instant>,
    last_beat: Option<Instant>,
    shown_bpm: f32,
}

impl ConsolePresenter {
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last_bass: None,
            last_treble: None,
            last_beat: None,
            shown_bpm: 0.0,
        }
    }

    /// Lines to print for `result`, possibly none.
    pub fn render(&mut self, result: &AnalysisResult) -> Vec<String> {
        let now = self.clock.now();
        let mut markers = Vec::new();

        if result.has_bass && due(&mut self.last_bass, now, BAND_INTERVAL) {
            markers.push(format!("[BASS: {:.6}]", result.bass_level));
        }
        if result.has_treble && due(&mut self.last_treble, now, BAND_INTERVAL) {
            markers.push(format!("[TREBLE: {:.6}]", result.treble_level));
        }
        if result.beat_detected && due(&mut self.last_beat, now, BEAT_INTERVAL) {
            markers.push(format!("[BEAT] BPM: {:.1}", result.current_bpm));
            self.shown_bpm = result.current_bpm;
        }

        let mut lines = Vec::new();
        if !markers.is_empty() {
            lines.push(markers.join(" "));
        }
        if result.current_bpm > 0.0 && (result.current_bpm - self.shown_bpm).abs() > BPM_UPDATE_DELTA
        {
            lines.push(format!("[BPM UPDATE: {:.1}]", result.current_bpm));
            self.shown_bpm = result.current_bpm;
        }
        lines
    }

    /// Publisher tap writing to `out`.
    pub fn into_tap<W: Write + Send + 'static>(mut self, mut out: W) -> ResultTap {
        Box::new(move |result| {
            for line in self.render(result) {
                if let Err(e) = writeln!(out, "{line}") {
                    log::debug!("Sortie console indisponible : {e}");
                    return;
                }
            }
        })
    }
}

/// `true` if more than `interval` has passed since `last`; records `now` if so.
fn due(last: &mut Option<Instant>, now: Instant, interval: Duration) -> bool {
    if last.is_some_and(|t| now.duration_since(t) <= interval) {
        return false;
    }
    *last = Some(now);
    true
}

#[cfg(test)]
mod tests {
    use bw_core::clock::ManualClock;

    use super::*;

    fn presenter() -> (Arc<ManualClock>, ConsolePresenter) {
        let clock = Arc::new(ManualClock::new());
        let presenter = ConsolePresenter::new(clock.clone());
        (clock, presenter)
    }

    fn bass(level: f32) -> AnalysisResult {
        AnalysisResult {
            has_bass: true,
            bass_level: level,
            ..AnalysisResult::default()
        }
    }

    #[test]
    fn quiet_result_prints_nothing() {
        let (_, mut p) = presenter();
        assert!(p.render(&AnalysisResult::default()).is_empty());
    }

    #[test]
    fn band_markers_are_rate_limited() {
        let (clock, mut p) = presenter();
        assert_eq!(p.render(&bass(0.01)), vec!["[BASS: 0.010000]"]);

        clock.advance(Duration::from_millis(20));
        assert!(p.render(&bass(0.02)).is_empty());

        clock.advance(Duration::from_millis(40));
        assert_eq!(p.render(&bass(0.03)), vec!["[BASS: 0.030000]"]);
    }

    #[test]
    fn markers_share_one_line() {
        let (_, mut p) = presenter();
        let result = AnalysisResult {
            has_bass: true,
            has_treble: true,
            bass_level: 0.5,
            treble_level: 0.25,
            beat_detected: true,
            current_bpm: 0.0,
        };
        assert_eq!(
            p.render(&result),
            vec!["[BASS: 0.500000] [TREBLE: 0.250000] [BEAT] BPM: 0.0"]
        );
    }

    #[test]
    fn bpm_update_only_on_significant_change() {
        let (clock, mut p) = presenter();
        let at = |bpm: f32| AnalysisResult {
            current_bpm: bpm,
            ..AnalysisResult::default()
        };

        assert_eq!(p.render(&at(120.0)), vec!["[BPM UPDATE: 120.0]"]);
        clock.advance(Duration::from_secs(1));
        assert!(p.render(&at(123.0)).is_empty());
        assert_eq!(p.render(&at(126.5)), vec!["[BPM UPDATE: 126.5]"]);
        assert!(p.render(&at(0.0)).is_empty());
    }

    #[test]
    fn beat_line_absorbs_bpm_change() {
        let (_, mut p) = presenter();
        let result = AnalysisResult {
            beat_detected: true,
            current_bpm: 128.0,
            ..AnalysisResult::default()
        };
        assert_eq!(p.render(&result), vec!["[BEAT] BPM: 128.0"]);
    }

    #[test]
    fn tap_writes_lines() {
        use parking_lot::Mutex;

        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let (_, p) = presenter();
        let out = Shared::default();
        let mut tap = p.into_tap(out.clone());
        tap(&bass(1.0));
        assert_eq!(String::from_utf8(out.0.lock().clone()).unwrap(), "[BASS: 1.000000]\n");
    }
}
