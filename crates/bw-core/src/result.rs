use serde::{Deserialize, Serialize};

/// Per-frame analysis output published to subscribers.
///
/// One record is produced per completed analysis frame. It is `Copy` and
/// never stored beyond publication.
///
/// Serialized field names are the camelCase names visual clients consume
/// (`hasBass`, `hasTreble`, `bassLevel`, `trebleLevel`, `beatDetected`,
/// `currentBPM`).
///
/// # Example
/// ```
/// use bw_core::result::AnalysisResult;
/// let r = AnalysisResult::default();
/// assert!(!r.has_bass && !r.beat_detected);
/// assert!(r.current_bpm.abs() < f32::EPSILON);
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    /// Bass band average magnitude above the bass threshold.
    pub has_bass: bool,
    /// Treble band average magnitude above the treble threshold.
    pub has_treble: bool,
    /// Bass band average magnitude.
    pub bass_level: f32,
    /// Treble band average magnitude.
    pub treble_level: f32,
    /// An onset was declared on this frame.
    pub beat_detected: bool,
    /// Last computed tempo estimate, 0 when unknown.
    #[serde(rename = "currentBPM")]
    pub current_bpm: f32,
}
