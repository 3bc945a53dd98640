use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Configuration complète d'une session d'analyse.
///
/// Sérialisable en TOML. Chaque champ a une valeur par défaut saine
/// (2048-sample frames, 43-frame energy history, 1.3 sensitivity, 300 ms
/// beat spacing).
///
/// # Example
/// ```
/// use bw_core::config::BeatwireConfig;
/// let config = BeatwireConfig::default();
/// assert_eq!(config.analysis.frame_size, 2048);
/// assert_eq!(config.beat.history_size, 43);
/// ```
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct BeatwireConfig {
    /// Frame size, band ranges and presence thresholds.
    pub analysis: AnalysisConfig,
    /// Onset detection gates.
    pub beat: BeatConfig,
    /// Tempo estimation throttle.
    pub tempo: TempoConfig,
    /// Capture device selection and teardown policy.
    pub capture: CaptureConfig,
    /// Subscriber transport.
    pub broadcast: BroadcastConfig,
}

/// Spectral analysis parameters.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct AnalysisConfig {
    /// Samples per analysis frame. Always a power of two after `clamp_all`.
    pub frame_size: usize,
    /// Bass band lower bound (Hz, inclusive).
    pub bass_low_hz: f32,
    /// Bass band upper bound (Hz, inclusive).
    pub bass_high_hz: f32,
    /// Treble band lower bound (Hz, inclusive).
    pub treble_low_hz: f32,
    /// Treble band upper bound (Hz, inclusive).
    pub treble_high_hz: f32,
    /// Average bass magnitude above which `has_bass` is set.
    pub bass_threshold: f32,
    /// Average treble magnitude above which `has_treble` is set.
    pub treble_threshold: f32,
    /// Emit a diagnostics line every N frames. 0 = disabled.
    pub debug_interval: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            frame_size: 2048,
            bass_low_hz: 20.0,
            bass_high_hz: 200.0,
            treble_low_hz: 4000.0,
            treble_high_hz: 20000.0,
            bass_threshold: 0.001,
            treble_threshold: 0.001,
            debug_interval: 10,
        }
    }
}

/// Onset detector parameters.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BeatConfig {
    /// Energy history capacity, in frames (~1 s at 48 kHz / 2048).
    pub history_size: usize,
    /// Current energy must exceed `mean * sensitivity`.
    pub sensitivity: f32,
    /// History variance must exceed this value.
    pub min_variance: f32,
    /// Minimum spacing between two beats, in milliseconds.
    pub min_interval_ms: u64,
    /// Beat timestamps older than this (seconds) are evicted.
    pub window_secs: f32,
}

impl Default for BeatConfig {
    fn default() -> Self {
        Self {
            history_size: 43,
            sensitivity: 1.3,
            min_variance: 0.01,
            min_interval_ms: 300,
            window_secs: 10.0,
        }
    }
}

impl BeatConfig {
    /// Minimum beat spacing as a `Duration`.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Beat history window as a `Duration`.
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_secs_f32(self.window_secs.max(0.0))
    }
}

/// Tempo estimation throttle.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct TempoConfig {
    /// Minimum time between two BPM recomputations, in milliseconds.
    pub refresh_ms: u64,
}

impl Default for TempoConfig {
    fn default() -> Self {
        Self { refresh_ms: 1000 }
    }
}

impl TempoConfig {
    /// Refresh interval as a `Duration`.
    #[must_use]
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_ms)
    }
}

/// Capture device selection.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
pub struct CaptureConfig {
    /// Input device name. `None` = host default input.
    pub device: Option<String>,
    /// On stop, zero-pad and analyse the partial frame instead of discarding it.
    pub flush_partial: bool,
}

/// Subscriber transport.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct BroadcastConfig {
    /// Listen address for subscribers.
    pub bind: String,
    /// Bounded queue between the analysis thread and the publisher.
    pub queue_capacity: usize,
    /// Per-subscriber socket write timeout, in milliseconds.
    pub write_timeout_ms: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:5343".to_string(),
            queue_capacity: 64,
            write_timeout_ms: 250,
        }
    }
}

impl BroadcastConfig {
    /// Write timeout as a `Duration`.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl BeatwireConfig {
    /// Clamp all numeric fields to their valid ranges.
    /// Run after every parse; a bad file degrades to the nearest usable value.
    pub fn clamp_all(&mut self) {
        let a = &mut self.analysis;
        let size = a.frame_size.clamp(64, 65536);
        if !size.is_power_of_two() {
            log::warn!(
                "frame_size {size} n'est pas une puissance de deux, arrondi à {}",
                size.next_power_of_two()
            );
        }
        a.frame_size = size.next_power_of_two();
        a.bass_low_hz = a.bass_low_hz.max(0.0);
        a.bass_high_hz = a.bass_high_hz.max(a.bass_low_hz);
        a.treble_low_hz = a.treble_low_hz.max(0.0);
        a.treble_high_hz = a.treble_high_hz.max(a.treble_low_hz);
        a.bass_threshold = a.bass_threshold.max(0.0);
        a.treble_threshold = a.treble_threshold.max(0.0);

        let b = &mut self.beat;
        b.history_size = b.history_size.clamp(2, 1024);
        b.sensitivity = b.sensitivity.clamp(1.0, 10.0);
        b.min_variance = b.min_variance.max(0.0);
        b.min_interval_ms = b.min_interval_ms.min(5000);
        b.window_secs = b.window_secs.clamp(1.0, 120.0);

        self.tempo.refresh_ms = self.tempo.refresh_ms.min(60_000);

        self.broadcast.queue_capacity = self.broadcast.queue_capacity.clamp(1, 4096);
        self.broadcast.write_timeout_ms = self.broadcast.write_timeout_ms.clamp(1, 10_000);
    }
}

/// Structure TOML intermédiaire pour désérialisation avec valeurs optionnelles.
#[derive(Deserialize)]
struct ConfigFile {
    analysis: Option<AnalysisSection>,
    beat: Option<BeatSection>,
    tempo: Option<TempoSection>,
    capture: Option<CaptureSection>,
    broadcast: Option<BroadcastSection>,
}

/// Analysis section of the TOML config, all fields optional for partial override.
#[derive(Deserialize)]
struct AnalysisSection {
    frame_size: Option<usize>,
    bass_low_hz: Option<f32>,
    bass_high_hz: Option<f32>,
    treble_low_hz: Option<f32>,
    treble_high_hz: Option<f32>,
    bass_threshold: Option<f32>,
    treble_threshold: Option<f32>,
    debug_interval: Option<u32>,
}

#[derive(Deserialize)]
struct BeatSection {
    history_size: Option<usize>,
    sensitivity: Option<f32>,
    min_variance: Option<f32>,
    min_interval_ms: Option<u64>,
    window_secs: Option<f32>,
}

#[derive(Deserialize)]
struct TempoSection {
    refresh_ms: Option<u64>,
}

#[derive(Deserialize)]
struct CaptureSection {
    device: Option<String>,
    flush_partial: Option<bool>,
}

#[derive(Deserialize)]
struct BroadcastSection {
    bind: Option<String>,
    queue_capacity: Option<usize>,
    write_timeout_ms: Option<u64>,
}

/// Parse a TOML document and merge it over the defaults.
///
/// # Errors
/// Returns an error if the document is not valid TOML for this schema.
///
/// # Example
/// ```
/// use bw_core::config::parse_config;
/// let config = parse_config("[beat]\nsensitivity = 1.5\n").unwrap();
/// assert!((config.beat.sensitivity - 1.5).abs() < f32::EPSILON);
/// assert_eq!(config.beat.history_size, 43);
/// ```
pub fn parse_config(content: &str) -> Result<BeatwireConfig> {
    let file: ConfigFile = toml::from_str(content).context("Erreur de parsing TOML")?;

    let mut config = BeatwireConfig::default();

    if let Some(a) = file.analysis {
        let c = &mut config.analysis;
        if let Some(v) = a.frame_size {
            c.frame_size = v;
        }
        if let Some(v) = a.bass_low_hz {
            c.bass_low_hz = v;
        }
        if let Some(v) = a.bass_high_hz {
            c.bass_high_hz = v;
        }
        if let Some(v) = a.treble_low_hz {
            c.treble_low_hz = v;
        }
        if let Some(v) = a.treble_high_hz {
            c.treble_high_hz = v;
        }
        if let Some(v) = a.bass_threshold {
            c.bass_threshold = v;
        }
        if let Some(v) = a.treble_threshold {
            c.treble_threshold = v;
        }
        if let Some(v) = a.debug_interval {
            c.debug_interval = v;
        }
    }

    if let Some(b) = file.beat {
        let c = &mut config.beat;
        if let Some(v) = b.history_size {
            c.history_size = v;
        }
        if let Some(v) = b.sensitivity {
            c.sensitivity = v;
        }
        if let Some(v) = b.min_variance {
            c.min_variance = v;
        }
        if let Some(v) = b.min_interval_ms {
            c.min_interval_ms = v;
        }
        if let Some(v) = b.window_secs {
            c.window_secs = v;
        }
    }

    if let Some(t) = file.tempo
        && let Some(v) = t.refresh_ms
    {
        config.tempo.refresh_ms = v;
    }

    if let Some(cap) = file.capture {
        if cap.device.is_some() {
            config.capture.device = cap.device;
        }
        if let Some(v) = cap.flush_partial {
            config.capture.flush_partial = v;
        }
    }

    if let Some(br) = file.broadcast {
        let c = &mut config.broadcast;
        if let Some(v) = br.bind {
            c.bind = v;
        }
        if let Some(v) = br.queue_capacity {
            c.queue_capacity = v;
        }
        if let Some(v) = br.write_timeout_ms {
            c.write_timeout_ms = v;
        }
    }

    if config.broadcast.bind.trim().is_empty() {
        return Err(CoreError::Config("broadcast.bind ne peut pas être vide".to_string()).into());
    }

    config.clamp_all();
    Ok(config)
}

/// Charge un fichier TOML et fusionne avec les valeurs par défaut.
///
/// # Errors
/// Returns an error if the file cannot be read or parsed.
///
/// # Example
/// ```no_run
/// use bw_core::config::load_config;
/// use std::path::Path;
/// let config = load_config(Path::new("config/beatwire.toml")).unwrap();
/// ```
pub fn load_config(path: &Path) -> Result<BeatwireConfig> {
    if !path.exists() {
        return Err(CoreError::FileNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Impossible de lire {}", path.display()))?;
    parse_config(&content).with_context(|| format!("Config invalide dans {}", path.display()))
}
