use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::accumulator::StreamFormat;
use crate::decode::{self, DecodedAudio};
use crate::error::AudioError;

/// Receives every capture chunk on the capture thread.
pub type ChunkHandler = Box<dyn FnMut(&[u8], StreamFormat) + Send + 'static>;

/// Receives lifecycle notifications from the capture thread.
pub type StatusHandler = Box<dyn FnMut(CaptureStatus) + Send + 'static>;

/// Terminal events of a capture source.
#[derive(Debug)]
pub enum CaptureStatus {
    /// The source failed (device lost, backend error). The session is over.
    Failed(AudioError),
    /// A finite source reached its end.
    Finished,
}

/// Fournit des chunks PCM entrelacés à la session.
///
/// Implémenté par : `DeviceCapture`, `FileCapture`.
///
/// # Example
/// ```
/// use bw_audio::accumulator::StreamFormat;
/// use bw_audio::capture::{CaptureSource, ChunkHandler, StatusHandler};
/// use bw_audio::AudioError;
///
/// struct Silence;
/// impl CaptureSource for Silence {
///     fn describe(&self) -> String { "silence".into() }
///     fn start(&mut self, mut on_chunk: ChunkHandler, _: StatusHandler)
///         -> Result<StreamFormat, AudioError> {
///         let format = StreamFormat::new(48000, 1, 16);
///         on_chunk(&[0u8; 64], format);
///         Ok(format)
///     }
///     fn stop(&mut self) {}
/// }
/// ```
pub trait CaptureSource {
    /// Human-readable name for logs.
    fn describe(&self) -> String;

    /// Start delivering chunks. Returns the stream format.
    ///
    /// `on_chunk` is called from the source's own thread, sequentially.
    ///
    /// # Errors
    /// Returns an error if the source cannot be opened.
    fn start(
        &mut self,
        on_chunk: ChunkHandler,
        on_status: StatusHandler,
    ) -> Result<StreamFormat, AudioError>;

    /// Stop delivering chunks and release the underlying resource.
    ///
    /// After `stop` returns, `on_chunk` is no longer called. Idempotent.
    fn stop(&mut self);
}

/// Names of the host's input devices.
///
/// # Errors
/// Returns an error if the host cannot enumerate devices.
pub fn list_input_devices() -> Result<Vec<String>, AudioError> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| AudioError::StreamError(e.to_string()))?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}

/// Live capture from an input device via cpal.
///
/// Uses a raw input stream so chunks reach the pipeline as bytes with their
/// real bit depth. Only 16-bit integer and 32-bit float devices are accepted.
///
/// # Example
/// ```no_run
/// use bw_audio::capture::{CaptureSource, DeviceCapture};
/// let mut capture = DeviceCapture::new(None);
/// let format = capture.start(Box::new(|_, _| {}), Box::new(|_| {})).unwrap();
/// ```
pub struct DeviceCapture {
    device_name: Option<String>,
    stream: Option<cpal::Stream>,
}

impl DeviceCapture {
    /// Capture from `device_name`, or from the host default input if `None`.
    #[must_use]
    pub fn new(device_name: Option<String>) -> Self {
        Self {
            device_name,
            stream: None,
        }
    }

    fn open_device(&self) -> Result<cpal::Device, AudioError> {
        let host = cpal::default_host();
        match self.device_name.as_deref() {
            None => host.default_input_device().ok_or(AudioError::NoInputDevice),
            Some(wanted) => host
                .input_devices()
                .map_err(|e| AudioError::StreamError(e.to_string()))?
                .find(|d| d.name().is_ok_and(|n| n == wanted))
                .ok_or_else(|| AudioError::DeviceNotFound(wanted.to_string())),
        }
    }
}

impl CaptureSource for DeviceCapture {
    fn describe(&self) -> String {
        match &self.device_name {
            Some(name) => format!("input device '{name}'"),
            None => "default input device".to_string(),
        }
    }

    fn start(
        &mut self,
        mut on_chunk: ChunkHandler,
        mut on_status: StatusHandler,
    ) -> Result<StreamFormat, AudioError> {
        let device = self.open_device()?;
        let name = device.name().unwrap_or_else(|_| "?".to_string());

        let supported = device
            .default_input_config()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;
        let sample_format = supported.sample_format();

        // cpal delivers native-endian samples; every supported host is little-endian.
        let bits_per_sample = match sample_format {
            cpal::SampleFormat::I16 => 16,
            cpal::SampleFormat::F32 => 32,
            other => return Err(AudioError::UnsupportedFormat(format!("{other:?}"))),
        };
        let format = StreamFormat::new(
            supported.sample_rate().0,
            supported.channels(),
            bits_per_sample,
        );

        let stream = device
            .build_input_stream_raw(
                &supported.config(),
                sample_format,
                move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                    on_chunk(data.bytes(), format);
                },
                move |err| {
                    log::error!("Audio stream error: {err}");
                    on_status(CaptureStatus::Failed(AudioError::StreamError(err.to_string())));
                },
                None,
            )
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        log::info!(
            "Capture démarrée : {name} ({} Hz, {} ch, {} bits)",
            format.sample_rate,
            format.channels,
            format.bits_per_sample
        );
        self.stream = Some(stream);
        Ok(format)
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            if let Err(e) = stream.pause() {
                log::debug!("pause before drop failed: {e}");
            }
            drop(stream);
            log::info!("Capture arrêtée");
        }
    }
}

impl Drop for DeviceCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Real-time replay of a decoded audio file, as if it came from a device.
///
/// Chunks are 32-bit float interleaved bytes paced against the wall clock.
///
/// # Example
/// ```no_run
/// use bw_audio::capture::{CaptureSource, FileCapture};
/// let mut replay = FileCapture::open("track.flac", true).unwrap();
/// replay.start(Box::new(|_, _| {}), Box::new(|_| {})).unwrap();
/// ```
pub struct FileCapture {
    path: PathBuf,
    audio: Arc<DecodedAudio>,
    looping: bool,
    chunk_frames: usize,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl FileCapture {
    /// Samples per channel per chunk (~10 ms at 48 kHz).
    pub const DEFAULT_CHUNK_FRAMES: usize = 480;

    /// Decode `path` up front so format errors surface before the session starts.
    ///
    /// # Errors
    /// Returns [`AudioError::DecodeError`] if the file cannot be decoded.
    pub fn open(path: impl AsRef<Path>, looping: bool) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let audio = decode::decode_file(path).map_err(|e| AudioError::DecodeError(format!("{e:#}")))?;
        Ok(Self::from_decoded(path, audio, looping))
    }

    /// Replay already-decoded audio.
    #[must_use]
    pub fn from_decoded(path: impl Into<PathBuf>, audio: DecodedAudio, looping: bool) -> Self {
        Self {
            path: path.into(),
            audio: Arc::new(audio),
            looping,
            chunk_frames: Self::DEFAULT_CHUNK_FRAMES,
            running: Arc::new(AtomicBool::new(false)),
            thread: None,
        }
    }

    /// Override the chunk size (samples per channel).
    #[must_use]
    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames.max(1);
        self
    }

    /// Stream format of the replayed chunks.
    #[must_use]
    pub fn format(&self) -> StreamFormat {
        StreamFormat::new(self.audio.sample_rate, self.audio.channels, 32)
    }

    /// `true` while the replay thread is delivering chunks.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl CaptureSource for FileCapture {
    fn describe(&self) -> String {
        format!("file '{}'", self.path.display())
    }

    fn start(
        &mut self,
        mut on_chunk: ChunkHandler,
        mut on_status: StatusHandler,
    ) -> Result<StreamFormat, AudioError> {
        if self.thread.is_some() {
            return Ok(self.format());
        }

        let format = self.format();
        let audio = Arc::clone(&self.audio);
        let running = Arc::clone(&self.running);
        let looping = self.looping;
        let chunk_len = self.chunk_frames * usize::from(format.channels.max(1));
        running.store(true, Ordering::Relaxed);

        let handle = thread::Builder::new()
            .name("bw-file-capture".to_string())
            .spawn(move || {
                let mut bytes: Vec<u8> = Vec::with_capacity(chunk_len * 4);
                let group = usize::from(format.channels.max(1));
                let started = Instant::now();
                let mut frames_sent: u64 = 0;

                if audio.samples.is_empty() {
                    log::warn!("Rien à rejouer : fichier sans échantillons");
                }

                // Un fichier vide termine tout de suite, même en boucle.
                'replay: while running.load(Ordering::Relaxed) && !audio.samples.is_empty() {
                    for chunk in audio.samples.chunks(chunk_len) {
                        if !running.load(Ordering::Relaxed) {
                            break 'replay;
                        }
                        bytes.clear();
                        bytes.extend(chunk.iter().flat_map(|s| s.to_le_bytes()));
                        on_chunk(&bytes, format);

                        frames_sent += (chunk.len() / group) as u64;
                        let due = started
                            + Duration::from_secs_f64(
                                frames_sent as f64 / f64::from(format.sample_rate.max(1)),
                            );
                        if let Some(wait) = due.checked_duration_since(Instant::now()) {
                            thread::sleep(wait);
                        }
                    }
                    if !looping {
                        break;
                    }
                }
                // Stopped from outside: no Finished status.
                if running.swap(false, Ordering::Relaxed) {
                    on_status(CaptureStatus::Finished);
                }
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        log::info!(
            "Rejeu démarré : {} ({} Hz, {} ch, {:.1} s)",
            self.path.display(),
            format.sample_rate,
            format.channels,
            self.audio.duration_secs()
        );
        self.thread = Some(handle);
        Ok(format)
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::warn!("File capture thread panicked");
            }
            log::info!("Rejeu arrêté");
        }
    }
}

impl Drop for FileCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn short_clip(channels: u16, frames: usize) -> DecodedAudio {
        DecodedAudio {
            samples: (0..frames * usize::from(channels))
                .map(|i| (i % 7) as f32 / 10.0)
                .collect(),
            // High rate so pacing keeps the test fast.
            sample_rate: 1_000_000,
            channels,
        }
    }

    #[test]
    fn replays_whole_file_then_finishes() {
        let mut capture =
            FileCapture::from_decoded("clip.wav", short_clip(2, 5000), false).with_chunk_frames(256);
        let (chunk_tx, chunk_rx) = flume::unbounded();
        let (status_tx, status_rx) = flume::unbounded();

        let format = capture
            .start(
                Box::new(move |bytes, fmt| {
                    let _ = chunk_tx.send((bytes.len(), fmt));
                }),
                Box::new(move |status| {
                    let _ = status_tx.send(status);
                }),
            )
            .unwrap();
        assert_eq!(format, StreamFormat::new(1_000_000, 2, 32));

        let status = status_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(status, CaptureStatus::Finished));
        capture.stop();

        let total_bytes: usize = chunk_rx.try_iter().map(|(len, _)| len).sum();
        assert_eq!(total_bytes, 5000 * 2 * 4);
        assert!(!capture.is_running());
    }

    #[test]
    fn stop_halts_looping_replay() {
        let mut capture =
            FileCapture::from_decoded("clip.wav", short_clip(1, 1000), true).with_chunk_frames(100);
        let (chunk_tx, chunk_rx) = flume::unbounded();
        capture
            .start(
                Box::new(move |bytes, _| {
                    let _ = chunk_tx.send(bytes.len());
                }),
                Box::new(|_| {}),
            )
            .unwrap();

        // Looping: more than one pass worth of chunks eventually arrives.
        let mut seen = 0;
        while seen < 25 {
            chunk_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            seen += 1;
        }
        capture.stop();
        assert!(!capture.is_running());

        // Nothing is delivered after stop returns.
        let _ = chunk_rx.try_iter().count();
        thread::sleep(Duration::from_millis(20));
        assert_eq!(chunk_rx.try_iter().count(), 0);
    }

    #[test]
    fn empty_looping_file_finishes_instead_of_spinning() {
        let empty = DecodedAudio {
            samples: Vec::new(),
            sample_rate: 48000,
            channels: 1,
        };
        let mut capture = FileCapture::from_decoded("empty.wav", empty, true);
        let (chunk_tx, chunk_rx) = flume::unbounded();
        let (status_tx, status_rx) = flume::unbounded();
        capture
            .start(
                Box::new(move |bytes, _| {
                    let _ = chunk_tx.send(bytes.len());
                }),
                Box::new(move |status| {
                    let _ = status_tx.send(status);
                }),
            )
            .unwrap();

        let status = status_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert!(matches!(status, CaptureStatus::Finished));
        capture.stop();
        assert!(!capture.is_running());
        assert_eq!(chunk_rx.try_iter().count(), 0);
    }

    #[test]
    fn describe_names_the_source() {
        let capture = FileCapture::from_decoded("clip.wav", short_clip(1, 10), false);
        assert_eq!(capture.describe(), "file 'clip.wav'");
        assert_eq!(DeviceCapture::new(None).describe(), "default input device");
    }
}
