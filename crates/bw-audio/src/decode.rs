use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use symphonia::core::audio::{Channels, SampleBuffer};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, Packet, Track};
use symphonia::core::io::{MediaSourceStream, MediaSourceStreamOptions};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// A fully decoded file, channel-interleaved.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    /// Interleaved f32 samples in [-1, 1].
    pub samples: Vec<f32>,
    /// Samples per second, per channel.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
}

impl DecodedAudio {
    /// Number of sample groups (samples per channel).
    #[must_use]
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    /// Duration in seconds.
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames() as f64 / f64::from(self.sample_rate)
    }
}

/// Decode an audio file into interleaved f32 samples, channels preserved.
///
/// Supports WAV, MP3, FLAC, OGG, AAC via symphonia. The channel layout is
/// kept as-is so the replayed stream goes through the same first-channel
/// downmix as a live device.
///
/// # Errors
/// Returns an error if the file cannot be opened or decoded.
///
/// # Example
/// ```no_run
/// use bw_audio::decode::decode_file;
/// let audio = decode_file("track.wav").unwrap();
/// println!("{} Hz, {} ch", audio.sample_rate, audio.channels);
/// ```
pub fn decode_file(path: impl AsRef<Path>) -> Result<DecodedAudio> {
    let path = path.as_ref();
    let (mut reader, track) = open_default_track(path)?;

    let sample_rate = track.codec_params.sample_rate.unwrap_or(44100);
    let channels = track.codec_params.channels.map_or(1, Channels::count);
    let channels = u16::try_from(channels).context("Nombre de canaux hors limites")?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .with_context(|| format!("Codec non supporté : {}", path.display()))?;

    let mut samples: Vec<f32> = Vec::new();
    // Grown on demand; packets rarely change size.
    let mut scratch: Option<SampleBuffer<f32>> = None;
    let mut scratch_frames = 0usize;

    while let Some(packet) = next_packet(reader.as_mut()) {
        if packet.track_id() != track.id {
            continue;
        }
        let buffer = match decoder.decode(&packet) {
            Ok(buffer) => buffer,
            Err(e) => {
                log::warn!("Paquet ignoré : {e}");
                continue;
            }
        };

        if scratch.is_none() || buffer.capacity() > scratch_frames {
            scratch_frames = buffer.capacity();
            scratch = Some(SampleBuffer::new(scratch_frames as u64, *buffer.spec()));
        }
        if let Some(scratch) = scratch.as_mut() {
            scratch.copy_interleaved_ref(buffer);
            samples.extend_from_slice(scratch.samples());
        }
    }

    if samples.is_empty() {
        anyhow::bail!("Aucun échantillon décodé : {}", path.display());
    }
    log::info!(
        "Décodé : {} ({} Hz, {} ch, {} échantillons)",
        path.display(),
        sample_rate,
        channels,
        samples.len()
    );

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}

/// Probe the container and pick its default track.
fn open_default_track(path: &Path) -> Result<(Box<dyn FormatReader>, Track)> {
    let file = File::open(path).with_context(|| format!("Ouverture impossible : {}", path.display()))?;
    let stream = MediaSourceStream::new(Box::new(file), MediaSourceStreamOptions::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .with_context(|| format!("Format non reconnu : {}", path.display()))?;

    let reader = probed.format;
    let track = reader
        .default_track()
        .cloned()
        .context("Aucune piste audio")?;
    Ok((reader, track))
}

/// Next packet, or `None` at end of stream. Read errors end the stream too.
fn next_packet(reader: &mut dyn FormatReader) -> Option<Packet> {
    match reader.next_packet() {
        Ok(packet) => Some(packet),
        Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => None,
        Err(e) => {
            log::warn!("Lecture interrompue : {e}");
            None
        }
    }
}
