/// One completed analysis frame: exactly `frame_size` mono samples in [-1, 1].
pub type AudioFrame = Vec<f32>;

/// Format of one capture chunk.
///
/// Chunks are channel-interleaved PCM, little-endian.
///
/// # Example
/// ```
/// use bw_audio::accumulator::StreamFormat;
/// let fmt = StreamFormat::new(48000, 2, 16);
/// assert_eq!(fmt.bytes_per_sample(), 2);
/// assert_eq!(fmt.frame_stride(), 4);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamFormat {
    /// Samples per second, per channel.
    pub sample_rate: u32,
    /// Interleaved channel count.
    pub channels: u16,
    /// 16 (signed integer) or 32 (float). Other depths are skipped.
    pub bits_per_sample: u16,
}

impl StreamFormat {
    /// Describe a capture stream.
    #[must_use]
    pub const fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// Bytes per single-channel sample.
    #[inline]
    #[must_use]
    pub const fn bytes_per_sample(&self) -> usize {
        (self.bits_per_sample / 8) as usize
    }

    /// Bytes per interleaved sample group (one sample of every channel).
    #[inline]
    #[must_use]
    pub const fn frame_stride(&self) -> usize {
        self.bytes_per_sample() * self.channels as usize
    }

    /// `true` for the depths the accumulator converts (16-bit int, 32-bit float).
    #[inline]
    #[must_use]
    pub const fn is_supported(&self) -> bool {
        matches!(self.bits_per_sample, 16 | 32) && self.channels > 0
    }
}

/// Normalizes arbitrary capture chunks into fixed-size mono frames.
///
/// Only the first channel of every interleaved group is kept; channels are
/// not averaged. Frames do not overlap: once the buffer is full it is handed
/// out and the write position goes back to zero.
///
/// # Example
/// ```
/// use bw_audio::accumulator::{FrameAccumulator, StreamFormat};
/// let mut acc = FrameAccumulator::new(4);
/// let bytes: Vec<u8> = [0.5f32, 0.25, -0.5, 1.0, 0.0]
///     .iter()
///     .flat_map(|s| s.to_le_bytes())
///     .collect();
/// let frames = acc.ingest(&bytes, StreamFormat::new(48000, 1, 32));
/// assert_eq!(frames, vec![vec![0.5, 0.25, -0.5, 1.0]]);
/// assert_eq!(acc.pending(), 1);
/// ```
pub struct FrameAccumulator {
    buffer: Vec<f32>,
    position: usize,
    skipped_samples: u64,
}

impl FrameAccumulator {
    /// Create an accumulator producing frames of `frame_size` samples.
    ///
    /// # Panics
    /// Panics if `frame_size` is 0.
    #[must_use]
    pub fn new(frame_size: usize) -> Self {
        assert!(frame_size > 0, "frame size must be > 0");
        Self {
            buffer: vec![0.0; frame_size],
            position: 0,
            skipped_samples: 0,
        }
    }

    /// Frame length produced by this accumulator.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.buffer.len()
    }

    /// Samples written into the current, incomplete frame.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.position
    }

    /// Total sample groups dropped because their bit depth is not supported.
    #[must_use]
    pub fn skipped_samples(&self) -> u64 {
        self.skipped_samples
    }

    /// Convert a chunk and collect every frame it completes.
    pub fn ingest(&mut self, bytes: &[u8], format: StreamFormat) -> Vec<AudioFrame> {
        let mut frames = Vec::new();
        self.ingest_with(bytes, format, |frame| frames.push(frame.to_vec()));
        frames
    }

    /// Convert a chunk, calling `on_frame` for each completed frame.
    ///
    /// Allocation-free: the slice passed to `on_frame` borrows the internal
    /// buffer and is only valid during the call. Returns the number of
    /// completed frames.
    pub fn ingest_with(
        &mut self,
        bytes: &[u8],
        format: StreamFormat,
        mut on_frame: impl FnMut(&[f32]),
    ) -> usize {
        if !format.is_supported() {
            let stride = format.frame_stride().max(1);
            self.skipped_samples += (bytes.len() / stride) as u64;
            return 0;
        }

        let width = format.bytes_per_sample();
        let mut completed = 0;

        for group in bytes.chunks_exact(format.frame_stride()) {
            let Some(sample) = decode_sample(&group[..width], format.bits_per_sample) else {
                self.skipped_samples += 1;
                continue;
            };

            self.buffer[self.position] = sample;
            self.position += 1;

            if self.position == self.buffer.len() {
                on_frame(&self.buffer);
                self.position = 0;
                completed += 1;
            }
        }

        completed
    }

    /// Take the partial frame, zero-padded to `frame_size`, and reset.
    ///
    /// Returns `None` when nothing is pending.
    pub fn take_partial(&mut self) -> Option<AudioFrame> {
        if self.position == 0 {
            return None;
        }
        let mut frame = self.buffer[..self.position].to_vec();
        frame.resize(self.buffer.len(), 0.0);
        self.position = 0;
        Some(frame)
    }

    /// Drop the partial frame. Returns how many samples were discarded.
    pub fn discard_partial(&mut self) -> usize {
        std::mem::take(&mut self.position)
    }
}

/// Little-endian PCM sample to float.
#[inline(always)]
fn decode_sample(bytes: &[u8], bits: u16) -> Option<f32> {
    match bits {
        16 => {
            let raw: [u8; 2] = bytes.try_into().ok()?;
            Some(f32::from(i16::from_le_bytes(raw)) / 32768.0)
        }
        32 => {
            let raw: [u8; 4] = bytes.try_into().ok()?;
            Some(f32::from_le_bytes(raw))
        }
        _ => None,
    }
}
