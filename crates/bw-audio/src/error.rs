use thiserror::Error;

/// Capture, decode and analysis failures.
#[derive(Error, Debug)]
pub enum AudioError {
    /// The host has no default input.
    #[error("Aucun périphérique audio d'entrée trouvé")]
    NoInputDevice,

    /// A named input device was requested but not found.
    #[error("Périphérique audio introuvable : {0}")]
    DeviceNotFound(String),

    /// Sample format the accumulator cannot decode.
    #[error("Format audio non supporté : {0}")]
    UnsupportedFormat(String),

    /// Audio stream error (device lost, backend failure).
    #[error("Erreur de stream audio : {0}")]
    StreamError(String),

    /// Audio decode error.
    #[error("Erreur de décodage : {0}")]
    DecodeError(String),

    /// FFT backend rejected its buffers.
    #[error("Erreur FFT : {0}")]
    Fft(String),

    /// Analysis frame does not match the planned FFT length.
    #[error("Taille de frame invalide : {got} échantillons (attendu {expected})")]
    FrameLength {
        /// Planned FFT length.
        expected: usize,
        /// Length of the frame that was passed in.
        got: usize,
    },
}
