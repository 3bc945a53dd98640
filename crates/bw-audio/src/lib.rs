// Audio capture, frame accumulation, spectral analysis and beat/tempo
// detection for beatwire.

pub mod accumulator;
pub mod beat;
pub mod capture;
pub mod decode;
pub mod error;
pub mod pipeline;
pub mod spectrum;
pub mod tempo;

pub use error::AudioError;
