/// Configuration, shared types and clock for beatwire.
///
/// This crate contains the types exchanged between the analysis pipeline
/// (`bw-audio`), the transport (`bw-broadcast`) and the binary (`bw-app`).

pub mod clock;
pub mod config;
pub mod error;
pub mod result;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::BeatwireConfig;
pub use error::CoreError;
pub use result::AnalysisResult;
