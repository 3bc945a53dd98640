use thiserror::Error;

/// Configuration loading failures that callers may want to match on.
///
/// Everything else (I/O, TOML syntax) travels as plain `anyhow` context.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A value passed parsing but cannot be used.
    #[error("Configuration invalide : {0}")]
    Config(String),

    /// The config path does not exist.
    #[error("Fichier de configuration introuvable : {path}")]
    FileNotFound {
        /// Path as given.
        path: String,
    },
}
