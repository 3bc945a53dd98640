use thiserror::Error;

/// Errors originating from the broadcast module.
#[derive(Error, Debug)]
pub enum BroadcastError {
    /// The listen address could not be bound.
    #[error("Impossible d'écouter sur {addr} : {source}")]
    Bind {
        /// Requested address.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },

    /// A peer did not complete the WebSocket upgrade.
    #[error("Handshake WebSocket échoué : {0}")]
    Handshake(String),

    /// A result could not be serialized.
    #[error("Erreur de sérialisation : {0}")]
    Serialize(#[from] serde_json::Error),

    /// Listener or worker thread failure.
    #[error("Erreur de thread : {0}")]
    Thread(String),
}
