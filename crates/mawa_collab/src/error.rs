use thiserror::Error;

/// Unified error type for collaboration operations
#[derive(Debug, Error)]
pub enum CollabError {
    /// An inbound payload could not be decoded as a CRDT update
    #[error("Failed to decode update: {0}")]
    UpdateDecode(String),

    /// A decoded update could not be integrated into the document
    #[error("Failed to apply update: {0}")]
    UpdateApply(String),

    /// Failure registering a document observer
    #[error("Failed to observe document updates: {0}")]
    Observe(String),

    /// Transport-level error (connection, send, receive)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Invalid connector configuration (e.g., unparseable relay URL)
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// A domain store failed to bind the shared document
    #[error("Store '{store}' failed to bind: {message}")]
    StoreBind { store: String, message: String },
}

/// Result type alias for collaboration operations
pub type Result<T> = std::result::Result<T, CollabError>;
