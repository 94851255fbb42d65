use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to start protocol client '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("protocol client I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode command: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("protocol client disconnected")]
    Disconnected,

    #[error("protocol client is not configured: {0}")]
    NotConfigured(String),
}
