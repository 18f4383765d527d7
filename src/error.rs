//! Error types for sftp-client.

use thiserror::Error;

/// Main error type for all client operations.
#[derive(Debug, Error)]
pub enum SftpError {
    /// I/O error reading or writing the stream. Fatal to the session.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// Malformed frame, decode failure or a response not valid in context.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Version mismatch or unexpected first message.
    #[error("Handshake failed: {0}")]
    Handshake(String),

    /// Response carrying an id with no outstanding request.
    #[error("No outstanding request for {}", display_id(.id))]
    Routing {
        /// Correlation id of the stray response, `None` if the variant has no id.
        id: Option<u32>,
    },

    /// Server-returned status for one specific request.
    #[error("Server returned status {code}: {message}")]
    Operation {
        /// Numeric SFTP status code.
        code: u32,
        /// Server-supplied error text.
        message: String,
    },

    /// The session is closing or closed.
    #[error("Session shut down: {0}")]
    Shutdown(String),

    /// Every request id is outstanding at once.
    #[error("Request id space exhausted")]
    RequestIdsExhausted,
}

impl SftpError {
    /// Whether this error tears down the whole session when the dispatcher
    /// hits it.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SftpError::Transport(_)
                | SftpError::Protocol(_)
                | SftpError::Handshake(_)
                | SftpError::RequestIdsExhausted
        )
    }

    /// Status code when this is an [`SftpError::Operation`].
    pub fn status_code(&self) -> Option<u32> {
        match self {
            SftpError::Operation { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn display_id(id: &Option<u32>) -> String {
    match id {
        Some(id) => format!("request id {}", id),
        None => "uncorrelated message".to_string(),
    }
}

/// Result type alias using SftpError.
pub type Result<T> = std::result::Result<T, SftpError>;
