//! Client-side map validation and the upload request itself.
//!
//! A map is first checked by [`validate_map`] (file name suffix and the
//! `VBSP` magic), then sent by a [`TransferChannel`] as one multipart
//! request whose byte progress and outcome arrive as [`TransferEvent`]s.

mod channel;
mod file;
mod progress;
mod validation;

pub use channel::{TransferChannel, TransferEvent, TransferHandle};
pub use file::CandidateFile;
pub use progress::{ByteProgress, SpeedCalculator};
pub use validation::{ValidationError, check_signature, has_map_extension, validate_map};

use fastdl_protocol::constants::TRANSPORT_FAILURE_REASON;

/// Chunk size used when streaming the map file into the request body.
pub const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Errors produced by an upload request.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("server returned HTTP {0}")]
    Status(u16),

    #[error("server rejected upload: {0}")]
    Server(String),

    #[error("invalid server response: {0}")]
    InvalidResponse(#[source] serde_json::Error),
}

impl TransferError {
    /// Reason shown to the user on a failure card.
    ///
    /// Server-reported reasons are shown verbatim; transport problems get a
    /// generic reason so they read differently from application failures.
    pub fn reason(&self) -> String {
        match self {
            TransferError::Server(message) => message.clone(),
            TransferError::Transport(_) | TransferError::Io(_) => {
                TRANSPORT_FAILURE_REASON.to_string()
            }
            TransferError::Status(code) => format!("Upload failed: server returned HTTP {code}."),
            TransferError::InvalidResponse(_) => {
                "Upload failed: unexpected response from the server.".to_string()
            }
        }
    }

    /// `true` for failures below the application protocol.
    pub fn is_transport(&self) -> bool {
        matches!(self, TransferError::Transport(_) | TransferError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_reason_is_verbatim() {
        let err = TransferError::Server("File already exists.".into());
        assert_eq!(err.reason(), "File already exists.");
        assert!(!err.is_transport());
    }

    #[test]
    fn io_failures_use_generic_reason() {
        let err = TransferError::Io(std::io::Error::other("reset"));
        assert_eq!(err.reason(), TRANSPORT_FAILURE_REASON);
        assert!(err.is_transport());
    }

    #[test]
    fn status_reason_mentions_code() {
        assert!(TransferError::Status(502).reason().contains("502"));
    }
}
