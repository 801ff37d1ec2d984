//! Session error types.

use fastdl_progress_bus::BusError;
use fastdl_transfer::{TransferError, ValidationError};

/// Why an upload session did not succeed.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("upload cancelled")]
    Cancelled,

    /// Never fails a session: the upload itself already succeeded.
    #[error("progress channel error: {0}")]
    ProgressChannel(#[from] BusError),
}

impl UploadError {
    /// Reason shown on the card.
    pub fn reason(&self) -> String {
        match self {
            UploadError::Validation(e) => e.to_string(),
            UploadError::Transfer(e) => e.reason(),
            UploadError::Cancelled => "Upload cancelled.".to_string(),
            UploadError::ProgressChannel(e) => e.to_string(),
        }
    }
}
