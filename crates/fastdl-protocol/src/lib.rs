//! Wire protocol for the FastDL upload endpoint and its `/progress`
//! WebSocket.
//!
//! The upload endpoint answers a multipart `POST` with an
//! [`UploadResponse`]. Post-processing progress is pushed over a single
//! shared WebSocket as [`ProgressUpdate`] frames, after the client has
//! registered interest with a [`SubscribeRequest`].

pub mod constants;
pub mod endpoints;
pub mod messages;

pub use endpoints::progress_url;
pub use messages::{ProgressUpdate, SubscribeRequest, UploadId, UploadResponse};

/// Errors produced while decoding wire messages or deriving endpoints.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("message too large ({0} bytes)")]
    TooLarge(usize),

    #[error("progress ratio is not a finite number")]
    InvalidRatio,

    #[error("unsupported page scheme: {0}")]
    UnsupportedScheme(String),
}
