use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use fastdl_protocol::UploadId;

use crate::UploadError;

/// Process-local handle of an upload session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    /// Returns the next unused id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        SessionId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of one upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Validating,
    Transferring,
    /// Body fully sent; the server has not answered yet.
    AwaitingIdentifier,
    /// Upload accepted; following server-side processing.
    Tracking,
    Succeeded,
    Failed {
        reason: String,
    },
    Cancelled,
    /// Card removed. Nothing happens after this.
    Dismissed,
}

impl SessionState {
    /// `true` for Succeeded, Failed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Succeeded | SessionState::Failed { .. } | SessionState::Cancelled
        )
    }

    /// `true` while a cancel would still change something.
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            SessionState::Validating
                | SessionState::Transferring
                | SessionState::AwaitingIdentifier
                | SessionState::Tracking
        )
    }

    pub fn is_dismissable(&self) -> bool {
        self.is_terminal() || *self == SessionState::Tracking
    }

    /// Short label for logs and text output.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Validating => "validating",
            SessionState::Transferring => "transferring",
            SessionState::AwaitingIdentifier => "awaiting identifier",
            SessionState::Tracking => "tracking",
            SessionState::Succeeded => "succeeded",
            SessionState::Failed { .. } => "failed",
            SessionState::Cancelled => "cancelled",
            SessionState::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Failed { reason } => write!(f, "failed: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

/// How a session ended, returned once its card is dismissed.
#[derive(Debug)]
pub enum UploadOutcome {
    /// The server accepted the map. `id` is set when progress was tracked.
    Succeeded { id: Option<UploadId> },
    Failed(UploadError),
    Cancelled,
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Succeeded { .. })
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, UploadOutcome::Failed(_))
    }

    pub fn into_result(self) -> Result<Option<UploadId>, UploadError> {
        match self {
            UploadOutcome::Succeeded { id } => Ok(id),
            UploadOutcome::Failed(e) => Err(e),
            UploadOutcome::Cancelled => Err(UploadError::Cancelled),
        }
    }
}
