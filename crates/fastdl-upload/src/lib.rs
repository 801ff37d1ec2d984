//! Upload orchestration.
//!
//! Each picked file gets one [`UploadSession`]: a tokio task that validates
//! the map, streams it to the server, and, when the server hands back an
//! identifier, follows post-processing over the shared
//! [`ProgressBus`](fastdl_progress_bus::ProgressBus). Every change is
//! projected into a [`Card`] and pushed to the session's [`SessionView`].
//!
//! # Lifecycle
//!
//! 1. **Validating**: name suffix and `VBSP` magic
//! 2. **Transferring**: multipart upload with byte progress
//! 3. **AwaitingIdentifier**: body sent, waiting for the server's answer
//! 4. **Tracking**: per-phase progress pushed by the server
//! 5. **Succeeded / Failed / Cancelled**, then **Dismissed**

pub mod error;
pub mod filter;
pub mod machine;
pub mod session;
pub mod state;
pub mod view;

#[cfg(test)]
pub(crate) mod test_support;

pub use error::UploadError;
pub use filter::{ListingRow, filter_rows};
pub use machine::{PhaseProgress, SessionMachine};
pub use session::{SessionDeps, UploadSession};
pub use state::{SessionId, SessionState, UploadOutcome};
pub use view::{ByteIndicator, Card, Control, PhaseRow, SessionView, Tone};
