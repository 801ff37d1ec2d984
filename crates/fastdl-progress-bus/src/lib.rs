//! Client side of the `/progress` WebSocket.
//!
//! One [`ProgressBus`] is shared by every upload in the process. Uploads
//! register interest per [`UploadId`](fastdl_protocol::UploadId) and receive
//! only the progress frames tagged with that identifier, through the
//! [`ListenerRegistry`].

pub mod client;
mod pumps;
mod reconnection;
pub mod registry;
pub mod types;

pub use client::{BusError, ProgressBus};
pub use registry::{Listener, ListenerId, ListenerRegistry, Subscription};
pub use types::{BusConfig, BusState, ReconnectConfig};
