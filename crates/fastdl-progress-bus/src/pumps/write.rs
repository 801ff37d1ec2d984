//! Write pump: serialises outbound frames onto the socket.

use std::collections::HashSet;

use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use fastdl_protocol::{SubscribeRequest, UploadId};

/// Something to put on the socket.
#[derive(Debug)]
pub(crate) enum Outbound {
    /// Ask the server to forward progress for this upload.
    Register(UploadId),
    /// Control frame (ping, pong) written as is.
    Frame(tungstenite::Message),
}

/// Keys the server has been asked to forward on the current socket.
///
/// The server never forgets a registration for the lifetime of a socket, so
/// a key is sent at most once per connection.
#[derive(Debug, Default)]
pub(crate) struct Registered(HashSet<String>);

impl Registered {
    pub(crate) fn len(&self) -> usize {
        self.0.len()
    }

    /// Encodes the registration frame for `target`, or `None` if this socket
    /// already carries it.
    pub(crate) fn frame_for(&mut self, target: &UploadId) -> Option<tungstenite::Message> {
        if !self.0.insert(target.key()) {
            trace!(target = %target, "already registered on this socket");
            return None;
        }
        match SubscribeRequest::new(target.clone()).to_json() {
            Ok(json) => Some(tungstenite::Message::Text(json.into())),
            Err(e) => {
                self.0.remove(&target.key());
                warn!(target = %target, "failed to encode registration: {e}");
                None
            }
        }
    }
}

/// Forwards queued frames to the socket until cancelled, the queue closes,
/// or a write fails.
///
/// The receiver is borrowed so work queued while the socket is down is
/// picked up by the next connection's pump.
pub(crate) async fn write_pump<S>(
    mut write: S,
    write_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    registered: &mut Registered,
    cancel: CancellationToken,
) where
    S: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = write_rx.recv() => next,
        };
        let frame = match next {
            Some(Outbound::Register(target)) => match registered.frame_for(&target) {
                Some(frame) => frame,
                None => continue,
            },
            Some(Outbound::Frame(frame)) => frame,
            None => break,
        };

        trace!(kind = frame_kind(&frame), "writing frame");
        if let Err(e) = write.send(frame).await {
            error!("progress socket write error: {e}");
            break;
        }
    }

    let _ = write.send(tungstenite::Message::Close(None)).await;
}

fn frame_kind(msg: &tungstenite::Message) -> &'static str {
    match msg {
        tungstenite::Message::Text(_) => "text",
        tungstenite::Message::Binary(_) => "binary",
        tungstenite::Message::Ping(_) => "ping",
        tungstenite::Message::Pong(_) => "pong",
        tungstenite::Message::Close(_) => "close",
        tungstenite::Message::Frame(_) => "frame",
    }
}
