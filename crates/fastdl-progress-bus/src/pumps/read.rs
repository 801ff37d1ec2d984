//! Read pump: decodes progress frames and dispatches them to listeners.

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use fastdl_protocol::ProgressUpdate;
use fastdl_protocol::constants::WS_PONG_WAIT;

use super::write::Outbound;
use crate::registry::ListenerRegistry;

/// Reads frames from the socket until cancelled, closed, or silent for
/// longer than [`WS_PONG_WAIT`]. Any incoming frame resets the deadline.
pub(crate) async fn read_pump<S>(
    mut read: S,
    registry: &ListenerRegistry,
    write_tx: mpsc::UnboundedSender<Outbound>,
    cancel: CancellationToken,
) where
    S: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
{
    let deadline = tokio::time::sleep(WS_PONG_WAIT);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            () = &mut deadline => {
                warn!("progress socket silent for {WS_PONG_WAIT:?}, closing");
                break;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(msg)) => {
                        deadline.as_mut().reset(tokio::time::Instant::now() + WS_PONG_WAIT);

                        match msg {
                            tungstenite::Message::Text(text) => {
                                handle_text_message(&text, registry);
                            }
                            tungstenite::Message::Ping(data) => {
                                trace!("received ping, sending pong");
                                let pong = tungstenite::Message::Pong(data);
                                let _ = write_tx.send(Outbound::Frame(pong));
                            }
                            tungstenite::Message::Pong(_) => {
                                trace!("received pong");
                            }
                            tungstenite::Message::Close(frame) => {
                                debug!(?frame, "server closed progress socket");
                                break;
                            }
                            _ => {} // Binary: not part of the protocol.
                        }
                    }
                    Some(Err(e)) => {
                        warn!("progress socket read error: {e}");
                        break;
                    }
                    None => {
                        debug!("progress socket stream ended");
                        break;
                    }
                }
            }
        }
    }
}

/// Decodes one text frame and hands it to the registry.
///
/// Malformed frames are logged and dropped; they never end the pump.
/// Returns the number of listeners reached.
pub(crate) fn handle_text_message(text: &str, registry: &ListenerRegistry) -> usize {
    let update = match ProgressUpdate::parse(text) {
        Ok(u) => u,
        Err(e) => {
            warn!("dropping malformed progress message: {e}");
            return 0;
        }
    };

    trace!(target = %update.target, phase = %update.phase, ratio = update.ratio, "progress update");
    registry.dispatch(&update)
}
