//! Connection lifetime: pumps for one socket, and the reconnect loop that
//! replaces the socket when it drops.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{WsStream, open_socket};
use crate::pumps::ping::ping_pump;
use crate::pumps::read::read_pump;
use crate::pumps::write::{Outbound, Registered, write_pump};
use crate::registry::ListenerRegistry;
use crate::types::{BusConfig, BusState};

/// Runs the read, write and ping pumps over one socket until any of them
/// stops or `cancel` fires.
///
/// With `resubscribe`, one registration frame per identifier that still has
/// listeners is written first, so the server resumes forwarding after a
/// reconnect. Registrations queued for those identifiers while the socket
/// was down are then skipped by the write pump.
pub(crate) async fn run_connection<R, W>(
    read: R,
    mut write: W,
    registry: &ListenerRegistry,
    write_tx: &mpsc::UnboundedSender<Outbound>,
    write_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    keepalive: Duration,
    cancel: &CancellationToken,
    resubscribe: bool,
) where
    R: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>> + Unpin,
    W: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin,
{
    let mut registered = Registered::default();
    if resubscribe {
        for target in registry.targets() {
            let Some(frame) = registered.frame_for(&target) else {
                continue;
            };
            if let Err(e) = write.send(frame).await {
                warn!("failed to re-register after reconnect: {e}");
                return;
            }
        }
        debug!(count = registered.len(), "registrations restored");
    }

    let conn_cancel = cancel.child_token();
    let reader = async {
        read_pump(read, registry, write_tx.clone(), conn_cancel.clone()).await;
        conn_cancel.cancel();
    };
    let writer = async {
        write_pump(write, write_rx, &mut registered, conn_cancel.clone()).await;
        conn_cancel.cancel();
    };
    tokio::join!(
        reader,
        writer,
        ping_pump(write_tx.clone(), keepalive, conn_cancel.clone())
    );
}

/// Keeps the progress socket alive until `cancel` fires, reconnecting with
/// backoff whenever it drops.
pub(crate) async fn supervise(
    first: WsStream,
    config: BusConfig,
    registry: Arc<ListenerRegistry>,
    write_tx: mpsc::UnboundedSender<Outbound>,
    mut write_rx: mpsc::UnboundedReceiver<Outbound>,
    state_tx: watch::Sender<BusState>,
    cancel: CancellationToken,
) {
    let mut next = Some(first);
    let mut resubscribe = false;
    let mut attempt = 0u32;

    loop {
        if let Some(ws) = next.take() {
            attempt = 0;
            state_tx.send_replace(BusState::Connected);
            info!(url = %config.url, "progress socket connected");

            let (write, read) = ws.split();
            run_connection(
                read,
                write,
                &registry,
                &write_tx,
                &mut write_rx,
                config.keepalive,
                &cancel,
                resubscribe,
            )
            .await;
            resubscribe = true;
        }

        if cancel.is_cancelled() {
            break;
        }

        attempt += 1;
        let delay = config.reconnect.delay_for_attempt(attempt);
        state_tx.send_replace(BusState::Reconnecting { attempt });
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "progress socket lost, reconnecting"
        );

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            result = open_socket(&config) => match result {
                Ok(ws) => next = Some(ws),
                Err(e) => debug!(attempt, "reconnect failed: {e}"),
            },
        }
    }

    state_tx.send_replace(BusState::Closed);
    debug!("progress socket supervisor stopped");
}
