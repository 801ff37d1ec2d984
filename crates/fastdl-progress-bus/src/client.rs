//! The shared progress socket.
//!
//! Registration follows the server's protocol: after `{"m": <id>}` is sent
//! the server forwards every `{"m", "t", "p"}` frame for that upload on this
//! socket. Listeners are registered before the frame is sent so no early
//! update can slip past.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, header};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use fastdl_protocol::UploadId;
use fastdl_protocol::constants::{WS_MAX_MESSAGE_SIZE, WS_PING_PERIOD};

use crate::pumps::write::Outbound;
use crate::registry::{Listener, ListenerRegistry, Subscription};
use crate::types::{BusConfig, BusState};

pub(crate) type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Errors from the progress bus.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("cookie is not a valid header value")]
    InvalidCookie,

    #[error("connection closed")]
    Closed,
}

/// Opens one WebSocket to the progress endpoint.
pub(crate) async fn open_socket(config: &BusConfig) -> Result<WsStream, BusError> {
    let mut request = config.url.as_str().into_client_request()?;
    if let Some(cookie) = &config.cookie {
        let value = HeaderValue::from_str(cookie).map_err(|_| BusError::InvalidCookie)?;
        request.headers_mut().insert(header::COOKIE, value);
    }

    let mut ws_config = tungstenite::protocol::WebSocketConfig::default();
    ws_config.max_message_size = Some(WS_MAX_MESSAGE_SIZE);
    ws_config.max_frame_size = Some(WS_MAX_MESSAGE_SIZE);
    let (ws, _) = tokio_tungstenite::connect_async_with_config(request, Some(ws_config), false).await?;
    Ok(ws)
}

/// Single push channel shared by every upload session.
pub struct ProgressBus {
    registry: Arc<ListenerRegistry>,
    write_tx: mpsc::UnboundedSender<Outbound>,
    state_rx: watch::Receiver<BusState>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl ProgressBus {
    /// Connects to the progress endpoint and keeps the socket alive,
    /// reconnecting with backoff until [`close`](Self::close) is called.
    ///
    /// Fails only if the first connection cannot be established.
    pub async fn connect(config: BusConfig) -> Result<Self, BusError> {
        info!(url = %config.url, "connecting progress socket");
        let ws = open_socket(&config).await?;

        let registry = Arc::new(ListenerRegistry::new());
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(BusState::Connecting);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(crate::reconnection::supervise(
            ws,
            config,
            registry.clone(),
            write_tx.clone(),
            write_rx,
            state_tx,
            cancel.clone(),
        ));

        Ok(Self {
            registry,
            write_tx,
            state_rx,
            cancel,
            task,
        })
    }

    /// Runs the bus over an already-established transport, without
    /// reconnection. When the transport ends the bus is closed.
    pub fn with_transport<R, W>(read: R, write: W) -> Self
    where
        R: StreamExt<Item = Result<tungstenite::Message, tungstenite::Error>>
            + Unpin
            + Send
            + 'static,
        W: SinkExt<tungstenite::Message, Error = tungstenite::Error> + Unpin + Send + 'static,
    {
        let registry = Arc::new(ListenerRegistry::new());
        let (write_tx, mut write_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(BusState::Connected);
        let cancel = CancellationToken::new();

        let task = {
            let registry = registry.clone();
            let write_tx = write_tx.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                crate::reconnection::run_connection(
                    read,
                    write,
                    &registry,
                    &write_tx,
                    &mut write_rx,
                    WS_PING_PERIOD,
                    &cancel,
                    false,
                )
                .await;
                cancel.cancel();
                state_tx.send_replace(BusState::Closed);
                debug!("progress transport ended");
            })
        };

        Self {
            registry,
            write_tx,
            state_rx,
            cancel,
            task,
        }
    }

    /// Registers `listener` for `target` and queues the registration frame.
    ///
    /// Never waits on the socket: while it is down the frame stays queued,
    /// and the reconnect sends it at most once. The returned guard removes
    /// the listener when dropped.
    pub fn subscribe(
        &self,
        target: &UploadId,
        listener: Listener,
    ) -> Result<Subscription, BusError> {
        if self.cancel.is_cancelled() {
            return Err(BusError::Closed);
        }

        let subscription = self.registry.subscribe(target, listener);
        self.write_tx
            .send(Outbound::Register(target.clone()))
            .map_err(|_| BusError::Closed)?;

        debug!(target = %target, "registered for progress");
        Ok(subscription)
    }

    /// Listener registry shared by all subscriptions.
    pub fn registry(&self) -> &Arc<ListenerRegistry> {
        &self.registry
    }

    /// Watch channel of the connection state.
    pub fn state(&self) -> watch::Receiver<BusState> {
        self.state_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Closes the socket and stops reconnecting.
    pub async fn close(&self) {
        self.cancel.cancel();
        let mut state = self.state_rx.clone();
        let _ = state.wait_for(|s| *s == BusState::Closed).await;
    }
}

impl Drop for ProgressBus {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use fastdl_protocol::ProgressUpdate;
    use futures_util::{sink, stream};
    use tokio::net::TcpListener;
    use url::Url;

    use crate::types::ReconnectConfig;

    type Frame = Result<tungstenite::Message, tungstenite::Error>;

    /// In-memory transport: frames pushed into the returned sender are read
    /// by the bus, frames written by the bus arrive on the receiver.
    fn loopback() -> (
        ProgressBus,
        mpsc::UnboundedSender<Frame>,
        mpsc::UnboundedReceiver<tungstenite::Message>,
    ) {
        let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let read = Box::pin(stream::unfold(in_rx, |mut rx| async move {
            rx.recv().await.map(|frame| (frame, rx))
        }));
        let write = Box::pin(sink::unfold(out_tx, |tx, msg: tungstenite::Message| async move {
            let _ = tx.send(msg);
            Ok::<_, tungstenite::Error>(tx)
        }));

        (ProgressBus::with_transport(read, write), in_tx, out_rx)
    }

    fn recorder() -> (Listener, Arc<Mutex<Vec<(String, f64)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let l: Listener = Arc::new(move |u: &ProgressUpdate| {
            s.lock().unwrap().push((u.phase.clone(), u.ratio));
        });
        (l, seen)
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn subscribe_sends_one_registration() {
        let (bus, _in_tx, mut out_rx) = loopback();
        let (l, _) = recorder();

        let _sub = bus.subscribe(&"42".into(), l).unwrap();

        let frame = out_rx.recv().await.expect("registration");
        assert!(matches!(frame, tungstenite::Message::Text(t) if t.as_str() == r#"{"m":"42"}"#));
        assert!(out_rx.try_recv().is_err());
        assert_eq!(bus.registry().listener_count("42"), 1);
    }

    #[tokio::test]
    async fn updates_reach_subscribed_listener_in_order() {
        let (bus, in_tx, _out_rx) = loopback();
        let (l, seen) = recorder();
        let _sub = bus.subscribe(&"42".into(), l).unwrap();

        for text in [
            r#"{"m":"42","t":"compression","p":0.5}"#,
            "{broken",
            r#"{"m":"43","t":"compression","p":0.9}"#,
            r#"{"m":"42","t":"compression","p":1.0}"#,
        ] {
            in_tx.send(Ok(tungstenite::Message::Text(text.into()))).unwrap();
        }

        wait_until(|| seen.lock().unwrap().len() == 2).await;
        assert_eq!(
            *seen.lock().unwrap(),
            vec![("compression".to_string(), 0.5), ("compression".to_string(), 1.0)]
        );
        assert!(!bus.is_closed());
    }

    #[tokio::test]
    async fn dropped_subscription_receives_nothing() {
        let (bus, in_tx, _out_rx) = loopback();
        let (l, seen) = recorder();
        let (witness, witness_seen) = recorder();
        let sub = bus.subscribe(&"42".into(), l).unwrap();
        let _witness = bus.subscribe(&"42".into(), witness).unwrap();
        drop(sub);

        in_tx
            .send(Ok(tungstenite::Message::Text(
                r#"{"m":"42","t":"compression","p":0.5}"#.into(),
            )))
            .unwrap();

        wait_until(|| witness_seen.lock().unwrap().len() == 1).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_end_closes_bus() {
        let (bus, in_tx, _out_rx) = loopback();
        let mut state = bus.state();
        drop(in_tx);

        state.wait_for(|s| *s == BusState::Closed).await.unwrap();
        let (l, _) = recorder();
        assert!(matches!(
            bus.subscribe(&"1".into(), l),
            Err(BusError::Closed)
        ));
        assert!(bus.registry().is_empty());
    }

    #[tokio::test]
    async fn close_stops_the_bus() {
        let (bus, _in_tx, _out_rx) = loopback();
        tokio::time::timeout(Duration::from_secs(2), bus.close())
            .await
            .expect("close completes");
        assert!(bus.is_closed());
        assert_eq!(*bus.state().borrow(), BusState::Closed);
    }

    #[tokio::test]
    async fn reconnect_resends_registrations() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<(usize, String)>();

        let server = tokio::spawn(async move {
            for conn in 0..2usize {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                while let Some(Ok(msg)) = ws.next().await {
                    if let tungstenite::Message::Text(t) = msg {
                        frames_tx.send((conn, t.to_string())).unwrap();
                        break;
                    }
                }
                if conn == 0 {
                    let _ = ws.close(None).await;
                } else {
                    ws.send(tungstenite::Message::Text(
                        r#"{"m":5,"t":"Compressing to bz2","p":0.5}"#.into(),
                    ))
                    .await
                    .unwrap();
                    while ws.next().await.is_some() {}
                }
            }
        });

        let config = BusConfig {
            cookie: Some("session=abc".into()),
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                backoff_factor: 2.0,
            },
            ..BusConfig::new(Url::parse(&format!("ws://{addr}/progress")).unwrap())
        };
        let bus = ProgressBus::connect(config).await.unwrap();
        let (l, seen) = recorder();
        let _sub = bus.subscribe(&UploadId::Number(5), l).unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
            .await
            .unwrap();
        assert_eq!(first, Some((0, r#"{"m":5}"#.to_string())));

        let second = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
            .await
            .unwrap();
        assert_eq!(second, Some((1, r#"{"m":5}"#.to_string())));

        wait_until(|| seen.lock().unwrap().len() == 1).await;
        assert_eq!(seen.lock().unwrap()[0].0, "Compressing to bz2");

        bus.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn same_target_registers_once_per_socket() {
        let (bus, _in_tx, mut out_rx) = loopback();
        let (a, _) = recorder();
        let (b, _) = recorder();
        let _a = bus.subscribe(&"42".into(), a).unwrap();
        let _b = bus.subscribe(&UploadId::Number(42), b).unwrap();
        let (c, _) = recorder();
        let _c = bus.subscribe(&"43".into(), c).unwrap();

        let mut frames = Vec::new();
        for _ in 0..2 {
            match tokio::time::timeout(Duration::from_secs(2), out_rx.recv()).await {
                Ok(Some(tungstenite::Message::Text(t))) => frames.push(t.as_str().to_string()),
                other => panic!("unexpected frame: {other:?}"),
            }
        }
        assert_eq!(frames, vec![r#"{"m":"42"}"#, r#"{"m":"43"}"#]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(out_rx.try_recv().is_err());
        assert_eq!(bus.registry().listener_count("42"), 2);
    }

    #[tokio::test]
    async fn subscribe_while_reconnecting_registers_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames_tx, mut frames_rx) = mpsc::unbounded_channel::<Vec<String>>();

        let server = tokio::spawn(async move {
            // First socket is dropped straight away.
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let _ = ws.close(None).await;
            drop(ws);

            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let mut texts = Vec::new();
            while let Ok(Some(Ok(msg))) =
                tokio::time::timeout(Duration::from_millis(300), ws.next()).await
            {
                if let tungstenite::Message::Text(t) = msg {
                    texts.push(t.to_string());
                }
            }
            frames_tx.send(texts).unwrap();
            while ws.next().await.is_some() {}
        });

        let config = BusConfig {
            reconnect: ReconnectConfig {
                initial_delay: Duration::from_millis(200),
                max_delay: Duration::from_millis(400),
                backoff_factor: 2.0,
            },
            ..BusConfig::new(Url::parse(&format!("ws://{addr}/progress")).unwrap())
        };
        let bus = ProgressBus::connect(config).await.unwrap();

        let mut state = bus.state();
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|s| matches!(s, BusState::Reconnecting { .. })),
        )
        .await
        .expect("socket dropped")
        .unwrap();

        let (l, _) = recorder();
        let _sub = bus.subscribe(&"42".into(), l).unwrap();

        let frames = tokio::time::timeout(Duration::from_secs(5), frames_rx.recv())
            .await
            .expect("second socket")
            .expect("server alive");
        assert_eq!(frames, vec![r#"{"m":"42"}"#.to_string()]);

        bus.close().await;
        server.abort();
    }

    #[tokio::test]
    async fn connect_fails_without_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = BusConfig::new(Url::parse(&format!("ws://{addr}/progress")).unwrap());
        assert!(matches!(
            ProgressBus::connect(config).await,
            Err(BusError::Ws(_))
        ));
    }

    #[test]
    fn bus_error_display() {
        assert_eq!(BusError::Closed.to_string(), "connection closed");
        assert_eq!(
            BusError::InvalidCookie.to_string(),
            "cookie is not a valid header value"
        );
    }
}
