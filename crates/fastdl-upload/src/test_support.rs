//! Fixtures shared by the session tests: a loopback progress bus, a mock
//! upload endpoint and a view that records what it was asked to show.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{sink, stream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use url::Url;

use fastdl_progress_bus::ProgressBus;
use fastdl_transfer::{CandidateFile, TransferChannel};

use crate::session::SessionDeps;
use crate::view::{Card, SessionView};

pub(crate) type Frame = Result<Message, WsError>;

/// Bus over in-memory channels: push frames into the sender to deliver
/// them, read what the bus wrote from the receiver.
pub(crate) fn loopback_bus() -> (
    Arc<ProgressBus>,
    mpsc::UnboundedSender<Frame>,
    mpsc::UnboundedReceiver<Message>,
) {
    let (in_tx, in_rx) = mpsc::unbounded_channel::<Frame>();
    let (out_tx, out_rx) = mpsc::unbounded_channel();

    let read = Box::pin(stream::unfold(in_rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    }));
    let write = Box::pin(sink::unfold(out_tx, |tx, msg: Message| async move {
        let _ = tx.send(msg);
        Ok::<_, WsError>(tx)
    }));

    (Arc::new(ProgressBus::with_transport(read, write)), in_tx, out_rx)
}

pub(crate) fn push(in_tx: &mpsc::UnboundedSender<Frame>, text: &str) {
    in_tx.send(Ok(Message::Text(text.into()))).unwrap();
}

/// Text frames written by the bus so far.
pub(crate) fn written(out_rx: &mut mpsc::UnboundedReceiver<Message>) -> Vec<String> {
    let mut frames = Vec::new();
    while let Ok(msg) = out_rx.try_recv() {
        if let Message::Text(t) = msg {
            frames.push(t.as_str().to_string());
        }
    }
    frames
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ViewCall {
    Render(Card),
    Remove,
}

/// View that logs every call.
#[derive(Clone, Default)]
pub(crate) struct RecordingView {
    calls: Arc<Mutex<Vec<ViewCall>>>,
}

impl RecordingView {
    pub(crate) fn calls(&self) -> Vec<ViewCall> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn renders(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, ViewCall::Render(_)))
            .count()
    }

    pub(crate) fn last_card(&self) -> Option<Card> {
        self.calls().into_iter().rev().find_map(|c| match c {
            ViewCall::Render(card) => Some(card),
            ViewCall::Remove => None,
        })
    }

    pub(crate) fn removed(&self) -> bool {
        self.calls().contains(&ViewCall::Remove)
    }
}

impl SessionView for RecordingView {
    fn render(&mut self, card: &Card) {
        self.calls.lock().unwrap().push(ViewCall::Render(card.clone()));
    }

    fn remove(&mut self) {
        self.calls.lock().unwrap().push(ViewCall::Remove);
    }
}

/// Reads one request with a `Content-Length` body. `false` if the peer
/// went away first.
async fn read_request(stream: &mut TcpStream) -> bool {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];
    loop {
        let n = stream.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return false;
        }
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let len = head
            .lines()
            .find_map(|l| l.strip_prefix("content-length:"))
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + len {
            return true;
        }
    }
}

/// Upload endpoint answering every request with `body` and counting the
/// requests it served.
pub(crate) async fn mock_endpoint(body: &'static str) -> (Url, Arc<Mutex<usize>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let hits = Arc::new(Mutex::new(0));
    let counter = hits.clone();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let counter = counter.clone();
            tokio::spawn(async move {
                if !read_request(&mut stream).await {
                    return;
                }
                *counter.lock().unwrap() += 1;
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(response.as_bytes()).await;
            });
        }
    });

    (
        Url::parse(&format!("http://127.0.0.1:{port}/upload")).unwrap(),
        hits,
    )
}

/// Endpoint that accepts connections but never reads or answers.
pub(crate) async fn stalled_endpoint() -> Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    Url::parse(&format!("http://127.0.0.1:{port}/upload")).unwrap()
}

pub(crate) fn deps(endpoint: Url, bus: Option<Arc<ProgressBus>>) -> SessionDeps {
    SessionDeps {
        transfer: TransferChannel::new(reqwest::Client::new(), endpoint),
        bus,
        csrf_token: "abc".to_string(),
        tracking_idle: None,
    }
}

/// Writes a map-shaped file of `size` bytes.
pub(crate) async fn map_file(dir: &tempfile::TempDir, name: &str, size: usize) -> CandidateFile {
    let mut data = b"VBSP".to_vec();
    data.resize(size.max(4), 0x11);
    let path = dir.path().join(name);
    std::fs::write(&path, &data).unwrap();
    CandidateFile::inspect(&path).await
}

pub(crate) async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
