//! The upload request: one multipart `POST` streamed from disk.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use futures_util::TryStreamExt;
use reqwest::header::{ACCEPT, COOKIE};
use reqwest::multipart::{Form, Part};
use reqwest::{Body, StatusCode};
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use fastdl_protocol::UploadResponse;
use fastdl_protocol::constants::{
    ACCEPT_JSON, FIELD_CSRF_TOKEN, FIELD_MAP, SERVER_FAILURE_REASON,
};

use crate::{CandidateFile, TransferError, UPLOAD_CHUNK_SIZE};

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const CANCELLED: u8 = 2;

/// Something that happened to an in-flight transfer.
#[derive(Debug)]
pub enum TransferEvent {
    /// A body chunk was handed to the transport. `sent` never decreases;
    /// `total` is `None` when the file length was unknown.
    Progress { sent: u64, total: Option<u64> },
    /// The server answered, or the request failed. Sent at most once and
    /// never after a successful [`TransferHandle::cancel`].
    Finished(Result<UploadResponse, TransferError>),
}

/// Sends maps to one upload endpoint.
///
/// Cheap to clone; clones share the underlying connection pool.
#[derive(Debug, Clone)]
pub struct TransferChannel {
    http: reqwest::Client,
    endpoint: Url,
    cookie: Option<String>,
}

impl TransferChannel {
    pub fn new(http: reqwest::Client, endpoint: Url) -> Self {
        Self {
            http,
            endpoint,
            cookie: None,
        }
    }

    /// Sends `cookie` verbatim as the `Cookie` header of every upload.
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookie = Some(cookie.into());
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Starts uploading `file` in a background task.
    ///
    /// Events arrive on the returned receiver. Must be called from within a
    /// tokio runtime.
    pub fn start(
        &self,
        file: &CandidateFile,
        csrf_token: &str,
    ) -> (TransferHandle, mpsc::UnboundedReceiver<TransferEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let phase = Arc::new(AtomicU8::new(RUNNING));
        let cancel = CancellationToken::new();

        let request = Request {
            channel: self.clone(),
            file: file.clone(),
            csrf_token: csrf_token.to_string(),
        };
        let task_phase = phase.clone();
        let task_cancel = cancel.clone();

        tokio::spawn(async move {
            let name = request.file.name().to_string();
            let outcome = tokio::select! {
                _ = task_cancel.cancelled() => {
                    debug!(file = %name, "upload aborted");
                    return;
                }
                outcome = request.send(tx.clone()) => outcome,
            };

            if task_phase
                .compare_exchange(RUNNING, FINISHED, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                match &outcome {
                    Ok(_) => info!(file = %name, "upload accepted by server"),
                    Err(e) => warn!(file = %name, "upload failed: {e}"),
                }
                let _ = tx.send(TransferEvent::Finished(outcome));
            } else {
                debug!(file = %name, "discarding result of cancelled upload");
            }
        });

        (TransferHandle { phase, cancel }, rx)
    }
}

struct Request {
    channel: TransferChannel,
    file: CandidateFile,
    csrf_token: String,
}

impl Request {
    async fn send(
        self,
        events: mpsc::UnboundedSender<TransferEvent>,
    ) -> Result<UploadResponse, TransferError> {
        let handle = tokio::fs::File::open(self.file.path()).await?;
        let total = self.file.len();
        info!(
            file = %self.file.name(),
            size = ?total,
            url = %self.channel.endpoint,
            "starting upload"
        );

        let mut sent = 0u64;
        let chunks = ReaderStream::with_capacity(handle, UPLOAD_CHUNK_SIZE).inspect_ok(
            move |chunk| {
                sent += chunk.len() as u64;
                let _ = events.send(TransferEvent::Progress { sent, total });
            },
        );
        let body = Body::wrap_stream(chunks);

        let part = match total {
            Some(len) => Part::stream_with_length(body, len),
            None => Part::stream(body),
        }
        .file_name(self.file.name().to_string())
        .mime_str("application/octet-stream")?;

        let form = Form::new()
            .part(FIELD_MAP, part)
            .text(FIELD_CSRF_TOKEN, self.csrf_token);

        let mut req = self
            .channel
            .http
            .post(self.channel.endpoint.clone())
            .header(ACCEPT, ACCEPT_JSON)
            .multipart(form);
        if let Some(cookie) = &self.channel.cookie {
            req = req.header(COOKIE, cookie);
        }

        let resp = req.send().await?;
        let status = resp.status();
        let body = resp.bytes().await?;
        debug!(status = status.as_u16(), len = body.len(), "upload response received");
        parse_response(status, &body)
    }
}

/// Interprets the upload endpoint's answer.
fn parse_response(status: StatusCode, body: &[u8]) -> Result<UploadResponse, TransferError> {
    match serde_json::from_slice::<UploadResponse>(body) {
        Ok(resp) if resp.success => Ok(resp),
        Ok(resp) => Err(TransferError::Server(
            resp.error_message()
                .unwrap_or(SERVER_FAILURE_REASON)
                .to_string(),
        )),
        Err(_) if !status.is_success() => Err(TransferError::Status(status.as_u16())),
        Err(e) => Err(TransferError::InvalidResponse(e)),
    }
}

/// Controls one in-flight transfer. Dropping the handle aborts it.
#[derive(Debug)]
pub struct TransferHandle {
    phase: Arc<AtomicU8>,
    cancel: CancellationToken,
}

impl TransferHandle {
    /// Aborts the request.
    ///
    /// Returns `true` only if this call stopped a running transfer; once the
    /// result has been delivered, or after an earlier cancel, it does nothing.
    pub fn cancel(&self) -> bool {
        let won = self
            .phase
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.cancel.cancel();
        }
        won
    }

    pub fn is_finished(&self) -> bool {
        self.phase.load(Ordering::Acquire) == FINISHED
    }

    pub fn is_cancelled(&self) -> bool {
        self.phase.load(Ordering::Acquire) == CANCELLED
    }
}

impl Drop for TransferHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
