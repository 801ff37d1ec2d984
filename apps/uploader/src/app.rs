//! Wires the page-wide pieces together and runs one session per file.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio_util::sync::CancellationToken;

use fastdl_progress_bus::{BusConfig, ProgressBus};
use fastdl_protocol::progress_url;
use fastdl_transfer::{CandidateFile, TransferChannel};
use fastdl_upload::{SessionDeps, SessionState, UploadOutcome, UploadSession};

use crate::config::Settings;
use crate::csrf;
use crate::terminal::TerminalView;

/// Tally of how the uploads ended.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl Summary {
    fn record(&mut self, outcome: &UploadOutcome) {
        match outcome {
            UploadOutcome::Succeeded { .. } => self.succeeded += 1,
            UploadOutcome::Failed(_) => self.failed += 1,
            UploadOutcome::Cancelled => self.cancelled += 1,
        }
    }
}

/// Uploads every file concurrently and waits until all cards are closed.
pub async fn run(settings: Settings, files: Vec<PathBuf>) -> anyhow::Result<Summary> {
    let http = reqwest::Client::builder()
        .user_agent(concat!("fastdl-upload/", env!("CARGO_PKG_VERSION")))
        .build()?;

    let csrf_token = match settings.csrf_token.clone() {
        Some(token) => token,
        None => csrf::fetch_csrf_token(&http, &settings.url, settings.cookie.as_deref()).await?,
    };

    let bus = if settings.track_progress {
        connect_bus(&settings).await
    } else {
        tracing::info!("progress tracking disabled");
        None
    };

    let mut transfer = TransferChannel::new(http, settings.url.clone());
    if let Some(cookie) = &settings.cookie {
        transfer = transfer.with_cookie(cookie.clone());
    }
    let deps = SessionDeps {
        transfer,
        bus: bus.clone(),
        csrf_token,
        tracking_idle: Some(settings.linger),
    };

    let shutdown = CancellationToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("SIGINT received, cancelling uploads");
                shutdown.cancel();
            }
        });
    }

    let mut sessions = Vec::with_capacity(files.len());
    for path in files {
        let file = CandidateFile::inspect(path).await;
        let session = UploadSession::spawn(deps.clone(), file, Box::new(TerminalView::stdout()));
        sessions.push(close_when_settled(session, shutdown.clone()));
    }

    let mut summary = Summary::default();
    for outcome in join_all(sessions).await {
        summary.record(&outcome);
    }

    if let Some(bus) = bus {
        bus.close().await;
    }
    Ok(summary)
}

/// Opens the progress socket. Uploads still work without it, just without
/// server-side progress.
async fn connect_bus(settings: &Settings) -> Option<Arc<ProgressBus>> {
    let url = match progress_url(&settings.url) {
        Ok(url) => url,
        Err(e) => {
            tracing::warn!("cannot derive progress URL: {e}");
            return None;
        }
    };

    let mut config = BusConfig::new(url);
    config.cookie = settings.cookie.clone();
    match ProgressBus::connect(config).await {
        Ok(bus) => Some(Arc::new(bus)),
        Err(e) => {
            tracing::warn!("progress channel unavailable, uploads will not be tracked: {e}");
            None
        }
    }
}

/// Dismisses a session's card once it reaches a terminal state. Tracking
/// cards close themselves after the linger period. On shutdown live uploads
/// are cancelled and tracking cards dismissed.
async fn close_when_settled(session: UploadSession, shutdown: CancellationToken) -> UploadOutcome {
    let settled = tokio::select! {
        state = session.settled() => Some(state),
        _ = shutdown.cancelled() => None,
    };

    match settled {
        Some(SessionState::Tracking) => {
            let mut state = session.state();
            tokio::select! {
                _ = state.wait_for(|s| s.is_terminal() || *s == SessionState::Dismissed) => {}
                _ = shutdown.cancelled() => {}
            }
        }
        Some(_) => {}
        None if session.current_state() != SessionState::Tracking => session.cancel(),
        None => {}
    }

    session.dismiss();
    session.finished().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use fastdl_transfer::TransferError;
    use fastdl_upload::UploadError;
    use tokio::net::TcpListener;
    use url::Url;

    fn deps(url: Url) -> SessionDeps {
        SessionDeps {
            transfer: TransferChannel::new(reqwest::Client::new(), url),
            bus: None,
            csrf_token: "abc".into(),
            tracking_idle: Some(Duration::from_secs(1)),
        }
    }

    async fn spawn(dir: &tempfile::TempDir, name: &str, body: &[u8], url: Url) -> UploadSession {
        let path = dir.path().join(name);
        std::fs::write(&path, body).unwrap();
        let file = CandidateFile::inspect(path).await;
        UploadSession::spawn(deps(url), file, Box::new(TerminalView::new(Vec::new())))
    }

    #[tokio::test]
    async fn settled_failure_is_closed() {
        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse("http://127.0.0.1:9/upload").unwrap();
        let session = spawn(&dir, "readme.txt", b"not a map", url).await;

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            close_when_settled(session, CancellationToken::new()),
        )
        .await
        .expect("card closed");
        assert!(matches!(outcome, UploadOutcome::Failed(UploadError::Validation(_))));
    }

    #[tokio::test]
    async fn shutdown_cancels_live_upload() {
        // Accepts the connection and never answers.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((tcp, _)) = listener.accept().await {
                held.push(tcp);
            }
        });

        let dir = tempfile::tempdir().unwrap();
        let url = Url::parse(&format!("http://127.0.0.1:{port}/upload")).unwrap();
        let session = spawn(&dir, "de_dust2.bsp", b"VBSP\x14\0\0\0", url).await;
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let outcome = tokio::time::timeout(
            Duration::from_secs(10),
            close_when_settled(session, shutdown),
        )
        .await
        .expect("card closed");
        assert!(matches!(outcome, UploadOutcome::Cancelled));
        server.abort();
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut summary = Summary::default();
        summary.record(&UploadOutcome::Succeeded { id: None });
        summary.record(&UploadOutcome::Succeeded {
            id: Some("42".into()),
        });
        summary.record(&UploadOutcome::Failed(UploadError::Transfer(TransferError::Status(
            500,
        ))));
        summary.record(&UploadOutcome::Cancelled);

        assert_eq!(
            summary,
            Summary {
                succeeded: 2,
                failed: 1,
                cancelled: 1
            }
        );
    }
}
