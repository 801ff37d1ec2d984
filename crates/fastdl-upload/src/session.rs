//! Async driver: one tokio task per upload.
//!
//! The task owns the [`SessionMachine`] and the view. It selects over user
//! commands, transfer events and progress updates, feeds each into the
//! machine, and renders only when the machine reports a change.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fastdl_progress_bus::{BusError, Listener, ProgressBus};
use fastdl_protocol::{ProgressUpdate, UploadId};
use fastdl_transfer::{CandidateFile, TransferChannel, TransferError, TransferEvent, validate_map};

use crate::error::UploadError;
use crate::machine::SessionMachine;
use crate::state::{SessionId, SessionState, UploadOutcome};
use crate::view::{Card, SessionView};

/// Process-wide collaborators every session uses.
#[derive(Clone)]
pub struct SessionDeps {
    pub transfer: TransferChannel,
    /// `None` disables server-side progress tracking.
    pub bus: Option<Arc<ProgressBus>>,
    pub csrf_token: String,
    /// Dismiss a tracking card after this long without progress updates.
    pub tracking_idle: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Cancel,
    Dismiss,
}

/// Controller of one running upload.
///
/// Dropping it cancels the upload (if still live) and dismisses the card.
pub struct UploadSession {
    id: SessionId,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<UploadOutcome>,
}

impl UploadSession {
    /// Starts the lifecycle of `file`, rendering into `view`.
    pub fn spawn(deps: SessionDeps, file: CandidateFile, view: Box<dyn SessionView>) -> Self {
        let id = SessionId::next();
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let machine = SessionMachine::new(file.name(), file.len());
        let (state_tx, state) = watch::channel(machine.state().clone());

        let driver = Driver {
            id,
            deps,
            file,
            machine,
            view,
            commands: commands_rx,
            detached: false,
            state_tx,
        };
        let task = tokio::spawn(driver.run());

        Self {
            id,
            commands,
            state,
            task,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Requests cancellation. Ignored once the session is terminal.
    pub fn cancel(&self) {
        let _ = self.commands.send(Command::Cancel);
    }

    /// Requests dismissal. Honoured in terminal states and while tracking.
    pub fn dismiss(&self) {
        let _ = self.commands.send(Command::Dismiss);
    }

    /// Watch channel of the lifecycle state.
    pub fn state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    pub fn current_state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Waits until the session is terminal, tracking, or gone.
    pub async fn settled(&self) -> SessionState {
        let mut state = self.state.clone();
        let settled = state
            .wait_for(|s| {
                s.is_terminal() || matches!(s, SessionState::Tracking | SessionState::Dismissed)
            })
            .await
            .map(|s| s.clone());
        settled.unwrap_or(SessionState::Dismissed)
    }

    /// Waits for the card to be dismissed and returns how the upload ended.
    pub async fn finished(self) -> UploadOutcome {
        let Self { commands, task, .. } = self;
        let outcome = task.await;
        drop(commands);
        match outcome {
            Ok(outcome) => outcome,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => UploadOutcome::Cancelled,
        }
    }
}

struct Driver {
    id: SessionId,
    deps: SessionDeps,
    file: CandidateFile,
    machine: SessionMachine,
    view: Box<dyn SessionView>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// The controller was dropped; no more commands will arrive.
    detached: bool,
    state_tx: watch::Sender<SessionState>,
}

impl Driver {
    async fn run(mut self) -> UploadOutcome {
        debug!(session = %self.id, file = %self.file.name(), "upload session started");
        self.render();

        let outcome = self.drive().await;
        self.await_dismissal().await;
        self.view.remove();

        info!(
            session = %self.id,
            file = %self.file.name(),
            success = outcome.is_success(),
            "upload session closed"
        );
        outcome
    }

    async fn drive(&mut self) -> UploadOutcome {
        if let Err(outcome) = self.validate().await {
            return outcome;
        }
        match self.transfer().await {
            Ok(Some(id)) => self.track(id).await,
            Ok(None) => UploadOutcome::Succeeded { id: None },
            Err(outcome) => outcome,
        }
    }

    fn render(&mut self) {
        let card = Card::project(&self.machine);
        self.view.render(&card);
        self.state_tx.send_replace(self.machine.state().clone());
    }

    /// Next user command. A dropped controller reads as a cancel.
    async fn next_command(&mut self) -> Command {
        match self.commands.recv().await {
            Some(cmd) => cmd,
            None => {
                self.detached = true;
                Command::Cancel
            }
        }
    }

    /// Applies a command during validation or transfer. Returns `true` if
    /// the session was cancelled.
    fn apply_early(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Cancel if self.machine.cancel() => {
                info!(session = %self.id, file = %self.file.name(), "upload cancelled");
                self.render();
                true
            }
            Command::Cancel => false,
            Command::Dismiss => {
                debug!(session = %self.id, state = %self.machine.state(), "dismiss ignored");
                false
            }
        }
    }

    async fn validate(&mut self) -> Result<(), UploadOutcome> {
        let file = self.file.clone();
        let check = validate_map(&file);
        tokio::pin!(check);

        loop {
            tokio::select! {
                biased;

                cmd = self.next_command(), if !self.detached => {
                    if self.apply_early(cmd) {
                        return Err(UploadOutcome::Cancelled);
                    }
                }

                result = &mut check => {
                    return match result {
                        Ok(()) => {
                            self.machine.accept();
                            self.render();
                            Ok(())
                        }
                        Err(e) => {
                            info!(session = %self.id, file = %file.name(), "map rejected");
                            self.machine.reject(e.to_string());
                            self.render();
                            Err(UploadOutcome::Failed(e.into()))
                        }
                    };
                }
            }
        }
    }

    /// Runs the upload request. `Ok` carries the identifier to track, if any.
    async fn transfer(&mut self) -> Result<Option<UploadId>, UploadOutcome> {
        let (handle, mut events) = self.deps.transfer.start(&self.file, &self.deps.csrf_token);

        loop {
            tokio::select! {
                biased;

                cmd = self.next_command(), if !self.detached => {
                    if cmd == Command::Cancel && !handle.cancel() {
                        debug!(session = %self.id, "cancel lost the race with the server's answer");
                        continue;
                    }
                    if self.apply_early(cmd) {
                        return Err(UploadOutcome::Cancelled);
                    }
                }

                event = events.recv() => match event {
                    Some(TransferEvent::Progress { sent, total }) => {
                        if self.machine.on_bytes_sent(sent, total) {
                            self.render();
                        }
                    }
                    Some(TransferEvent::Finished(Ok(resp))) => {
                        let id = resp.upload_id().cloned();
                        debug!(session = %self.id, id = ?id, name = ?resp.name, "transfer finished");
                        self.machine.transfer_succeeded(id.clone());
                        self.render();
                        return Ok(id);
                    }
                    Some(TransferEvent::Finished(Err(e))) => {
                        self.machine.transfer_failed(e.reason());
                        self.render();
                        return Err(UploadOutcome::Failed(e.into()));
                    }
                    None => {
                        let e = TransferError::Io(std::io::Error::other(
                            "upload task ended without a result",
                        ));
                        self.machine.transfer_failed(e.reason());
                        self.render();
                        return Err(UploadOutcome::Failed(e.into()));
                    }
                },
            }
        }
    }

    /// Follows server-side processing of `id` until cancel or dismissal.
    async fn track(&mut self, id: UploadId) -> UploadOutcome {
        let (tx, mut updates) = mpsc::unbounded_channel::<ProgressUpdate>();
        let listener: Listener = Arc::new(move |update: &ProgressUpdate| {
            let _ = tx.send(update.clone());
        });

        let bus = self.deps.bus.clone();
        let subscribed = match &bus {
            Some(bus) => bus.subscribe(&id, listener).map_err(UploadError::from),
            None => Err(UploadError::ProgressChannel(BusError::Closed)),
        };
        let mut subscription = match subscribed {
            Ok(subscription) => subscription,
            Err(e) => {
                if bus.is_some() {
                    warn!(session = %self.id, upload = %id, "progress tracking unavailable: {e}");
                } else {
                    debug!(session = %self.id, upload = %id, "progress tracking disabled");
                }
                self.machine.tracking_unavailable();
                self.render();
                return UploadOutcome::Succeeded { id: Some(id) };
            }
        };
        info!(session = %self.id, upload = %id, "tracking server-side progress");

        let idle = self.deps.tracking_idle;
        let timer = tokio::time::sleep(idle.unwrap_or(Duration::MAX));
        tokio::pin!(timer);

        let outcome = loop {
            tokio::select! {
                biased;

                cmd = self.next_command(), if !self.detached => match cmd {
                    Command::Cancel => {
                        subscription.unsubscribe();
                        if self.machine.cancel() {
                            info!(session = %self.id, upload = %id, "tracking cancelled");
                            self.render();
                            break UploadOutcome::Cancelled;
                        }
                    }
                    Command::Dismiss => {
                        subscription.unsubscribe();
                        if self.machine.dismiss() {
                            break UploadOutcome::Succeeded { id: Some(id.clone()) };
                        }
                    }
                },

                Some(update) = updates.recv() => {
                    if let Some(idle) = idle {
                        timer.as_mut().reset(Instant::now() + idle);
                    }
                    if self.machine.on_phase_progress(&update.phase, update.ratio) {
                        self.render();
                    }
                }

                () = &mut timer, if idle.is_some() => {
                    debug!(session = %self.id, upload = %id, "no progress for {idle:?}, closing card");
                    subscription.unsubscribe();
                    self.machine.dismiss();
                    break UploadOutcome::Succeeded { id: Some(id.clone()) };
                }
            }
        };

        subscription.unsubscribe();
        outcome
    }

    /// Holds a settled card until the user (or a dropped controller)
    /// dismisses it. Cancels arriving here change nothing.
    async fn await_dismissal(&mut self) {
        while *self.machine.state() != SessionState::Dismissed {
            let cmd = if self.detached {
                Command::Dismiss
            } else {
                self.next_command().await
            };
            if cmd == Command::Dismiss || self.detached {
                self.machine.dismiss();
            } else {
                debug!(session = %self.id, state = %self.machine.state(), "cancel ignored");
            }
        }
        self.state_tx.send_replace(SessionState::Dismissed);
    }
}
