//! Synchronous upload state machine.
//!
//! Every transition method returns `true` if anything observable changed,
//! which is the driver's cue to re-render. Transitions that are not valid in
//! the current state are ignored and return `false`.

use std::time::Duration;

use fastdl_protocol::UploadId;
use fastdl_transfer::{ByteProgress, SpeedCalculator};

use crate::state::SessionState;

/// Last-seen ratio of one server-side processing phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseProgress {
    pub name: String,
    pub ratio: f64,
}

pub struct SessionMachine {
    name: String,
    state: SessionState,
    upload_id: Option<UploadId>,
    bytes: ByteProgress,
    speed: SpeedCalculator,
    /// First-seen order.
    phases: Vec<PhaseProgress>,
}

impl SessionMachine {
    /// A freshly submitted file, in `Validating`.
    pub fn new(name: impl Into<String>, total: Option<u64>) -> Self {
        Self {
            name: name.into(),
            state: SessionState::Validating,
            upload_id: None,
            bytes: ByteProgress::new(0, total),
            speed: SpeedCalculator::default(),
            phases: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Server-assigned identifier, set once the transfer succeeds.
    pub fn upload_id(&self) -> Option<&UploadId> {
        self.upload_id.as_ref()
    }

    pub fn bytes(&self) -> ByteProgress {
        self.bytes
    }

    pub fn phases(&self) -> &[PhaseProgress] {
        &self.phases
    }

    /// Current upload rate, while bytes are moving.
    pub fn bytes_per_second(&self) -> Option<f64> {
        let rate = self.speed.bytes_per_second();
        (self.state == SessionState::Transferring && rate > 0.0).then_some(rate)
    }

    /// Time left at the current rate. Needs a known length.
    pub fn eta(&self) -> Option<Duration> {
        if self.state != SessionState::Transferring {
            return None;
        }
        self.speed.eta(self.bytes.remaining()?)
    }

    /// Validation passed.
    pub fn accept(&mut self) -> bool {
        self.transition_from(&[SessionState::Validating], SessionState::Transferring)
    }

    /// Validation failed; no transfer will happen.
    pub fn reject(&mut self, reason: impl Into<String>) -> bool {
        self.transition_from(
            &[SessionState::Validating],
            SessionState::Failed {
                reason: reason.into(),
            },
        )
    }

    /// Byte progress from the transfer. Moves to `AwaitingIdentifier` once a
    /// known-length body is fully sent. Progress never goes backwards.
    pub fn on_bytes_sent(&mut self, sent: u64, total: Option<u64>) -> bool {
        if !matches!(
            self.state,
            SessionState::Transferring | SessionState::AwaitingIdentifier
        ) || sent < self.bytes.sent
        {
            return false;
        }

        let delta = sent - self.bytes.sent;
        let mut changed = delta > 0 || total != self.bytes.total;
        self.bytes = ByteProgress::new(sent, total);
        if delta > 0 {
            self.speed.add_sample(delta);
        }

        if self.state == SessionState::Transferring && self.bytes.is_complete() {
            self.state = SessionState::AwaitingIdentifier;
            self.speed.reset();
            changed = true;
        }
        changed
    }

    /// The server accepted the upload. With an identifier the session starts
    /// tracking; without one it is done.
    pub fn transfer_succeeded(&mut self, upload_id: Option<UploadId>) -> bool {
        if !self.is_transferring() {
            return false;
        }
        if let Some(total) = self.bytes.total {
            self.bytes.sent = total;
        }
        self.state = if upload_id.is_some() {
            SessionState::Tracking
        } else {
            SessionState::Succeeded
        };
        self.upload_id = upload_id;
        true
    }

    pub fn transfer_failed(&mut self, reason: impl Into<String>) -> bool {
        if !self.is_transferring() {
            return false;
        }
        self.state = SessionState::Failed {
            reason: reason.into(),
        };
        true
    }

    /// Progress tracking could not start; the upload still succeeded.
    pub fn tracking_unavailable(&mut self) -> bool {
        self.transition_from(&[SessionState::Tracking], SessionState::Succeeded)
    }

    /// A server-side progress update for this upload. Unknown phases are
    /// appended; known ones keep their position and take the new ratio.
    pub fn on_phase_progress(&mut self, phase: &str, ratio: f64) -> bool {
        if self.state != SessionState::Tracking || !ratio.is_finite() {
            return false;
        }
        let ratio = ratio.clamp(0.0, 1.0);

        match self.phases.iter_mut().find(|p| p.name == phase) {
            Some(existing) if existing.ratio == ratio => false,
            Some(existing) => {
                existing.ratio = ratio;
                true
            }
            None => {
                self.phases.push(PhaseProgress {
                    name: phase.to_string(),
                    ratio,
                });
                true
            }
        }
    }

    /// User cancel. Does nothing once the session is terminal.
    pub fn cancel(&mut self) -> bool {
        if !self.state.is_cancellable() {
            return false;
        }
        self.state = SessionState::Cancelled;
        true
    }

    /// User closed the card. Accepted from terminal states and `Tracking`.
    pub fn dismiss(&mut self) -> bool {
        if !self.state.is_dismissable() {
            return false;
        }
        self.state = SessionState::Dismissed;
        true
    }

    fn is_transferring(&self) -> bool {
        matches!(
            self.state,
            SessionState::Transferring | SessionState::AwaitingIdentifier
        )
    }

    fn transition_from(&mut self, from: &[SessionState], to: SessionState) -> bool {
        if !from.contains(&self.state) {
            return false;
        }
        self.state = to;
        true
    }
}
