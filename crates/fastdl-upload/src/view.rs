//! What a session looks like on screen.
//!
//! A [`Card`] is computed from the [`SessionMachine`] on every change and
//! handed to the session's [`SessionView`]. Views keep no state of their own
//! about the upload.

use std::fmt;
use std::time::Duration;

use crate::machine::SessionMachine;
use crate::state::SessionState;

/// Rendering target for one upload.
pub trait SessionView: Send {
    /// Shows `card`, replacing whatever was shown before.
    fn render(&mut self, card: &Card);

    /// Removes the card for good. Called exactly once, after dismissal.
    fn remove(&mut self);
}

/// Byte-level progress display.
#[derive(Debug, Clone, PartialEq)]
pub enum ByteIndicator {
    Percent { ratio: f64, label: String },
    /// Length unknown: busy indicator without a value.
    Indeterminate,
    Hidden,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PhaseRow {
    pub name: String,
    pub ratio: f64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Neutral,
    Success,
    Danger,
    /// Cancelled by the user; neither success nor failure.
    Muted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Cancel,
    Dismiss,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Card {
    pub title: String,
    pub state: SessionState,
    pub bytes: ByteIndicator,
    /// Human-readable upload rate, while bytes are moving.
    pub rate: Option<String>,
    /// Estimated time left, when both the rate and the length are known.
    pub eta: Option<String>,
    pub phases: Vec<PhaseRow>,
    pub message: Option<String>,
    pub tone: Tone,
    pub control: Control,
}

impl Card {
    pub fn project(machine: &SessionMachine) -> Self {
        let state = machine.state().clone();
        let bytes = match state {
            SessionState::Transferring | SessionState::AwaitingIdentifier => {
                let progress = machine.bytes();
                match (progress.ratio(), progress.percent_label()) {
                    (Some(ratio), Some(label)) => ByteIndicator::Percent { ratio, label },
                    _ => ByteIndicator::Indeterminate,
                }
            }
            _ => ByteIndicator::Hidden,
        };

        let message = match &state {
            SessionState::Validating => Some("Checking file...".to_string()),
            SessionState::Transferring => None,
            SessionState::AwaitingIdentifier => Some("Waiting for the server...".to_string()),
            SessionState::Tracking => Some("Processing on the server...".to_string()),
            SessionState::Succeeded => Some("Upload complete.".to_string()),
            SessionState::Failed { reason } => Some(reason.clone()),
            SessionState::Cancelled => Some("Upload cancelled.".to_string()),
            SessionState::Dismissed => None,
        };

        let tone = match state {
            SessionState::Succeeded => Tone::Success,
            SessionState::Failed { .. } => Tone::Danger,
            SessionState::Cancelled | SessionState::Dismissed => Tone::Muted,
            _ => Tone::Neutral,
        };

        let control = if state.is_cancellable() {
            Control::Cancel
        } else {
            Control::Dismiss
        };

        Self {
            title: machine.name().to_string(),
            bytes,
            rate: machine.bytes_per_second().map(format_rate),
            eta: machine.eta().map(format_eta),
            phases: machine
                .phases()
                .iter()
                .map(|p| PhaseRow {
                    name: p.name.clone(),
                    ratio: p.ratio,
                    label: format!("{:.1}%", p.ratio * 100.0),
                })
                .collect(),
            message,
            tone,
            control,
            state,
        }
    }
}

fn format_rate(bytes_per_second: f64) -> String {
    const UNITS: [&str; 4] = ["B/s", "KiB/s", "MiB/s", "GiB/s"];
    let mut value = bytes_per_second;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn format_eta(left: Duration) -> String {
    let secs = left.as_secs() + u64::from(left.subsec_nanos() > 0);
    match secs {
        0..60 => format!("{secs}s"),
        60..3600 => format!("{}m {:02}s", secs / 60, secs % 60),
        _ => format!("{}h {:02}m", secs / 3600, secs % 3600 / 60),
    }
}

impl fmt::Display for Card {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.title, self.state.label())?;
        match &self.bytes {
            ByteIndicator::Percent { label, .. } => write!(f, " {label}")?,
            ByteIndicator::Indeterminate => f.write_str(" ...")?,
            ByteIndicator::Hidden => {}
        }
        match (&self.rate, &self.eta) {
            (Some(rate), Some(eta)) => write!(f, " ({rate}, {eta} left)")?,
            (Some(rate), None) => write!(f, " ({rate})")?,
            _ => {}
        }
        for phase in &self.phases {
            write!(f, "\n  {}: {}", phase.name, phase.label)?;
        }
        if let Some(message) = &self.message {
            write!(f, "\n  {message}")?;
        }
        Ok(())
    }
}
