//! Plain-text session view for a terminal.

use std::io::Write;
use std::time::{Duration, Instant};

use fastdl_upload::{Card, SessionState, SessionView};

/// Byte progress redraws are limited to one per interval; state and phase
/// changes always print.
const REDRAW_INTERVAL: Duration = Duration::from_millis(500);

/// Prints each card to stdout, one block per meaningful change.
pub struct TerminalView<W: Write + Send = std::io::Stdout> {
    out: W,
    last: Option<Printed>,
}

struct Printed {
    state: SessionState,
    phases: Vec<(String, String)>,
    at: Instant,
}

impl TerminalView {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> TerminalView<W> {
    pub fn new(out: W) -> Self {
        Self { out, last: None }
    }

    fn should_print(&self, card: &Card) -> bool {
        let Some(last) = &self.last else {
            return true;
        };
        last.state != card.state
            || last.phases != phase_labels(card)
            || last.at.elapsed() >= REDRAW_INTERVAL
    }
}

fn phase_labels(card: &Card) -> Vec<(String, String)> {
    card.phases
        .iter()
        .map(|p| (p.name.clone(), p.label.clone()))
        .collect()
}

impl<W: Write + Send> SessionView for TerminalView<W> {
    fn render(&mut self, card: &Card) {
        if !self.should_print(card) {
            return;
        }
        let _ = writeln!(self.out, "{card}");
        let _ = self.out.flush();
        self.last = Some(Printed {
            state: card.state.clone(),
            phases: phase_labels(card),
            at: Instant::now(),
        });
    }

    fn remove(&mut self) {
        let _ = self.out.flush();
    }
}
