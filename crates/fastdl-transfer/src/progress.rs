use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Bytes handed to the transport so far, out of an optional total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteProgress {
    pub sent: u64,
    pub total: Option<u64>,
}

impl ByteProgress {
    pub fn new(sent: u64, total: Option<u64>) -> Self {
        Self { sent, total }
    }

    /// Fraction sent in [0, 1], or `None` when the total is unknown.
    /// An empty body counts as complete.
    pub fn ratio(&self) -> Option<f64> {
        match self.total? {
            0 => Some(1.0),
            total => Some((self.sent as f64 / total as f64).clamp(0.0, 1.0)),
        }
    }

    /// `true` once every byte of a known-length body is sent.
    pub fn is_complete(&self) -> bool {
        matches!(self.total, Some(total) if self.sent >= total)
    }

    /// `"40.0%"` style label, or `None` when the total is unknown.
    pub fn percent_label(&self) -> Option<String> {
        self.ratio().map(|r| format!("{:.1}%", r * 100.0))
    }

    pub fn remaining(&self) -> Option<u64> {
        self.total.map(|t| t.saturating_sub(self.sent))
    }
}

struct Sample {
    bytes: u64,
    at: Instant,
}

/// Transfer speed over a sliding window of samples.
pub struct SpeedCalculator {
    samples: VecDeque<Sample>,
    max_samples: usize,
    window: Duration,
}

impl Default for SpeedCalculator {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 100)
    }
}

impl SpeedCalculator {
    pub fn new(window: Duration, max_samples: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            max_samples: max_samples.max(2),
            window,
        }
    }

    /// Records `bytes` moved since the previous sample.
    pub fn add_sample(&mut self, bytes: u64) {
        self.add_sample_at(bytes, Instant::now());
    }

    fn add_sample_at(&mut self, bytes: u64, at: Instant) {
        self.samples.push_back(Sample { bytes, at });

        while let Some(first) = self.samples.front() {
            if at.duration_since(first.at) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_samples {
            self.samples.pop_front();
        }
    }

    /// Average bytes/second inside the window; 0 with fewer than two samples.
    ///
    /// The first sample only marks the start of the window, so its bytes are
    /// not counted.
    pub fn bytes_per_second(&self) -> f64 {
        let (Some(first), Some(last)) = (self.samples.front(), self.samples.back()) else {
            return 0.0;
        };
        let elapsed = last.at.duration_since(first.at);
        if self.samples.len() < 2 || elapsed.is_zero() {
            return 0.0;
        }
        let moved: u64 = self.samples.iter().skip(1).map(|s| s.bytes).sum();
        moved as f64 / elapsed.as_secs_f64()
    }

    /// Time left for `remaining` bytes at the current speed.
    pub fn eta(&self, remaining: u64) -> Option<Duration> {
        let speed = self.bytes_per_second();
        if speed <= 0.0 {
            return None;
        }
        Some(Duration::from_secs_f64(remaining as f64 / speed))
    }

    pub fn reset(&mut self) {
        self.samples.clear();
    }
}
