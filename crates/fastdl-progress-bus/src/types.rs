//! Public types for the progress bus.

use std::time::Duration;

use url::Url;

use fastdl_protocol::constants::WS_PING_PERIOD;

/// Connection state of the progress socket.
#[derive(Debug, Clone, PartialEq)]
pub enum BusState {
    /// Initial handshake in progress.
    Connecting,
    /// Socket open; registrations and updates flow.
    Connected,
    /// Socket lost, waiting before the given reconnect attempt.
    Reconnecting { attempt: u32 },
    /// Closed for good (explicit close, or a transport without reconnect).
    Closed,
}

/// Configuration for automatic reconnection with exponential backoff.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay: Duration,
    /// Multiplier for each subsequent attempt.
    pub backoff_factor: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(15),
            backoff_factor: 2.0,
        }
    }
}

impl ReconnectConfig {
    /// Calculates the delay for a given attempt number (1-based),
    /// with ±25% jitter so many clients do not reconnect in lockstep.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay.as_secs_f64());
        let jitter = capped * 0.25;
        let offset = (std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .subsec_nanos() as f64
            / 1_000_000_000.0)
            * 2.0
            - 1.0; // [-1.0, 1.0)
        let with_jitter = (capped + jitter * offset).max(0.05);
        Duration::from_secs_f64(with_jitter)
    }
}

/// Where and how to open the progress socket.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// `ws://` or `wss://` URL of the progress endpoint.
    pub url: Url,
    /// Session cookie sent with the upgrade request; the endpoint is only
    /// served to logged-in users.
    pub cookie: Option<String>,
    pub reconnect: ReconnectConfig,
    /// Interval between keepalive pings. Must stay well below the read
    /// deadline, or an idle socket is dropped.
    pub keepalive: Duration,
}

impl BusConfig {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cookie: None,
            reconnect: ReconnectConfig::default(),
            keepalive: WS_PING_PERIOD,
        }
    }
}
