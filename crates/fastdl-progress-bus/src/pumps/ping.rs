//! Keepalive pings, so idle proxies do not drop a socket that is only
//! waiting for server-side progress.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite;
use tokio_util::sync::CancellationToken;

use super::write::Outbound;

/// Queues a ping every `period`, first one a full period after start.
pub(crate) async fn ping_pump(
    write_tx: mpsc::UnboundedSender<Outbound>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while cancel
        .run_until_cancelled(ticks.tick())
        .await
        .is_some()
    {
        let ping = Outbound::Frame(tungstenite::Message::Ping(Vec::new().into()));
        if write_tx.send(ping).is_err() {
            return;
        }
    }
}
