//! Periodic keep-alive frames

use crate::server::messages::ServerMessage;
use crate::server::router::ChannelRouter;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, warn};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Sends a keep-alive frame to every open connection on a fixed interval.
///
/// Advisory only: peers that never answer are not disconnected.
pub struct KeepAlive {
    router: ChannelRouter,
    interval: Duration,
}

impl KeepAlive {
    /// A zero `interval` is raised to one millisecond; tokio's ticker
    /// cannot run with a zero period.
    pub fn new(router: ChannelRouter, interval: Duration) -> Self {
        Self {
            router,
            interval: interval.max(MIN_INTERVAL),
        }
    }

    /// Send one round of keep-alives. Returns how many peers accepted it.
    pub fn sweep(&self) -> usize {
        match ServerMessage::keep_alive().encode() {
            Ok(frame) => self.router.broadcast(&frame),
            Err(e) => {
                warn!(error = %e, "Failed to encode keep-alive");
                0
            }
        }
    }

    /// Sweep forever; the first sweep happens one interval after start
    pub async fn run(self) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let delivered = self.sweep();
            debug!(delivered, "Keep-alive sweep");
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }
}
