use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Fires a liveness signal on a fixed interval until shut down.
pub struct HeartbeatSender {
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval: Duration::from_millis(interval_ms),
        }
    }

    /// Call `beat` once per interval. The first beat goes out immediately.
    pub async fn run<F, Fut>(&self, shutdown: CancellationToken, mut beat: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => beat().await,
            }
        }
    }
}
