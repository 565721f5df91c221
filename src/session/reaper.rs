//! TimeoutReaper: wakes every `MONITOR_INTERVAL` and kills any
//! session that has exceeded its `max_lifetime` or gone idle past
//! `idle_timeout`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::registry::SessionRegistry;

/// Spawn the background reaper task. Stops promptly on `shutdown`.
pub fn spawn(registry: Arc<SessionRegistry>, interval: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; skip it so a session isn't
        // evaluated before it has had a chance to exist for one full sweep.
        ticker.tick().await;
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    debug!("reaper sweep starting");
                    registry.sweep().await;
                }
            }
        }
    })
}
