//! Bridges a blocking log source into an async channel. The single most
//! important concurrency rule in this codebase: never drive a blocking
//! iterator on a tokio worker thread.
//!
//! `ContainerRuntime::stream_logs`/`exec` hand back a plain blocking
//! `Iterator`; its `next()` call blocks the calling thread. Driving that
//! iterator on a tokio worker thread would stall every other task
//! multiplexed onto it. Instead a dedicated `std::thread` pulls lines and
//! forwards them over a bounded `tokio::sync::mpsc` channel; the scheduler
//! only ever awaits the channel, never the iterator.

use tokio::sync::mpsc;

use crate::container::{LogLines, RawLine};

const CHANNEL_CAPACITY: usize = 64;

/// Spawn the bridge thread and return the async-facing receiver.
pub fn spawn(lines: LogLines) -> mpsc::Receiver<std::io::Result<RawLine>> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    std::thread::spawn(move || {
        for line in lines {
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
