//! Fixed-inventory GPU allocator.
//!
//! `lease`/`release` form a single mutually-exclusive critical section
//! guarded by one `parking_lot::Mutex`. Telemetry refresh takes the same
//! lock only to overwrite the `telemetry` field, never `available`, so a
//! concurrent `snapshot()` can observe a stale reading but never a torn
//! lease.

use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{info, warn};

use super::telemetry::{GpuTelemetry, TelemetryReading};
use super::{Difficulty, GpuDevice, GpuSnapshot};
use crate::telemetry::record_gpu_lease_attempt;

/// Only normal error `lease` returns: no device of the requested class is
/// currently available. Carries the difficulty for caller logging.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("no available GPU of difficulty {difficulty}")]
pub struct LeaseError {
    pub difficulty: Difficulty,
}

struct Inner {
    devices: Vec<GpuDevice>,
}

/// In-memory inventory of GPU devices, built once at startup from
/// `GPU_DEVICE_IDS` / `GPU_DEVICE_DIFFICULTY` and never resized thereafter.
pub struct GpuAllocator {
    inner: Mutex<Inner>,
}

impl GpuAllocator {
    /// Build an allocator from an ordered `{id -> difficulty}` list.
    pub fn new(devices: impl IntoIterator<Item = (u32, Difficulty)>) -> Self {
        let mut devices: Vec<GpuDevice> = devices
            .into_iter()
            .map(|(id, difficulty)| GpuDevice { id, difficulty, available: true, telemetry: None })
            .collect();
        devices.sort_by_key(|d| d.id);
        Self { inner: Mutex::new(Inner { devices }) }
    }

    /// Lease the first available device of `difficulty`, ascending by id.
    pub fn lease(&self, difficulty: Difficulty) -> Result<u32, LeaseError> {
        let mut inner = self.inner.lock();
        let device = inner
            .devices
            .iter_mut()
            .find(|d| d.difficulty == difficulty && d.available);

        match device {
            Some(d) => {
                d.available = false;
                let id = d.id;
                drop(inner);
                record_gpu_lease_attempt(&difficulty.to_string(), true);
                info!(gpu_id = id, %difficulty, "gpu leased");
                Ok(id)
            }
            None => {
                drop(inner);
                record_gpu_lease_attempt(&difficulty.to_string(), false);
                warn!(%difficulty, "gpu lease refused: none available");
                Err(LeaseError { difficulty })
            }
        }
    }

    /// Release a previously-leased device. Idempotent: releasing an
    /// already-available or unknown id is a no-op.
    pub fn release(&self, gpu_id: u32) {
        let mut inner = self.inner.lock();
        if let Some(d) = inner.devices.iter_mut().find(|d| d.id == gpu_id) {
            if !d.available {
                d.available = true;
                info!(gpu_id, "gpu released");
            }
        }
    }

    /// Read-only snapshot of every device, for `/health` and admin listing.
    pub fn snapshot(&self) -> Vec<GpuSnapshot> {
        self.inner.lock().devices.iter().map(GpuSnapshot::from).collect()
    }

    /// Overwrite telemetry readings by device id. Devices with no matching
    /// reading keep their previous (possibly `None`) value.
    fn apply_telemetry(&self, readings: Vec<TelemetryReading>) {
        let mut inner = self.inner.lock();
        for reading in readings {
            if let Some(d) = inner.devices.iter_mut().find(|d| d.id == reading.id) {
                d.telemetry = Some(reading);
            }
        }
    }
}

/// Spawn a background task that periodically refreshes telemetry. Provider
/// failures are logged and leave the prior snapshot untouched.
pub fn spawn_telemetry_refresh(
    allocator: Arc<GpuAllocator>,
    provider: Arc<dyn GpuTelemetry>,
    interval: std::time::Duration,
    shutdown: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match provider.snapshot().await {
                        Ok(readings) => allocator.apply_telemetry(readings),
                        Err(e) => warn!(error = %e, "gpu telemetry refresh failed"),
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocator() -> GpuAllocator {
        GpuAllocator::new([(0, Difficulty::Low), (1, Difficulty::High), (2, Difficulty::Low)])
    }

    #[test]
    fn leases_ascending_by_id() {
        let a = allocator();
        assert_eq!(a.lease(Difficulty::Low).unwrap(), 0);
        assert_eq!(a.lease(Difficulty::Low).unwrap(), 2);
    }

    #[test]
    fn lease_never_crosses_difficulty_class() {
        let a = allocator();
        a.lease(Difficulty::Low).unwrap();
        a.lease(Difficulty::Low).unwrap();
        // Both low GPUs are busy; a high request must not receive one of them.
        assert_eq!(a.lease(Difficulty::High).unwrap(), 1);
        assert!(a.lease(Difficulty::Low).is_err());
    }

    #[test]
    fn release_then_lease_round_trips() {
        let a = allocator();
        let before = a.snapshot();
        let id = a.lease(Difficulty::Low).unwrap();
        a.release(id);
        let after = a.snapshot();
        assert_eq!(
            before.iter().map(|d| d.available).collect::<Vec<_>>(),
            after.iter().map(|d| d.available).collect::<Vec<_>>(),
        );
    }

    #[test]
    fn release_is_idempotent() {
        let a = allocator();
        let id = a.lease(Difficulty::Low).unwrap();
        a.release(id);
        a.release(id);
        assert!(a.snapshot().iter().find(|d| d.id == id).unwrap().available);
    }

    #[test]
    fn full_allocator_reports_requested_difficulty() {
        let a = GpuAllocator::new([(0, Difficulty::Low)]);
        a.lease(Difficulty::Low).unwrap();
        let err = a.lease(Difficulty::Low).unwrap_err();
        assert_eq!(err.difficulty, Difficulty::Low);
    }
}
