//! `GpuTelemetry` external collaborator: best-effort device metrics.
//!
//! Telemetry refresh runs independently of `lease`/`release` and may race
//! with them; a snapshot may show a stale reading but never an inconsistent
//! `available` flag.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One telemetry sample for a single device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub id: u32,
    pub mem_used_bytes: u64,
    pub temp_celsius: f32,
    pub util_percent: f32,
}

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry provider unavailable: {0}")]
    Unavailable(String),
}

/// Narrow interface to whatever GPU telemetry provider is deployed
/// (nvidia-smi wrapper, DCGM, vendor SDK, ...). A failure here must never
/// block allocation.
#[async_trait]
pub trait GpuTelemetry: Send + Sync {
    async fn snapshot(&self) -> Result<Vec<TelemetryReading>, TelemetryError>;
}

/// Telemetry provider that always reports "no data". Used where no real
/// provider is wired up; allocation proceeds normally with `telemetry: None`
/// on every device.
pub struct NoopTelemetry;

#[async_trait]
impl GpuTelemetry for NoopTelemetry {
    async fn snapshot(&self) -> Result<Vec<TelemetryReading>, TelemetryError> {
        Ok(Vec::new())
    }
}
