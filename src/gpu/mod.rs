//! GPU device inventory and difficulty-class leasing.
//!
//! Unlike the on-device memory allocator this module replaces, the
//! orchestrator never touches GPU memory itself: a "device" here is a whole
//! GPU handed, exclusively, to a sibling worker container. What is
//! allocated and released is the device as a unit.

mod allocator;
mod telemetry;

pub use allocator::{spawn_telemetry_refresh, GpuAllocator, LeaseError};
pub use telemetry::{GpuTelemetry, NoopTelemetry, TelemetryReading};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse GPU class a task is routed to. Requests only ever lease a device
/// whose class matches their declared difficulty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Low,
    High,
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Difficulty {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "high" => Ok(Self::High),
            other => Err(format!("invalid difficulty: {other}")),
        }
    }
}

/// A single GPU device known to the allocator.
#[derive(Debug, Clone)]
pub struct GpuDevice {
    pub id: u32,
    pub difficulty: Difficulty,
    pub available: bool,
    pub telemetry: Option<TelemetryReading>,
}

/// Read-only view of a device for `snapshot()` / health reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpuSnapshot {
    pub id: u32,
    pub difficulty: Difficulty,
    pub available: bool,
    pub telemetry: Option<TelemetryReading>,
}

impl From<&GpuDevice> for GpuSnapshot {
    fn from(d: &GpuDevice) -> Self {
        Self { id: d.id, difficulty: d.difficulty, available: d.available, telemetry: d.telemetry.clone() }
    }
}
