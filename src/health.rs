//! Health check support for the orchestrator.
//!
//! `GET /health` is unauthenticated and reports GPU, session, and in-flight
//! task counts so an orchestrator (Kubernetes, systemd) can judge readiness.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::gpu::GpuSnapshot;
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// `GET /health` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthState,
    pub gpus: Vec<GpuSnapshot>,
    pub sessions: usize,
    pub tasks: usize,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Degrade readiness once in-flight tasks reach this count.
    pub max_in_flight_tasks: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self { max_in_flight_tasks: 1000 }
    }
}

/// Aggregates health information from runtime components.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self { config, start_time: Instant::now() }
    }

    /// Check liveness: process is responsive. Always true today — there is
    /// no internal watchdog that can detect the process being wedged — but
    /// kept as its own check so `report` doesn't special-case "unhealthy"
    /// directly and a future deadlock detector has a single place to plug
    /// into.
    pub fn is_alive(&self) -> bool {
        true
    }

    /// Check readiness: accepting new task requests.
    pub fn is_ready(&self, shutdown_state: ShutdownState, in_flight_tasks: usize) -> bool {
        shutdown_state == ShutdownState::Running && in_flight_tasks < self.config.max_in_flight_tasks
    }

    /// Generate the full `/health` report.
    pub fn report(
        &self,
        shutdown_state: ShutdownState,
        gpus: Vec<GpuSnapshot>,
        sessions: usize,
        in_flight_tasks: usize,
    ) -> HealthReport {
        let status = if !self.is_alive() {
            HealthState::Unhealthy
        } else if !self.is_ready(shutdown_state, in_flight_tasks) {
            if shutdown_state != ShutdownState::Running {
                HealthState::Unhealthy
            } else {
                HealthState::Degraded
            }
        } else {
            HealthState::Healthy
        };

        HealthReport {
            status,
            gpus,
            sessions,
            tasks: in_flight_tasks,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
