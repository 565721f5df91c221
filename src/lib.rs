//! GPU task execution and session orchestrator.
//!
//! Accepts typed task requests, routes them to a GPU matching a declared
//! difficulty class, launches a sibling worker container with that GPU
//! attached, and streams structured progress events back to the caller.
//! Beyond one-off tasks, maintains long-lived sessions: containers that keep
//! a model resident across many requests, dispatched through a bounded
//! per-session queue and reaped by a dual-timeout watchdog.
//!
//! # Dependency order (leaves first)
//!
//! `ConfigCatalog` -> `GpuAllocator` -> `ModelCache` -> `ContainerRuntime`
//! adapter -> `SessionRegistry` + `TimeoutReaper` -> `InstanceStreamer` ->
//! `Pipeline`. [`App::bootstrap`] wires all of it from environment
//! configuration and a catalog directory.
//!
//! # Global singletons -> injected capabilities
//!
//! Every capability object (`GpuAllocator`, `SessionRegistry`, `ModelCache`,
//! `ContainerRuntime`) is owned by [`App`] and handed to HTTP handlers
//! through [`AppState`], which is `Clone` (every field is an `Arc` or a
//! cheap value) so axum can share it across the handler pool. There is no
//! process-level hidden state.

pub mod api;
pub mod catalog;
pub mod config;
pub mod container;
pub mod gpu;
pub mod health;
pub mod model;
pub mod pipeline;
pub mod session;
pub mod shutdown;
pub mod stream;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use catalog::{CatalogPaths, ConfigCatalog};
use config::EnvConfig;
use container::{BollardRuntime, ContainerError, ContainerRuntime};
use gpu::{spawn_telemetry_refresh, GpuAllocator, NoopTelemetry};
use health::{HealthChecker, HealthConfig};
use model::{HttpModelFetcher, ModelCache, ModelFetcher};
use pipeline::Pipeline;
use session::{spawn_reaper, SessionRegistry};
use shutdown::ShutdownCoordinator;
use stream::InstanceStreamer;

/// Everything an HTTP handler needs, cloned cheaply per request (§9
/// "Global singletons -> injected capabilities").
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub sessions: Arc<SessionRegistry>,
    pub gpu: Arc<GpuAllocator>,
    pub health: Arc<HealthChecker>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub internal_api_key: String,
}

/// Failures that can prevent the orchestrator from starting at all.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to reach the container runtime: {0}")]
    Runtime(#[from] ContainerError),
}

/// Owns every capability object plus the background tasks that outlive any
/// single request (the reaper and the GPU telemetry refresh loop).
pub struct App {
    pub state: AppState,
    background_cancel: CancellationToken,
    background: Vec<JoinHandle<()>>,
}

impl App {
    /// Build every capability object from environment configuration and a
    /// catalog directory (§2 dependency order), and spawn the reaper and
    /// telemetry refresh background tasks.
    pub fn bootstrap(env: EnvConfig, catalog_paths: CatalogPaths) -> Result<Self, BootstrapError> {
        telemetry::init_metrics();

        let catalog = Arc::new(ConfigCatalog::new(
            catalog_paths,
            env.task.default_timeout_seconds,
            env.task.max_timeout_seconds,
        ));

        let gpu = Arc::new(GpuAllocator::new(env.gpu.devices.clone()));

        let fetcher: Arc<dyn ModelFetcher> = Arc::new(HttpModelFetcher::new(
            env.file_service.base_url.clone(),
            env.file_service.internal_key.clone(),
        ));
        let model_cache =
            Arc::new(ModelCache::new(env.model_cache.base_dir.clone(), env.model_cache.auto_fetch, fetcher));

        let runtime: Arc<dyn ContainerRuntime> = Arc::new(BollardRuntime::connect_local()?);

        let streamer = Arc::new(InstanceStreamer::new(runtime.clone()));

        let sessions = Arc::new(SessionRegistry::new(
            gpu.clone(),
            runtime.clone(),
            streamer.clone(),
            env.session.queue_max_size,
            env.session.idle_timeout,
            env.session.max_lifetime,
        ));

        let pipeline = Arc::new(Pipeline::new(
            catalog,
            model_cache,
            gpu.clone(),
            runtime,
            sessions.clone(),
            streamer,
            env.allowed_docker_images.clone(),
        ));

        let health = Arc::new(HealthChecker::new(HealthConfig::default()));
        let shutdown = Arc::new(ShutdownCoordinator::new());

        let background_cancel = CancellationToken::new();
        let reaper = spawn_reaper(sessions.clone(), env.session.monitor_interval, background_cancel.clone());
        // No real telemetry provider is wired by default (§6 "GpuTelemetry
        // ... may fail; failures degrade snapshots but never block
        // allocation"); a deployment with a provider swaps `NoopTelemetry`
        // for one here.
        let telemetry_refresh = spawn_telemetry_refresh(
            gpu.clone(),
            Arc::new(NoopTelemetry),
            Duration::from_secs(30),
            background_cancel.clone(),
        );

        Ok(Self {
            state: AppState { pipeline, sessions, gpu, health, shutdown, internal_api_key: env.internal_api_key },
            background_cancel,
            background: vec![reaper, telemetry_refresh],
        })
    }

    /// Build the axum router over this app's state (§6 HTTP surface).
    pub fn router(&self) -> axum::Router {
        api::router(self.state.clone())
    }

    /// Stop background tasks (reaper, telemetry refresh). Does not drain
    /// in-flight request streams; see `AppState::shutdown` for that.
    pub async fn stop_background(self) {
        self.background_cancel.cancel();
        for handle in self.background {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task panicked during shutdown");
            }
        }
    }
}
