//! Orchestrator entry point: loads configuration, wires the capability
//! graph via [`App::bootstrap`], and serves the HTTP surface until a
//! shutdown signal arrives.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use gpu_task_orchestrator::catalog::CatalogPaths;
use gpu_task_orchestrator::telemetry::{init_logging, LogConfig, LogFormat};
use gpu_task_orchestrator::{config, App};

#[derive(Parser, Debug)]
#[command(name = "gpu-orchestratord")]
#[command(about = "GPU task execution and session orchestrator")]
struct Args {
    /// Address the HTTP surface binds to.
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Directory holding `task_definitions.toml`, `task_actions.toml`, and
    /// `model_paths.toml`.
    #[arg(long, env = "CATALOG_DIR", default_value = "./config")]
    catalog_dir: PathBuf,

    /// `json` (default, production) or `pretty` (development).
    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: String,

    /// Grace period for draining in-flight task streams before exit.
    #[arg(long, env = "SHUTDOWN_TIMEOUT_SECONDS", default_value_t = 30)]
    shutdown_timeout_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_format = match args.log_format.to_ascii_lowercase().as_str() {
        "pretty" => LogFormat::Pretty,
        _ => LogFormat::Json,
    };
    init_logging(&LogConfig {
        format: log_format,
        level: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        output_path: None,
    })
    .map_err(|e| anyhow::anyhow!(e))?;

    let env_config = config::load();
    let catalog_paths = CatalogPaths {
        task_definitions: args.catalog_dir.join("task_definitions.toml"),
        task_actions: args.catalog_dir.join("task_actions.toml"),
        model_paths: args.catalog_dir.join("model_paths.toml"),
    };

    tracing::info!(
        bind = %args.bind,
        catalog_dir = %args.catalog_dir.display(),
        gpu_devices = env_config.gpu.devices.len(),
        "starting gpu task orchestrator",
    );

    let app = App::bootstrap(env_config, catalog_paths)?;
    let router = app.router();
    let shutdown = app.state.shutdown.clone();
    let shutdown_timeout = Duration::from_secs(args.shutdown_timeout_seconds);

    let listener = tokio::net::TcpListener::bind(args.bind).await?;

    // The moment a shutdown signal lands, stop accepting new HTTP
    // connections (via `stop_accepting_tx`) and, concurrently, flip the
    // `ShutdownCoordinator` to `Draining` so any request still inside a
    // handler but not yet past its capacity checks is refused while
    // requests already streaming are allowed to finish.
    let (stop_accepting_tx, stop_accepting_rx) = tokio::sync::oneshot::channel::<()>();
    let drain_task = tokio::spawn(async move {
        wait_for_signal().await;
        let _ = stop_accepting_tx.send(());
        let result = shutdown.initiate(shutdown_timeout).await;
        tracing::info!(?result, "drain complete");
    });

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = stop_accepting_rx.await;
        })
        .await?;
    let _ = drain_task.await;

    app.stop_background().await;
    Ok(())
}

/// Resolves on the first of SIGINT (or Ctrl+C on non-Unix) / SIGTERM,
/// whichever the host platform delivers.
async fn wait_for_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
