//! `ContainerRuntime` backed by the host's Docker-compatible daemon via
//! `bollard` (DOOD — sibling containers, never nested).

use std::time::Duration;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{DeviceRequest, HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;
use tracing::{info, warn};

use super::runtime::{ContainerRuntime, ExecHandle, LogLines};
use super::types::{ContainerError, LaunchSpec, RawLine};

pub struct BollardRuntime {
    docker: Docker,
}

impl BollardRuntime {
    /// Connect to the local Docker daemon using its default socket.
    pub fn connect_local() -> Result<Self, ContainerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::RuntimeUnavailable(e.into()))?;
        Ok(Self { docker })
    }

    async fn create(&self, spec: LaunchSpec, auto_remove: bool) -> Result<String, ContainerError> {
        let mut env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        env.push("MODEL_PATH=/models".to_string());

        let mounts: Vec<Mount> = spec
            .mounts
            .iter()
            .map(|m| Mount {
                target: Some(m.container_path.clone()),
                source: Some(m.host_path.display().to_string()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(true),
                ..Default::default()
            })
            .collect();

        let host_config = HostConfig {
            mounts: Some(mounts),
            auto_remove: Some(auto_remove),
            device_requests: Some(vec![DeviceRequest {
                driver: Some("nvidia".to_string()),
                count: Some(1),
                device_ids: Some(vec![spec.gpu_id.to_string()]),
                capabilities: Some(vec![vec!["gpu".to_string()]]),
                ..Default::default()
            }]),
            ..Default::default()
        };

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.argv.clone()),
            env: Some(env),
            host_config: Some(host_config),
            ..Default::default()
        };

        let name = format!("orchestrator-{}", uuid::Uuid::new_v4());
        let created = self
            .docker
            .create_container(Some(CreateContainerOptions { name: name.clone(), platform: None }), config)
            .await
            .map_err(|e| ContainerError::Create { image: spec.image.clone(), source: e.into() })?;

        self.docker
            .start_container::<String>(&created.id, None)
            .await
            .map_err(|e| ContainerError::Create { image: spec.image.clone(), source: e.into() })?;

        info!(container_id = %created.id, image = %spec.image, gpu_id = spec.gpu_id, "container started");
        Ok(created.id)
    }
}

#[async_trait]
impl ContainerRuntime for BollardRuntime {
    async fn create_oneoff(&self, spec: LaunchSpec) -> Result<String, ContainerError> {
        self.create(spec, true).await
    }

    async fn create_long_lived(&self, spec: LaunchSpec) -> Result<String, ContainerError> {
        self.create(spec, false).await
    }

    async fn exec(&self, container_id: &str, argv: Vec<String>) -> Result<ExecHandle, ContainerError> {
        let exec = self
            .docker
            .create_exec(
                container_id,
                CreateExecOptions {
                    cmd: Some(argv),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| ContainerError::Exec { container_id: container_id.to_string(), source: e.into() })?;

        let docker = self.docker.clone();
        let exec_id = exec.id.clone();
        let (line_tx, line_rx) = std::sync::mpsc::sync_channel::<std::io::Result<RawLine>>(64);
        let (exit_tx, exit_rx) = tokio::sync::oneshot::channel();

        // The trait contract hands callers a blocking iterator; bridge
        // bollard's async exec stream through a dedicated thread so the
        // caller never has to `.await` to read a line.
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = line_tx.send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
                    return;
                }
            };
            rt.block_on(async move {
                match docker.start_exec(&exec_id, None).await {
                    Ok(StartExecResults::Attached { mut output, .. }) => {
                        while let Some(chunk) = output.next().await {
                            match chunk {
                                Ok(log_output) => {
                                    let stderr = matches!(log_output, bollard::container::LogOutput::StdErr { .. });
                                    let line = log_output.to_string();
                                    if line_tx.send(Ok(RawLine { line, stderr })).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => {
                                    let _ = line_tx.send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
                                    break;
                                }
                            }
                        }
                    }
                    Ok(StartExecResults::Detached) => {}
                    Err(e) => {
                        let _ = line_tx.send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
                    }
                }

                let exit_code = docker
                    .inspect_exec(&exec_id)
                    .await
                    .ok()
                    .and_then(|inspect| inspect.exit_code)
                    .unwrap_or(-1);
                let _ = exit_tx.send(exit_code);
            });
        });

        Ok(ExecHandle { stdout: Box::new(line_rx.into_iter()), exit_code: exit_rx })
    }

    fn stream_logs(&self, container_id: &str, follow: bool) -> Result<LogLines, ContainerError> {
        let docker = self.docker.clone();
        let container_id_owned = container_id.to_string();
        let (tx, rx) = std::sync::mpsc::sync_channel::<std::io::Result<RawLine>>(64);

        std::thread::spawn(move || {
            let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                Ok(rt) => rt,
                Err(e) => {
                    let _ = tx.send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
                    return;
                }
            };
            rt.block_on(async move {
                let options = LogsOptions::<String> {
                    follow,
                    stdout: true,
                    stderr: true,
                    tail: "all".to_string(),
                    ..Default::default()
                };
                let mut stream = docker.logs(&container_id_owned, Some(options));
                while let Some(chunk) = stream.next().await {
                    match chunk {
                        Ok(log_output) => {
                            let stderr = matches!(log_output, bollard::container::LogOutput::StdErr { .. });
                            let line = log_output.to_string();
                            if tx.send(Ok(RawLine { line, stderr })).is_err() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(std::io::Error::new(std::io::ErrorKind::Other, e)));
                            break;
                        }
                    }
                }
            });
        });

        Ok(Box::new(rx.into_iter()))
    }

    async fn stop(&self, container_id: &str, timeout: Duration) -> Result<(), ContainerError> {
        let options = StopContainerOptions { t: timeout.as_secs() as i64 };
        match self.docker.stop_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => {
                warn!(container_id, error = %e, "stop_container failed");
                Err(ContainerError::Exec { container_id: container_id.to_string(), source: e.into() })
            }
        }
    }

    async fn remove(&self, container_id: &str) -> Result<(), ContainerError> {
        let options = RemoveContainerOptions { force: true, ..Default::default() };
        match self.docker.remove_container(container_id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(ContainerError::Exec { container_id: container_id.to_string(), source: e.into() }),
        }
    }
}
