// src/runtime/docker.rs
use super::{ContainerHandle, ContainerRuntime, ContainerSpec};
use crate::error::{Error, Result};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerInspectResponse, HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use bollard::Docker;
use futures::{StreamExt, TryStreamExt};
use std::collections::HashMap;
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout, Duration, Instant};
use tracing::{debug, info, warn};

const STOP_GRACE_SECS: i64 = 10;

/// What to do about a container that already holds the requested name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NameCollision {
    Reuse,
    Restart,
    Recreate,
}

impl NameCollision {
    pub(crate) fn for_existing(running: bool, force_recreate: bool) -> Self {
        match (force_recreate, running) {
            (true, _) => NameCollision::Recreate,
            (false, true) => NameCollision::Reuse,
            (false, false) => NameCollision::Restart,
        }
    }

    pub(crate) fn after_restart(running: bool) -> Self {
        if running {
            NameCollision::Reuse
        } else {
            NameCollision::Recreate
        }
    }
}

/// Drives the local Docker daemon through its API.
#[derive(Default)]
pub struct DockerRuntime {
    /// Connected on first use.
    docker: RwLock<Option<Docker>>,
}

impl DockerRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker: RwLock::new(Some(docker)),
        }
    }

    async fn docker(&self) -> Result<Docker> {
        {
            let guard = self.docker.read().await;
            if let Some(ref d) = *guard {
                return Ok(d.clone());
            }
        }
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::Container(format!("failed to connect to Docker: {}", e)))?;
        *self.docker.write().await = Some(docker.clone());
        Ok(docker)
    }

    /// `Some(info)` when a container of that name exists.
    async fn inspect(&self, docker: &Docker, name: &str) -> Result<Option<ContainerInspectResponse>> {
        match docker.inspect_container(name, None).await {
            Ok(info) => Ok(Some(info)),
            Err(e) if is_not_found(&e) => {
                debug!(container = %name, "Container not found");
                Ok(None)
            }
            Err(e) => Err(container_error(name, "inspect", e)),
        }
    }

    async fn remove(&self, docker: &Docker, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        if let Err(e) = docker.remove_container(name, Some(options)).await {
            warn!(container = %name, error = %e, "Failed to remove container");
        }
    }

    async fn ensure_image(&self, docker: &Docker, spec: &ContainerSpec) -> Result<()> {
        if spec.pull {
            info!(image = %spec.image, "Pulling image");
            let options = CreateImageOptions {
                from_image: spec.image.clone(),
                ..Default::default()
            };
            docker
                .create_image(Some(options), None, None)
                .try_collect::<Vec<_>>()
                .await
                .map_err(|e| Error::Container(format!("failed to pull {}: {}", spec.image, e)))?;
        }

        match docker.inspect_image(&spec.image).await {
            Ok(_) => Ok(()),
            Err(e) if is_not_found(&e) => Err(Error::ImageNotFound(format!(
                "Image '{}' not found. Build or pull it first",
                spec.image
            ))),
            Err(e) => Err(Error::Container(format!("failed to inspect image {}: {}", spec.image, e))),
        }
    }

    /// Handles an existing container of the same name. Returns a handle when it can be reused.
    async fn reuse_existing(&self, docker: &Docker, spec: &ContainerSpec) -> Result<Option<ContainerHandle>> {
        let Some(info) = self.inspect(docker, &spec.name).await? else {
            return Ok(None);
        };

        let mut decision = NameCollision::for_existing(is_running(&info), spec.force_recreate);
        if decision == NameCollision::Restart {
            info!(container = %spec.name, "Restarting stopped container");
            let restarted = docker.start_container::<String>(&spec.name, None).await.is_ok();
            let running = restarted
                && matches!(self.inspect(docker, &spec.name).await, Ok(Some(ref info)) if is_running(info));
            decision = NameCollision::after_restart(running);
        }

        match decision {
            NameCollision::Reuse => {
                info!(container = %spec.name, "Reusing running container");
                Ok(Some(ContainerHandle {
                    id: info.id.unwrap_or_else(|| spec.name.clone()),
                    name: spec.name.clone(),
                }))
            }
            _ => {
                info!(container = %spec.name, force = spec.force_recreate, "Recreating container");
                self.remove(docker, &spec.name).await;
                Ok(None)
            }
        }
    }
}

fn is_not_found(e: &DockerError) -> bool {
    matches!(e, DockerError::DockerResponseServerError { status_code: 404, .. })
}

fn container_error(name: &str, action: &str, e: DockerError) -> Error {
    Error::Container(format!("failed to {} container {}: {}", action, name, e))
}

fn is_running(info: &ContainerInspectResponse) -> bool {
    info.state.as_ref().and_then(|s| s.running).unwrap_or(false)
}

fn first_ip(info: &ContainerInspectResponse) -> Option<String> {
    info.network_settings
        .as_ref()?
        .networks
        .as_ref()?
        .values()
        .filter_map(|endpoint| endpoint.ip_address.clone())
        .find(|ip| !ip.is_empty())
}

/// Container configuration publishing `spec.ports` and injecting `spec.env`.
fn container_config(spec: &ContainerSpec) -> Config<String> {
    let port_bindings: HashMap<String, Option<Vec<PortBinding>>> = spec
        .ports
        .iter()
        .map(|(host, container)| {
            (
                format!("{}/tcp", container),
                Some(vec![PortBinding {
                    host_ip: None,
                    host_port: Some(host.to_string()),
                }]),
            )
        })
        .collect();
    let exposed_ports = port_bindings
        .keys()
        .map(|port| (port.clone(), HashMap::new()))
        .collect();

    let host_config = HostConfig {
        port_bindings: Some(port_bindings),
        restart_policy: Some(RestartPolicy {
            name: Some(RestartPolicyNameEnum::ALWAYS),
            maximum_retry_count: None,
        }),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        env: Some(spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()),
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &ContainerSpec) -> Result<ContainerHandle> {
        let docker = self.docker().await?;
        self.ensure_image(&docker, spec).await?;

        if let Some(handle) = self.reuse_existing(&docker, spec).await? {
            return Ok(handle);
        }

        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };
        let response = docker
            .create_container(Some(options), container_config(spec))
            .await
            .map_err(|e| container_error(&spec.name, "create", e))?;
        let handle = ContainerHandle {
            id: response.id,
            name: spec.name.clone(),
        };

        if let Err(e) = docker.start_container::<String>(&handle.id, None).await {
            self.remove(&docker, &handle.id).await;
            return Err(container_error(&spec.name, "start", e));
        }

        match self.inspect(&docker, &handle.id).await? {
            Some(info) if is_running(&info) => {
                debug!(container = %handle.name, id = %handle.id, "Container started");
                Ok(handle)
            }
            _ => {
                self.remove(&docker, &handle.id).await;
                Err(Error::Container(format!("Container {} failed to start", spec.name)))
            }
        }
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<()> {
        let docker = self.docker().await?;
        debug!(container = %handle.name, "Stopping container");

        if let Err(e) = docker
            .stop_container(&handle.id, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            warn!(container = %handle.name, error = %e, "Failed to stop container (may already be stopped)");
        }

        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match docker.remove_container(&handle.id, Some(options)).await {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(container_error(&handle.name, "remove", e)),
        }
        debug!(container = %handle.name, "Container stopped and removed");
        Ok(())
    }

    async fn get_ip(&self, handle: &ContainerHandle) -> Result<String> {
        let docker = self.docker().await?;
        let info = self
            .inspect(&docker, &handle.id)
            .await?
            .ok_or_else(|| Error::Container(format!("Container {} not found", handle.name)))?;
        first_ip(&info).ok_or_else(|| Error::Container(format!("No IP address found for container {}", handle.name)))
    }

    async fn wait_for_port(&self, handle: &ContainerHandle, port: u16, wait: Duration) -> Result<bool> {
        let ip = self.get_ip(handle).await?;
        let deadline = Instant::now() + wait;
        debug!(container = %handle.name, %ip, port, "Waiting for port");

        while Instant::now() < deadline {
            if let Ok(Ok(_)) = timeout(Duration::from_secs(1), TcpStream::connect((ip.as_str(), port))).await {
                return Ok(true);
            }
            sleep(Duration::from_millis(500)).await;
        }

        warn!(container = %handle.name, port, "Timeout waiting for port");
        Ok(false)
    }

    async fn exec(&self, handle: &ContainerHandle, command: &[String]) -> Result<(i32, String)> {
        let docker = self.docker().await?;
        let options = CreateExecOptions {
            cmd: Some(command.to_vec()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };
        let exec = docker
            .create_exec(&handle.id, options)
            .await
            .map_err(|e| container_error(&handle.name, "exec in", e))?;

        let mut combined = String::new();
        match docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| container_error(&handle.name, "exec in", e))?
        {
            StartExecResults::Attached { mut output, .. } => {
                while let Some(chunk) = output.next().await {
                    let chunk = chunk.map_err(|e| container_error(&handle.name, "read exec output of", e))?;
                    combined.push_str(&chunk.to_string());
                }
            }
            StartExecResults::Detached => {}
        }

        let inspect = docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| container_error(&handle.name, "inspect exec in", e))?;
        let code = inspect
            .exit_code
            .and_then(|code| i32::try_from(code).ok())
            .ok_or_else(|| Error::Container(format!("exec in {} reported no exit code", handle.name)))?;
        Ok((code, combined))
    }

    async fn logs(&self, handle: &ContainerHandle, tail: usize) -> Result<String> {
        let docker = self.docker().await?;
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            timestamps: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let chunks: Vec<String> = docker
            .logs(&handle.id, Some(options))
            .map_ok(|chunk| chunk.to_string())
            .try_collect()
            .await
            .map_err(|e| container_error(&handle.name, "read logs of", e))?;
        Ok(chunks.concat())
    }

    async fn image_label(&self, image: &str, key: &str) -> Result<Option<String>> {
        let docker = self.docker().await?;
        let info = docker.inspect_image(image).await.map_err(|e| {
            if is_not_found(&e) {
                Error::ImageNotFound(format!("Image '{}' not found", image))
            } else {
                Error::Container(format!("failed to inspect image {}: {}", image, e))
            }
        })?;

        Ok(info
            .config
            .and_then(|config| config.labels)
            .and_then(|mut labels| labels.remove(key))
            .filter(|label| !label.trim().is_empty()))
    }
}
