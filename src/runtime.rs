//! Container runtime client: a thin adapter over the Docker engine API.
//!
//! The [`ContainerRuntime`] trait is the seam between the lifecycle driver
//! and the engine; [`DockerRuntime`] is the bollard-backed implementation.
//! One client is constructed at process start from an explicit
//! [`RuntimeConfig`] and shared; there is no per-call connection setup.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, RestartPolicy, RestartPolicyNameEnum};
use futures::StreamExt;

use crate::config::RuntimeConfig;
use crate::error::{InstanceError, Result};

/// Opaque handle for a created container.
///
/// The driver reads only id, name, and running state; everything else the
/// engine tracks stays on the engine side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerHandle {
    /// Engine-assigned container id.
    pub id: String,
    /// Container name (without the engine's leading slash).
    pub name: String,
    /// Whether the engine reports the container as running.
    pub running: bool,
}

/// Request to create a container, as assembled by the driver.
#[derive(Debug, Clone)]
pub struct CreateContainerRequest {
    /// Container name (the instance's unique key).
    pub name: String,
    /// Image to run.
    pub image: String,
    /// Environment variables: (name, value).
    pub env: Vec<(String, String)>,
    /// Discovery labels: (key, value).
    pub labels: Vec<(String, String)>,
    /// Fixed port inside the container.
    pub container_port: u16,
    /// External port on the host.
    pub host_port: u16,
}

/// Operations the driver and probes need from the container engine.
///
/// All operations read or mutate engine-managed state outside process
/// control. Transport failures surface as
/// [`EngineUnavailable`](InstanceError::EngineUnavailable) and are never
/// retried here.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Look up a container by name. `Ok(None)` when the engine has no
    /// container under that name.
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerHandle>>;

    /// Whether a container with this name currently exists.
    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.find_by_name(name).await?.is_some())
    }

    /// Create a container. Fails with
    /// [`DuplicateInstance`](InstanceError::DuplicateInstance) when the
    /// engine already holds the name.
    async fn create(&self, request: &CreateContainerRequest) -> Result<ContainerHandle>;

    /// Start a created container.
    async fn start(&self, id: &str) -> Result<()>;

    /// Remove a container. Fails with
    /// [`InstanceNotFound`](InstanceError::InstanceNotFound) when the id is
    /// already gone.
    async fn remove(&self, id: &str, force: bool) -> Result<()>;

    /// Fetch the cumulative combined stdout+stderr log stream.
    async fn logs(&self, id: &str) -> Result<Vec<u8>>;
}

/// Docker-backed [`ContainerRuntime`].
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    auto_pull: bool,
}

impl DockerRuntime {
    /// Connect to the engine's control socket and verify it responds.
    ///
    /// An unreachable or unresponsive engine fails here with
    /// [`EngineUnavailable`](InstanceError::EngineUnavailable) rather than
    /// on the first operation.
    pub async fn connect(config: &RuntimeConfig) -> Result<Self> {
        let docker = Docker::connect_with_unix(
            &config.socket_path,
            config.api_timeout_secs,
            bollard::API_DEFAULT_VERSION,
        )
        .map_err(|e| InstanceError::EngineUnavailable {
            reason: e.to_string(),
        })?;

        docker
            .ping()
            .await
            .map_err(|e| InstanceError::EngineUnavailable {
                reason: e.to_string(),
            })?;

        tracing::debug!(socket = %config.socket_path, "connected to container engine");

        Ok(Self {
            docker,
            auto_pull: config.auto_pull,
        })
    }

    /// Pull the image unless it is already present locally.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.docker.inspect_image(image).await.is_ok() {
            tracing::trace!(%image, "image present locally");
            return Ok(());
        }

        if !self.auto_pull {
            return Err(InstanceError::Engine {
                reason: format!("image {image} not found and auto_pull is disabled"),
            });
        }

        tracing::info!(%image, "pulling image");

        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result.map_err(engine_error)?;
            if let Some(status) = info.status {
                tracing::trace!("pull status: {}", status);
            }
        }

        tracing::info!(%image, "pulled image");
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerHandle>> {
        match self.docker.inspect_container(name, None).await {
            Ok(info) => {
                let running = info
                    .state
                    .as_ref()
                    .and_then(|s| s.running)
                    .unwrap_or(false);
                Ok(Some(ContainerHandle {
                    id: info.id.unwrap_or_else(|| name.to_string()),
                    name: info
                        .name
                        .map(|n| n.trim_start_matches('/').to_string())
                        .unwrap_or_else(|| name.to_string()),
                    running,
                }))
            }
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(None),
            Err(e) => Err(engine_error(e)),
        }
    }

    async fn create(&self, request: &CreateContainerRequest) -> Result<ContainerHandle> {
        self.ensure_image(&request.image).await?;

        let container_port_key = format!("{}/tcp", request.container_port);

        let mut port_bindings = HashMap::new();
        port_bindings.insert(
            container_port_key.clone(),
            Some(vec![PortBinding {
                host_ip: Some("0.0.0.0".to_string()),
                host_port: Some(request.host_port.to_string()),
            }]),
        );

        let exposed_ports: HashMap<String, HashMap<(), ()>> =
            HashMap::from([(container_port_key, HashMap::new())]);

        let env: Vec<String> = request
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let labels: HashMap<String, String> = request.labels.iter().cloned().collect();

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            // Survive host reboots; only an explicit stop keeps it down.
            restart_policy: Some(RestartPolicy {
                name: Some(RestartPolicyNameEnum::UNLESS_STOPPED),
                maximum_retry_count: None,
            }),
            ..Default::default()
        };

        let config = Config {
            image: Some(request.image.clone()),
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(labels),
            exposed_ports: Some(exposed_ports),
            host_config: Some(host_config),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: request.name.clone(),
            ..Default::default()
        };

        let response = match self.docker.create_container(Some(options), config).await {
            Ok(response) => response,
            Err(DockerError::DockerResponseServerError {
                status_code: 409, ..
            }) => {
                return Err(InstanceError::DuplicateInstance {
                    name: request.name.clone(),
                });
            }
            Err(e) => return Err(engine_error(e)),
        };

        Ok(ContainerHandle {
            id: response.id,
            name: request.name.clone(),
            running: false,
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(engine_error)
    }

    async fn remove(&self, id: &str, force: bool) -> Result<()> {
        match self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Err(InstanceError::InstanceNotFound { id: id.to_string() }),
            Err(e) => Err(engine_error(e)),
        }
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        };

        let mut stream = self.docker.logs(id, Some(options));
        let mut buf = Vec::new();

        while let Some(frame) = stream.next().await {
            match frame {
                Ok(output) => buf.extend_from_slice(&output.into_bytes()),
                Err(DockerError::DockerResponseServerError {
                    status_code: 404, ..
                }) => {
                    return Err(InstanceError::InstanceNotFound { id: id.to_string() });
                }
                Err(e) => return Err(engine_error(e)),
            }
        }

        Ok(buf)
    }
}

/// Map a bollard error to the instance error taxonomy.
///
/// A response carrying an engine status code means the engine was reachable
/// and rejected or failed the request; anything else means we never got a
/// proper answer from the control plane.
fn engine_error(e: DockerError) -> InstanceError {
    match e {
        DockerError::DockerResponseServerError {
            status_code,
            message,
        } => InstanceError::Engine {
            reason: format!("{status_code}: {message}"),
        },
        other => InstanceError::EngineUnavailable {
            reason: other.to_string(),
        },
    }
}
