//! Instance lifecycle driver: create, delete, existence checks.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::config::RuntimeConfig;
use crate::error::{InstanceError, Result};
use crate::instance::{CreatedInstance, InstanceSpec};
use crate::port::acquire_ephemeral_port;
use crate::runtime::{ContainerRuntime, CreateContainerRequest};

/// Fixed port the database listens on inside the container.
pub const POSTGRES_PORT: u16 = 5432;

/// Label key marking containers managed by this crate.
pub const MANAGED_LABEL: &str = "pgpod.managed";

/// Orchestrates instance creation and removal against the container engine.
///
/// The driver owns no state beyond its configuration and the shared runtime
/// client. Name uniqueness is enforced by the engine's namespace: the
/// `exists` pre-check in [`create_instance`](Self::create_instance) only
/// gives callers a friendlier error, the engine's rejection of duplicate
/// names is the actual guard.
pub struct InstanceDriver {
    runtime: Arc<dyn ContainerRuntime>,
    config: RuntimeConfig,
}

impl InstanceDriver {
    /// Create a driver over an already-connected runtime client.
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: RuntimeConfig) -> Self {
        Self { runtime, config }
    }

    /// Create and start a database instance.
    ///
    /// Allocates an ephemeral port when the spec does not request one.
    /// Create and start are two sequential engine calls, not a transaction:
    /// when start fails after create succeeded, the orphaned container is
    /// force-removed before the error propagates.
    pub async fn create_instance(&self, spec: &InstanceSpec) -> Result<CreatedInstance> {
        if self.runtime.exists(&spec.name).await? {
            return Err(InstanceError::DuplicateInstance {
                name: spec.name.clone(),
            });
        }

        let port = match spec.requested_port {
            Some(port) => port,
            None => acquire_ephemeral_port()?,
        };

        let request = CreateContainerRequest {
            name: spec.name.clone(),
            image: self.config.image.clone(),
            env: vec![
                ("DB_USER".to_string(), spec.db_username.clone()),
                (
                    "DB_PASSWORD".to_string(),
                    spec.db_password.expose_secret().to_string(),
                ),
                ("DB_NAME".to_string(), spec.db_name.clone()),
            ],
            labels: vec![(MANAGED_LABEL.to_string(), self.config.image.clone())],
            container_port: POSTGRES_PORT,
            host_port: port,
        };

        let handle = self.runtime.create(&request).await?;

        if let Err(e) = self.runtime.start(&handle.id).await {
            tracing::warn!(
                name = %spec.name,
                id = %handle.id,
                error = %e,
                "start failed, removing orphaned container"
            );
            if let Err(cleanup) = self.runtime.remove(&handle.id, true).await {
                tracing::error!(
                    id = %handle.id,
                    error = %cleanup,
                    "rollback removal failed, container leaked"
                );
            }
            return Err(e);
        }

        tracing::info!(name = %spec.name, id = %handle.id, port, "instance started");

        Ok(CreatedInstance {
            container_id: handle.id,
            host: self.config.advertised_host.clone(),
            port,
        })
    }

    /// Force-remove an instance by container id.
    pub async fn delete_instance(&self, container_id: &str) -> Result<()> {
        self.runtime.remove(container_id, true).await?;
        tracing::info!(id = %container_id, "instance removed");
        Ok(())
    }

    /// Whether an instance with this name currently exists in the engine
    /// namespace. Point-in-time answer; a concurrent caller can still win
    /// the race to create the name.
    pub async fn check_exists(&self, name: &str) -> Result<bool> {
        self.runtime.exists(name).await
    }
}
