//! Ephemeral PostgreSQL instances as managed Docker containers.
//!
//! `pgpod` provisions isolated, throwaway database instances on demand and
//! determines when each one is actually ready to accept connections. It is
//! a library: the HTTP/CLI front end, metadata catalog, and caller
//! authentication live elsewhere.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          InstanceDriver                              │
//! │                                                                      │
//! │   create_instance(spec)                                              │
//! │         │                                                            │
//! │         ▼                                                            │
//! │   ┌──────────────┐    ┌──────────────┐    ┌───────────────────────┐  │
//! │   │ Check Name   │───▶│ Allocate     │───▶│ Create & Start        │  │
//! │   │ (engine ns)  │    │ Port         │    │ (rollback on failure) │  │
//! │   └──────────────┘    └──────────────┘    └───────────────────────┘  │
//! │                                                    │                 │
//! │                                                    ▼                 │
//! │                      ┌──────────────┐    ┌───────────────────────┐   │
//! │                      │ Log Probe    │    │ Connection Probe      │   │
//! │                      │ (marker ×2)  │    │ (wire handshake)      │   │
//! │                      └──────────────┘    └───────────────────────┘   │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use tokio_util::sync::CancellationToken;
//!
//! use pgpod::{
//!     ConnectParams, DockerRuntime, InstanceDriver, InstanceSpec, RuntimeConfig,
//!     probe::{wait_for_connectable, wait_for_log_ready, DEFAULT_CONNECT_ATTEMPTS},
//! };
//!
//! # async fn example(spec: InstanceSpec) -> Result<(), Box<dyn std::error::Error>> {
//! let config = RuntimeConfig::default();
//! let runtime = Arc::new(DockerRuntime::connect(&config).await?);
//! let driver = InstanceDriver::new(runtime.clone(), config);
//!
//! let created = driver.create_instance(&spec).await?;
//!
//! let cancel = CancellationToken::new();
//! wait_for_log_ready(
//!     runtime.as_ref(),
//!     &created.container_id,
//!     Duration::from_secs(10),
//!     &cancel,
//! )
//! .await?;
//!
//! let params = ConnectParams::for_instance(&spec, &created);
//! wait_for_connectable(&params, DEFAULT_CONNECT_ATTEMPTS, &cancel).await?;
//!
//! // ... hand the endpoint to the client, then later:
//! driver.delete_instance(&created.container_id).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod instance;
pub mod port;
pub mod probe;
pub mod runtime;
pub mod testing;

pub use config::RuntimeConfig;
pub use driver::{InstanceDriver, MANAGED_LABEL, POSTGRES_PORT};
pub use error::{InstanceError, Result};
pub use instance::{CreatedInstance, InstanceSpec};
pub use port::acquire_ephemeral_port;
pub use probe::{ConnectParams, ProbeOutcome, wait_for_connectable, wait_for_log_ready};
pub use runtime::{ContainerHandle, ContainerRuntime, CreateContainerRequest, DockerRuntime};
