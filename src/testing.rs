//! Test harness: an in-memory container runtime.
//!
//! Provides [`FakeRuntime`], a [`ContainerRuntime`] backed by a hash map.
//! It mirrors the engine behavior the driver and probes rely on: name
//! uniqueness on create, 404-style failures on remove/logs for missing
//! containers, and a cumulative log buffer tests can append to.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use pgpod::testing::FakeRuntime;
//! use pgpod::{InstanceDriver, RuntimeConfig};
//!
//! let runtime = Arc::new(FakeRuntime::new());
//! let driver = InstanceDriver::new(runtime.clone(), RuntimeConfig::default());
//! ```

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::{InstanceError, Result};
use crate::runtime::{ContainerHandle, ContainerRuntime, CreateContainerRequest};

#[derive(Debug, Clone)]
struct FakeContainer {
    id: String,
    name: String,
    running: bool,
    logs: Vec<u8>,
}

/// In-memory [`ContainerRuntime`] for tests.
///
/// Supports:
/// - Scripted log content via [`push_logs`](Self::push_logs)
/// - Start-failure injection via [`fail_next_start`](Self::fail_next_start)
/// - Removal recording via [`removed_ids`](Self::removed_ids)
/// - Inspection of the last create request
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, FakeContainer>>,
    next_id: AtomicU64,
    fail_next_start: AtomicBool,
    removed: Mutex<Vec<String>>,
    last_create: Mutex<Option<CreateContainerRequest>>,
}

impl FakeRuntime {
    /// Create an empty fake runtime.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running container directly, bypassing the create path.
    /// Returns the assigned id.
    pub fn add_container(&self, name: &str) -> String {
        let id = self.fresh_id();
        let mut containers = self.containers.lock().unwrap();
        containers.insert(
            name.to_string(),
            FakeContainer {
                id: id.clone(),
                name: name.to_string(),
                running: true,
                logs: Vec::new(),
            },
        );
        id
    }

    /// Append bytes to a container's cumulative log buffer.
    ///
    /// # Panics
    ///
    /// Panics when no container with this id exists.
    pub fn push_logs(&self, id: &str, bytes: &[u8]) {
        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .values_mut()
            .find(|c| c.id == id)
            .expect("push_logs: unknown container id");
        container.logs.extend_from_slice(bytes);
    }

    /// Make the next `start` call fail with an engine error.
    pub fn fail_next_start(&self) {
        self.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Ids passed to `remove` so far, in order.
    pub fn removed_ids(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }

    /// The most recent create request, if any.
    pub fn last_create_request(&self) -> Option<CreateContainerRequest> {
        self.last_create.lock().unwrap().clone()
    }

    fn fresh_id(&self) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        format!("fake-{n:08x}")
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn find_by_name(&self, name: &str) -> Result<Option<ContainerHandle>> {
        let containers = self.containers.lock().unwrap();
        Ok(containers.get(name).map(|c| ContainerHandle {
            id: c.id.clone(),
            name: c.name.clone(),
            running: c.running,
        }))
    }

    async fn create(&self, request: &CreateContainerRequest) -> Result<ContainerHandle> {
        *self.last_create.lock().unwrap() = Some(request.clone());

        let id = self.fresh_id();
        let mut containers = self.containers.lock().unwrap();
        if containers.contains_key(&request.name) {
            return Err(InstanceError::DuplicateInstance {
                name: request.name.clone(),
            });
        }
        containers.insert(
            request.name.clone(),
            FakeContainer {
                id: id.clone(),
                name: request.name.clone(),
                running: false,
                logs: Vec::new(),
            },
        );

        Ok(ContainerHandle {
            id,
            name: request.name.clone(),
            running: false,
        })
    }

    async fn start(&self, id: &str) -> Result<()> {
        if self.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(InstanceError::Engine {
                reason: "injected start failure".to_string(),
            });
        }

        let mut containers = self.containers.lock().unwrap();
        let container = containers
            .values_mut()
            .find(|c| c.id == id)
            .ok_or_else(|| InstanceError::InstanceNotFound { id: id.to_string() })?;
        container.running = true;
        Ok(())
    }

    async fn remove(&self, id: &str, _force: bool) -> Result<()> {
        let mut containers = self.containers.lock().unwrap();
        let name = containers
            .values()
            .find(|c| c.id == id)
            .map(|c| c.name.clone())
            .ok_or_else(|| InstanceError::InstanceNotFound { id: id.to_string() })?;
        containers.remove(&name);
        self.removed.lock().unwrap().push(id.to_string());
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>> {
        let containers = self.containers.lock().unwrap();
        containers
            .values()
            .find(|c| c.id == id)
            .map(|c| c.logs.clone())
            .ok_or_else(|| InstanceError::InstanceNotFound { id: id.to_string() })
    }
}
