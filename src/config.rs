//! Configuration for the runtime client and driver.

use std::time::Duration;

/// Explicit configuration for the Docker runtime client.
///
/// Every process-wide default the engine client needs (socket path, API
/// timeout, image tag) lives here and is passed in at construction. There
/// is no ambient global state.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Path to the engine's control socket.
    pub socket_path: String,
    /// Connect/response timeout for engine API calls, in seconds.
    pub api_timeout_secs: u64,
    /// Image to run instances from. Single parameterized tag; version
    /// management beyond this is out of scope.
    pub image: String,
    /// Hostname advertised to end clients in connection info.
    pub advertised_host: String,
    /// Whether to pull the image when it is not present locally.
    pub auto_pull: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket_path: "/var/run/docker.sock".to_string(),
            api_timeout_secs: 30,
            image: "postgres:17".to_string(),
            advertised_host: "localhost".to_string(),
            auto_pull: true,
        }
    }
}

impl RuntimeConfig {
    /// API timeout as a [`Duration`].
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}
