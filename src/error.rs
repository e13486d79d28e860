//! Error types for instance management.

use thiserror::Error;

/// Result type for instance operations.
pub type Result<T> = std::result::Result<T, InstanceError>;

/// Errors that can occur while driving an instance's lifecycle or probing
/// its readiness.
///
/// Readiness timeouts are deliberately not represented here: a probe that
/// runs out of time returns [`ProbeOutcome::TimedOut`](crate::probe::ProbeOutcome)
/// through its `Ok` path. Only genuine failures land in this enum.
#[derive(Debug, Error)]
pub enum InstanceError {
    /// An instance with this name already exists in the engine namespace.
    #[error("instance '{name}' already exists")]
    DuplicateInstance {
        /// Requested instance name.
        name: String,
    },

    /// The targeted container no longer exists.
    #[error("no instance with id '{id}'")]
    InstanceNotFound {
        /// Container id or name used in the lookup.
        id: String,
    },

    /// The container engine's control socket is unreachable. Fatal; never
    /// retried internally.
    #[error("container engine unreachable: {reason}")]
    EngineUnavailable {
        /// Reason why the engine is unreachable.
        reason: String,
    },

    /// The engine accepted the connection but rejected or failed the request
    /// (create, start, remove, log retrieval, image pull).
    #[error("container engine request failed: {reason}")]
    Engine {
        /// Reason for failure, as reported by the engine.
        reason: String,
    },

    /// The database server answered the handshake with an error of its own
    /// (bad credentials, unknown database, protocol mismatch). Surfaced
    /// immediately by the connection probe, never retried.
    #[error("database handshake rejected: {0}")]
    Database(#[from] tokio_postgres::Error),

    /// A readiness wait was aborted through its cancellation token.
    #[error("readiness wait cancelled")]
    Cancelled,

    /// I/O error (e.g. during port allocation).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
