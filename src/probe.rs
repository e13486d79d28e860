//! Readiness probes for a booting instance.
//!
//! Two independent signals, measuring different layers of the boot
//! sequence:
//!
//! - [`wait_for_log_ready`] watches the container's cumulative log stream
//!   for the textual marker postgres emits when it starts accepting
//!   connections. The image's init script starts the server twice, so a
//!   single occurrence of the marker is a false positive; the probe waits
//!   for the second.
//! - [`wait_for_connectable`] performs a real wire-protocol handshake
//!   (authentication plus an initial query) against the instance's
//!   endpoint.
//!
//! Running out of time is a legitimate outcome, not an error: both probes
//! resolve to [`ProbeOutcome::TimedOut`] and leave retry-or-escalate to the
//! caller. Both honor a cancellation token at every poll iteration.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use tokio::time::Instant;
use tokio_postgres::error::SqlState;
use tokio_util::sync::CancellationToken;

use crate::error::{InstanceError, Result};
use crate::instance::{CreatedInstance, InstanceSpec};
use crate::runtime::ContainerRuntime;

/// Log line postgres emits when it begins accepting connections.
pub const READY_MARKER: &str = "database system is ready to accept connections";

/// The init script restarts the server once, so the marker must appear
/// this many times before the instance is actually reachable.
const READY_MARKER_REPEATS: usize = 2;

/// Interval between log polls.
const LOG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Interval between handshake attempts.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_secs(1);

/// Per-attempt handshake timeout.
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default bound for [`wait_for_connectable`] (~9 minutes at one attempt
/// per second).
pub const DEFAULT_CONNECT_ATTEMPTS: u32 = 540;

/// Definite outcome of a readiness wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The readiness signal was observed.
    Ready,
    /// The bound elapsed without the signal appearing.
    TimedOut,
}

impl ProbeOutcome {
    /// Whether the instance was observed ready.
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// Credentials and endpoint for the connection probe.
#[derive(Debug, Clone)]
pub struct ConnectParams {
    /// Host to connect to.
    pub host: String,
    /// External port of the instance.
    pub port: u16,
    /// Database name.
    pub db_name: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: SecretString,
}

impl ConnectParams {
    /// Assemble probe parameters for a just-created instance.
    pub fn for_instance(spec: &InstanceSpec, created: &CreatedInstance) -> Self {
        Self {
            host: created.host.clone(),
            port: created.port,
            db_name: spec.db_name.clone(),
            user: spec.db_username.clone(),
            password: spec.db_password.clone(),
        }
    }
}

/// Wait until the ready marker has appeared twice in the instance's logs,
/// polling the cumulative stream every 100 ms.
///
/// Returns [`ProbeOutcome::TimedOut`] when `timeout` elapses first. The log
/// stream is always inspected at least once, even with a zero timeout.
/// Engine failures and a vanished container propagate as errors.
pub async fn wait_for_log_ready(
    runtime: &dyn ContainerRuntime,
    container_id: &str,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProbeOutcome> {
    let deadline = Instant::now() + timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(InstanceError::Cancelled);
        }

        let logs = runtime.logs(container_id).await?;
        let text = String::from_utf8_lossy(&logs);
        if text.matches(READY_MARKER).count() >= READY_MARKER_REPEATS {
            tracing::debug!(id = %container_id, "ready marker observed twice");
            return Ok(ProbeOutcome::Ready);
        }

        if Instant::now() >= deadline {
            return Ok(ProbeOutcome::TimedOut);
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(InstanceError::Cancelled),
            () = tokio::time::sleep(LOG_POLL_INTERVAL) => {}
        }
    }
}

/// Wait until the database completes a real handshake, attempting once per
/// second up to `max_attempts`.
///
/// Transient failures are retried: refused/reset connections, attempt
/// timeouts, and the availability errors the server itself reports while
/// still booting (`57P03` "cannot connect now", `53300` "too many
/// connections"). Everything else the server reports — bad credentials,
/// unknown database, protocol mismatch — is a configuration problem, not
/// boot latency, and surfaces immediately as [`InstanceError::Database`].
/// Exhausting the bound returns [`ProbeOutcome::TimedOut`].
pub async fn wait_for_connectable(
    params: &ConnectParams,
    max_attempts: u32,
    cancel: &CancellationToken,
) -> Result<ProbeOutcome> {
    for attempt in 1..=max_attempts {
        if cancel.is_cancelled() {
            return Err(InstanceError::Cancelled);
        }

        match try_handshake(params).await {
            Ok(()) => {
                tracing::debug!(attempt, port = params.port, "database accepted handshake");
                return Ok(ProbeOutcome::Ready);
            }
            Err(e) if !is_transient(&e) => {
                return Err(InstanceError::Database(e));
            }
            Err(e) => {
                tracing::trace!(attempt, error = %e, "waiting for database");
            }
        }

        if attempt == max_attempts {
            break;
        }

        tokio::select! {
            () = cancel.cancelled() => return Err(InstanceError::Cancelled),
            () = tokio::time::sleep(CONNECT_RETRY_INTERVAL) => {}
        }
    }

    Ok(ProbeOutcome::TimedOut)
}

/// Whether a handshake failure is expected boot latency rather than a
/// configuration problem.
///
/// Errors without a server response (refused, reset, timeout) are
/// transient. Server-reported errors are transient only for the
/// availability SQLSTATEs a booting postgres emits: `57P03` during crash
/// recovery and `53300` when the connection slots are still saturated.
fn is_transient(e: &tokio_postgres::Error) -> bool {
    match e.as_db_error() {
        None => true,
        Some(db) => {
            db.code() == &SqlState::CANNOT_CONNECT_NOW
                || db.code() == &SqlState::TOO_MANY_CONNECTIONS
        }
    }
}

/// One full handshake: authenticate and run a trivial query.
async fn try_handshake(params: &ConnectParams) -> std::result::Result<(), tokio_postgres::Error> {
    let mut config = tokio_postgres::Config::new();
    config
        .host(&params.host)
        .port(params.port)
        .user(&params.user)
        .password(params.password.expose_secret())
        .dbname(&params.db_name)
        .connect_timeout(CONNECT_ATTEMPT_TIMEOUT);

    let (client, connection) = config.connect(tokio_postgres::NoTls).await?;

    // The connection future must be polled for the client to make progress.
    let driver = tokio::spawn(connection);
    let result = client.simple_query("SELECT 1").await.map(|_| ());
    drop(client);
    driver.abort();

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::acquire_ephemeral_port;
    use crate::testing::FakeRuntime;

    const MARKER_LINE: &[u8] = b"LOG:  database system is ready to accept connections\n";

    fn params(port: u16) -> ConnectParams {
        ConnectParams {
            host: "127.0.0.1".to_string(),
            port,
            db_name: "foo".to_string(),
            user: "bar".to_string(),
            password: SecretString::from("baz"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_ready_after_second_marker() {
        let runtime = FakeRuntime::new();
        let id = runtime.add_container("test1");
        runtime.push_logs(&id, MARKER_LINE);
        runtime.push_logs(&id, MARKER_LINE);

        let outcome = wait_for_log_ready(
            &runtime,
            &id,
            Duration::from_secs(10),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert!(outcome.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_marker_is_a_false_positive() {
        let runtime = FakeRuntime::new();
        let id = runtime.add_container("test1");
        runtime.push_logs(&id, MARKER_LINE);

        let outcome = wait_for_log_ready(
            &runtime,
            &id,
            Duration::from_secs(2),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_ready_when_marker_appears_mid_wait() {
        let runtime = std::sync::Arc::new(FakeRuntime::new());
        let id = runtime.add_container("test1");
        runtime.push_logs(&id, MARKER_LINE);

        let waiter = {
            let runtime = runtime.clone();
            let id = id.clone();
            async move {
                wait_for_log_ready(
                    runtime.as_ref(),
                    &id,
                    Duration::from_secs(10),
                    &CancellationToken::new(),
                )
                .await
            }
        };
        let pusher = async {
            tokio::time::sleep(Duration::from_millis(350)).await;
            runtime.push_logs(&id, MARKER_LINE);
        };

        let (outcome, ()) = tokio::join!(waiter, pusher);
        assert!(outcome.unwrap().is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_probe_checks_once_with_zero_timeout() {
        let runtime = FakeRuntime::new();
        let id = runtime.add_container("test1");
        runtime.push_logs(&id, MARKER_LINE);
        runtime.push_logs(&id, MARKER_LINE);

        let outcome =
            wait_for_log_ready(&runtime, &id, Duration::ZERO, &CancellationToken::new())
                .await
                .unwrap();

        assert!(outcome.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_probe_errors_on_missing_container() {
        let runtime = FakeRuntime::new();

        let err = wait_for_log_ready(
            &runtime,
            "gone",
            Duration::from_secs(1),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, InstanceError::InstanceNotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_probe_honors_cancellation() {
        let runtime = FakeRuntime::new();
        let id = runtime.add_container("test1");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_log_ready(&runtime, &id, Duration::from_secs(10), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, InstanceError::Cancelled));
    }

    /// Minimal scripted server: accepts connections, reads the startup
    /// message, and answers every one with a postgres `ErrorResponse`
    /// frame carrying the given SQLSTATE.
    async fn spawn_pg_error_server(sqlstate: &'static str) -> u16 {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut startup = [0u8; 512];
                let _ = socket.read(&mut startup).await;

                let mut body = Vec::new();
                body.push(b'S');
                body.extend_from_slice(b"FATAL\0");
                body.push(b'C');
                body.extend_from_slice(sqlstate.as_bytes());
                body.push(0);
                body.push(b'M');
                body.extend_from_slice(b"scripted error\0");
                body.push(0);

                let mut frame = vec![b'E'];
                frame.extend_from_slice(&(body.len() as u32 + 4).to_be_bytes());
                frame.extend_from_slice(&body);
                let _ = socket.write_all(&frame).await;
            }
        });

        port
    }

    #[tokio::test]
    async fn test_server_starting_up_is_retried() {
        // 57P03: the server answers the handshake but is still in its
        // recovery window. The probe must keep trying, not bail out.
        let port = spawn_pg_error_server("57P03").await;

        let outcome = wait_for_connectable(&params(port), 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_connection_slots_saturated_is_retried() {
        let port = spawn_pg_error_server("53300").await;

        let outcome = wait_for_connectable(&params(port), 1, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_auth_failure_surfaces_immediately() {
        // 28P01: bad password. A configuration problem, never retried.
        let port = spawn_pg_error_server("28P01").await;

        let err = wait_for_connectable(&params(port), 10, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            InstanceError::Database(e) => {
                assert_eq!(e.as_db_error().unwrap().code(), &SqlState::INVALID_PASSWORD);
            }
            other => panic!("expected Database error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_database_surfaces_immediately() {
        let port = spawn_pg_error_server("3D000").await;

        let err = wait_for_connectable(&params(port), 10, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, InstanceError::Database(_)));
    }

    #[tokio::test]
    async fn test_connect_probe_times_out_against_closed_port() {
        // A port that was just free and released is almost certainly closed.
        let port = acquire_ephemeral_port().unwrap();

        let outcome = wait_for_connectable(&params(port), 2, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[tokio::test]
    async fn test_connect_probe_honors_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = wait_for_connectable(&params(5432), 10, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, InstanceError::Cancelled));
    }

    #[tokio::test]
    async fn test_connect_probe_zero_attempts_times_out() {
        let outcome = wait_for_connectable(&params(5432), 0, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, ProbeOutcome::TimedOut);
    }

    #[test]
    fn test_marker_matches_postgres_log_line() {
        let line = String::from_utf8_lossy(MARKER_LINE);
        assert!(line.contains(READY_MARKER));
    }
}
