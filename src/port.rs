//! Ephemeral port allocation for instance endpoints.

use std::net::TcpListener;

/// Obtain a free local TCP port from the OS.
///
/// Binds a throwaway listener to port 0 on the wildcard address (the
/// container's binding is wildcard too), reads back the assigned port, and
/// releases the socket immediately. This is inherently a check-then-use
/// race: another process may grab the port between release and the
/// container actually binding it. Best effort only, not a reservation.
pub fn acquire_ephemeral_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind(("0.0.0.0", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
