use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

use crate::error::ServerError;

/// Opens a non-blocking listening socket on `addr`.
///
/// With `linger` set, closing a connection waits up to a second for unsent
/// data to drain.
pub fn bind(addr: &str, linger: bool, backlog: i32) -> Result<TcpListener, ServerError> {
    let sock_addr = resolve(addr)?;
    let bind_err = |source| ServerError::Bind {
        addr: addr.to_string(),
        source,
    };

    let socket = Socket::new(Domain::for_address(sock_addr), Type::STREAM, Some(Protocol::TCP))
        .map_err(bind_err)?;
    socket.set_reuse_address(true).map_err(bind_err)?;
    if linger {
        socket
            .set_linger(Some(Duration::from_secs(1)))
            .map_err(bind_err)?;
    }
    socket.bind(&sock_addr.into()).map_err(bind_err)?;
    socket.listen(backlog).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;

    let listener: TcpListener = socket.into();
    info!(addr = %sock_addr, linger, backlog, "listening");
    Ok(listener)
}

fn resolve(addr: &str) -> Result<SocketAddr, ServerError> {
    addr.to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| ServerError::InvalidAddress(addr.to_string()))
}
