use crate::server::server::Error::{self, SocketBindError};
use socket2::{Domain, Protocol, Socket, Type};
use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener as StdTcpListener},
};
use tokio::net::{TcpListener, TcpStream};

const BACKLOG: i32 = 1024;

/// Binds a passive socket on all interfaces.
///
/// The IPv6 wildcard address is tried first with `IPV6_V6ONLY` cleared, so IPv4 clients are
/// accepted as well regardless of the host default. Only when the host cannot do IPv6 at all
/// does the bind fall back to `0.0.0.0`. Port `0` lets the OS pick an ephemeral port.
pub(crate) fn bind(port: u16) -> Result<StdTcpListener, Error> {
    let v6 = SocketAddr::from((Ipv6Addr::UNSPECIFIED, port));
    let listener = match Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP)) {
        Ok(socket) => match listen(socket, v6) {
            Ok(listener) => listener,
            Err(err) if ipv6_unavailable(&err) => bind_v4(port, &err)?,
            Err(err) => return Err(SocketBindError(v6, err)),
        },
        Err(err) => bind_v4(port, &err)?,
    };

    listener
        .set_nonblocking(true)
        .map_err(Error::SocketSetupError)?;

    Ok(listener)
}

fn bind_v4(port: u16, v6_err: &io::Error) -> Result<StdTcpListener, Error> {
    tracing::debug!("IPv6 is not available ({}), binding IPv4 only", v6_err);
    let v4 = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .and_then(|socket| listen(socket, v4))
        .map_err(|e| SocketBindError(v4, e))
}

fn listen(socket: Socket, addr: SocketAddr) -> io::Result<StdTcpListener> {
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    // matches std::net::TcpListener::bind on unix
    #[cfg(unix)]
    socket.set_reuse_address(true)?;

    socket.bind(&addr.into())?;
    socket.listen(BACKLOG)?;

    Ok(socket.into())
}

fn ipv6_unavailable(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::AddrNotAvailable | io::ErrorKind::Unsupported
    )
}

/// Registers a bound listener with the reactor of the current tokio runtime.
pub(crate) fn register(listener: StdTcpListener) -> Result<TcpListener, Error> {
    TcpListener::from_std(listener).map_err(Error::SocketSetupError)
}

/// Accepts one client connection.
pub(crate) async fn accept(listener: &TcpListener) -> io::Result<(TcpStream, SocketAddr)> {
    let (stream, remote_addr) = listener.accept().await?;
    if let Err(err) = stream.set_nodelay(true) {
        tracing::trace!("Cannot set TCP_NODELAY for {}: {}", remote_addr, err);
    }
    Ok((stream, remote_addr))
}
