//! TCP listeners.

use std::io::ErrorKind;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Type};

use crate::address::{self, Endpoint};
use crate::error::SocketError;
use crate::handle::{Socket, SocketHandle};
use crate::net::tcp::TcpSocket;
use crate::options::SocketOptions;
use crate::subsystem::NetworkingSubsystem;
use crate::sys;

/// A listening TCP socket.
///
/// Binds to [`SocketOptions::bind_address`], which defaults to the loopback interface. Accepted
/// connections inherit this server's options.
#[derive(Debug, Default)]
pub struct TcpServerSocket {
    handle: SocketHandle,
    options: SocketOptions,
}

impl TcpServerSocket {
    /// Creates a closed server with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a closed server with the given options.
    pub fn with_options(options: SocketOptions) -> Self {
        Self {
            handle: SocketHandle::default(),
            options,
        }
    }

    /// Binds to `port` and starts listening.
    ///
    /// Port `0` lets the operating system pick a free port, see
    /// [`local_endpoint`](Self::local_endpoint).
    #[tracing::instrument(level = "debug", skip(self), fields(bind_address = %self.options.bind_address))]
    pub fn open(&mut self, port: u16) -> Result<(), SocketError> {
        self.open_with(port, NetworkingSubsystem::global())
    }

    pub(crate) fn open_with(
        &mut self,
        port: u16,
        subsystem: &NetworkingSubsystem,
    ) -> Result<(), SocketError> {
        if self.is_open() {
            return Err(SocketError::AlreadyOpen);
        }
        self.handle.ensure_networking(subsystem)?;

        let local = SocketAddr::new(self.options.bind_address, port);
        let socket = socket2::Socket::new(Domain::for_address(local), Type::STREAM, Some(Protocol::TCP))
            .map_err(|error| {
                let native_error = self.handle.record(&error);
                tracing::warn!(native_error, %error, "creating socket failed");
                SocketError::Other
            })?;

        if let Err(error) = sys::prepare_listener(&socket) {
            let native_error = self.handle.record(&error);
            tracing::warn!(native_error, %error, "configuring listener failed");
        }

        if let Err(error) = socket.bind(&address::to_native(&local)) {
            let native_error = self.handle.record(&error);
            tracing::warn!(native_error, %error, "bind failed");
            return Err(SocketError::BindFailed);
        }

        let backlog = i32::try_from(self.options.backlog).unwrap_or(i32::MAX);
        if let Err(error) = socket.listen(backlog) {
            let native_error = self.handle.record(&error);
            tracing::warn!(native_error, %error, backlog, "listen failed");
            return Err(SocketError::ListenFailed);
        }

        self.handle.install(socket);
        tracing::debug!(local = ?self.local_endpoint().ok(), "listening");
        Ok(())
    }

    /// Stops listening.
    pub fn close(&mut self) -> Result<(), SocketError> {
        self.handle.close()
    }

    /// Returns `true` while listening.
    pub fn is_open(&self) -> bool {
        self.handle.is_valid()
    }

    /// Returns the address and port the server listens on.
    pub fn local_endpoint(&self) -> Result<Endpoint, SocketError> {
        let socket = self.handle.socket().ok_or(SocketError::NotOpen)?;
        let native = socket.local_addr().map_err(|_| SocketError::Other)?;
        address::from_native(&native).ok_or(SocketError::Other)
    }

    /// Waits for the next incoming connection.
    ///
    /// Blocks unless the server is in non-blocking mode, in which case
    /// [`SocketError::WouldBlock`] reports that no connection is pending.
    pub fn accept(&mut self) -> Result<(TcpSocket, Endpoint), SocketError> {
        let Some(listener) = self.handle.socket() else {
            return Err(SocketError::NotOpen);
        };

        let (socket, native) = loop {
            match listener.accept() {
                Ok(accepted) => break accepted,
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(self.handle.classify_receive_error(&error)),
            }
        };

        // Windows and the BSDs hand out accepted sockets in the listener's blocking mode.
        if !self.handle.is_blocking()
            && let Err(error) = sys::set_non_blocking(&socket, false)
        {
            let native_error = self.handle.record(&error);
            tracing::warn!(native_error, %error, "making accepted socket blocking failed");
        }

        let Some(peer) = address::from_native(&native) else {
            tracing::warn!("accepted connection from an unsupported address family");
            return Err(SocketError::Other);
        };

        self.handle.clear_error();
        tracing::debug!(%peer, "accepted");
        Ok((TcpSocket::from_accepted(socket, self.options.clone()), peer))
    }
}

impl Socket for TcpServerSocket {
    fn handle(&self) -> &SocketHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut SocketHandle {
        &mut self.handle
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, TcpStream};

    use pretty_assertions::assert_eq;

    use super::TcpServerSocket;
    use crate::error::SocketError;
    use crate::options::SocketOptions;
    use crate::subsystem::subsystem_failing_once;

    #[test]
    fn closed_server_rejects_operations() {
        let mut server = TcpServerSocket::new();
        assert!(!server.is_open());
        assert_eq!(server.close(), Err(SocketError::NotOpen));
        assert_eq!(server.local_endpoint(), Err(SocketError::NotOpen));
        assert!(matches!(server.accept(), Err(SocketError::NotOpen)));
    }

    #[test]
    fn accepts_std_client() {
        let mut server = TcpServerSocket::new();
        server.open(0).unwrap();
        let local = server.local_endpoint().unwrap();
        assert_eq!(local.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_ne!(local.port(), 0);
        assert_eq!(server.open(0), Err(SocketError::AlreadyOpen));

        let client = TcpStream::connect(local).unwrap();
        let (accepted, peer) = server.accept().unwrap();
        assert!(accepted.is_accepted());
        assert_eq!(peer, client.local_addr().unwrap());
        assert_eq!(accepted.peer_endpoint(), Ok(peer));
    }

    #[test]
    fn bind_conflict_is_reported() {
        let mut first = TcpServerSocket::new();
        first.open(0).unwrap();
        let port = first.local_endpoint().unwrap().port();

        let mut second = TcpServerSocket::new();
        assert_eq!(second.open(port), Err(SocketError::BindFailed));
        assert!(!second.is_open());
        assert_ne!(second.handle.last_native_error(), 0);
    }

    #[test]
    fn unavailable_bind_address_is_reported() {
        // TEST-NET-1 is never assigned to a local interface.
        let mut server = TcpServerSocket::with_options(SocketOptions {
            bind_address: IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1)),
            ..SocketOptions::default()
        });
        assert_eq!(server.open(0), Err(SocketError::BindFailed));
    }

    #[test]
    fn failed_networking_startup_is_retried_on_open() {
        let subsystem = subsystem_failing_once!(10091);

        let mut server = TcpServerSocket::new();
        assert_eq!(
            server.open_with(0, &subsystem),
            Err(SocketError::NetworkingInitFailed)
        );
        assert_eq!(server.handle.last_native_error(), 10091);
        assert!(!server.is_open());

        server.open_with(0, &subsystem).unwrap();
        assert!(server.is_open());
        assert_eq!(server.handle.last_native_error(), 0);
    }
}
