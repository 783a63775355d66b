//! TCP client connections.

use std::io::ErrorKind;

use socket2::{Protocol, SockAddr, Type};

use crate::address::{self, Endpoint, HostPort};
use crate::error::{ReceiveError, SocketError};
use crate::handle::{Socket, SocketHandle};
use crate::options::SocketOptions;
use crate::subsystem::NetworkingSubsystem;
use crate::sys;

/// A TCP connection, either connected by this side or accepted from a [`TcpServerSocket`].
///
/// Starts disconnected. An orderly shutdown by the peer observed during a receive closes the local
/// side as well, after which the socket is disconnected again and can be reused for a new
/// connection.
///
/// [`TcpServerSocket`]: crate::TcpServerSocket
#[derive(Debug, Default)]
pub struct TcpSocket {
    handle: SocketHandle,
    options: SocketOptions,
    accepted: bool,
}

impl TcpSocket {
    /// Creates a disconnected socket with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a disconnected socket with the given options.
    pub fn with_options(options: SocketOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub(crate) fn from_accepted(socket: socket2::Socket, options: SocketOptions) -> Self {
        let mut handle = SocketHandle::default();
        handle.install(socket);
        Self {
            handle,
            options,
            accepted: true,
        }
    }

    /// Resolves `host` and connects to the first candidate that accepts the connection.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), SocketError> {
        if self.is_connected() {
            return Err(SocketError::AlreadyConnected);
        }
        self.handle.ensure_networking(NetworkingSubsystem::global())?;

        let candidates = address::resolve(host, port).map_err(|error| {
            let native_error = self.handle.record(&error);
            tracing::warn!(native_error, %error, "resolving host failed");
            SocketError::HostNotResolved
        })?;
        if candidates.is_empty() {
            tracing::warn!("host resolved to no addresses");
            return Err(SocketError::HostNotResolved);
        }

        let mut result = Err(SocketError::ConnectFailed);
        for candidate in candidates {
            result = self.connect_native(&address::to_native(&candidate));
            if result.is_ok() {
                break;
            }
        }
        result
    }

    /// Connects to an already resolved endpoint.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn connect_endpoint(&mut self, endpoint: Endpoint) -> Result<(), SocketError> {
        self.connect_endpoint_with(endpoint, NetworkingSubsystem::global())
    }

    pub(crate) fn connect_endpoint_with(
        &mut self,
        endpoint: Endpoint,
        subsystem: &NetworkingSubsystem,
    ) -> Result<(), SocketError> {
        if self.is_connected() {
            return Err(SocketError::AlreadyConnected);
        }
        self.handle.ensure_networking(subsystem)?;
        self.connect_native(&address::to_native(&endpoint))
    }

    /// Connects to a parsed `host:port`, see [`connect`](Self::connect).
    pub fn connect_to(&mut self, target: &HostPort) -> Result<(), SocketError> {
        self.connect(target.host(), target.port())
    }

    fn connect_native(&mut self, native: &SockAddr) -> Result<(), SocketError> {
        let socket = socket2::Socket::new(native.domain(), Type::STREAM, Some(Protocol::TCP))
            .map_err(|error| {
                let native_error = self.handle.record(&error);
                tracing::warn!(native_error, %error, "creating socket failed");
                SocketError::Other
            })?;

        if let Err(error) = socket.connect(native) {
            let native_error = self.handle.record(&error);
            tracing::warn!(native_error, %error, peer = ?address::from_native(native), "connect failed");
            return Err(SocketError::ConnectFailed);
        }

        tracing::debug!(peer = ?address::from_native(native), "connected");
        self.handle.install(socket);
        self.accepted = false;
        Ok(())
    }

    /// Shuts the connection down and closes it.
    pub fn disconnect(&mut self) -> Result<(), SocketError> {
        if !self.is_connected() {
            return Err(SocketError::NotConnected);
        }
        self.accepted = false;
        // Reports a failed close, the handle is invalid either way.
        self.handle.close()
    }

    /// Returns `true` while the socket owns a connection.
    pub fn is_connected(&self) -> bool {
        self.handle.is_valid()
    }

    /// Returns `true` if the current connection was produced by [`TcpServerSocket::accept`].
    ///
    /// [`TcpServerSocket::accept`]: crate::TcpServerSocket::accept
    pub fn is_accepted(&self) -> bool {
        self.accepted && self.is_connected()
    }

    /// Returns the endpoint of the remote side.
    pub fn peer_endpoint(&self) -> Result<Endpoint, SocketError> {
        let socket = self.handle.socket().ok_or(SocketError::NotConnected)?;
        let native = socket.peer_addr().map_err(|_| SocketError::Other)?;
        address::from_native(&native).ok_or(SocketError::Other)
    }

    /// Returns the endpoint of the local side.
    pub fn local_endpoint(&self) -> Result<Endpoint, SocketError> {
        let socket = self.handle.socket().ok_or(SocketError::NotConnected)?;
        let native = socket.local_addr().map_err(|_| SocketError::Other)?;
        address::from_native(&native).ok_or(SocketError::Other)
    }

    /// Sends all of `data`.
    ///
    /// Retries until the kernel accepted every byte. There is no partial success: if any send call
    /// fails the whole operation reports [`SocketError::SendFailed`], even though a prefix of `data`
    /// may already be on its way.
    pub fn send(&mut self, data: impl AsRef<[u8]>) -> Result<(), SocketError> {
        let data = data.as_ref();
        let socket = self.handle.socket().ok_or(SocketError::NotConnected)?;

        let mut sent = 0;
        let result = loop {
            if sent == data.len() {
                break Ok(());
            }
            match sys::send(socket, &data[sent..]) {
                Ok(0) => break Err(None),
                Ok(count) => {
                    tracing::trace!(count, "sent");
                    sent += count;
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => break Err(Some(error)),
            }
        };

        match result {
            Ok(()) => {
                self.handle.clear_error();
                Ok(())
            }
            Err(error) => {
                let native_error = error.map_or(0, |error| self.handle.record(&error));
                tracing::warn!(native_error, sent, total = data.len(), "send failed");
                Err(SocketError::SendFailed)
            }
        }
    }

    /// Receives exactly `buffer.len()` bytes.
    ///
    /// On failure the returned [`ReceiveError`] tells how many bytes at the start of `buffer` did
    /// arrive. If the peer closed the connection the local side is closed too and the error kind is
    /// [`SocketError::ConnectionClosed`]. If the peer closed right after the last requested byte the
    /// receive still succeeds, and the next one reports [`SocketError::NotConnected`].
    pub fn receive(&mut self, buffer: &mut [u8]) -> Result<usize, ReceiveError> {
        let Some(socket) = self.handle.socket() else {
            return Err(ReceiveError::new(SocketError::NotConnected, 0));
        };

        let mut received = 0;
        while received < buffer.len() {
            match sys::recv(socket, &mut buffer[received..]) {
                Ok(0) => {
                    tracing::debug!(received, "connection closed by peer");
                    self.close_after_peer();
                    return Err(ReceiveError::new(SocketError::ConnectionClosed, received));
                }
                Ok(count) => {
                    tracing::trace!(count, "received");
                    received += count;
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => {
                    let kind = self.handle.classify_receive_error(&error);
                    return Err(ReceiveError::new(kind, received));
                }
            }
        }

        if sys::peer_closed(socket) {
            tracing::debug!(received, "connection closed by peer after complete receive");
            self.close_after_peer();
        } else {
            self.handle.clear_error();
        }
        Ok(received)
    }

    /// Receives exactly `size` bytes into `buffer`, replacing its contents.
    ///
    /// On failure `buffer` holds the bytes that did arrive.
    pub fn receive_into(&mut self, buffer: &mut Vec<u8>, size: usize) -> Result<(), ReceiveError> {
        buffer.clear();
        buffer.resize(size, 0);
        match self.receive(buffer) {
            Ok(received) => {
                buffer.truncate(received);
                Ok(())
            }
            Err(error) => {
                buffer.truncate(error.received);
                Err(error)
            }
        }
    }

    /// Returns whatever arrived so far with a single receive call, blocking only if nothing did.
    ///
    /// At most [`SocketOptions::receive_once_capacity`] bytes are returned.
    pub fn receive_once(&mut self) -> Result<Vec<u8>, SocketError> {
        let Some(socket) = self.handle.socket() else {
            return Err(SocketError::NotConnected);
        };

        let mut buffer = vec![0; self.options.receive_once_capacity.max(1)];
        loop {
            match sys::recv(socket, &mut buffer) {
                Ok(0) => {
                    tracing::debug!("connection closed by peer");
                    self.close_after_peer();
                    return Err(SocketError::ConnectionClosed);
                }
                Ok(count) => {
                    tracing::trace!(count, "received");
                    buffer.truncate(count);
                    self.handle.clear_error();
                    return Ok(buffer);
                }
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(self.handle.classify_receive_error(&error)),
            }
        }
    }

    fn close_after_peer(&mut self) {
        self.handle.release();
        self.accepted = false;
    }
}

impl Socket for TcpSocket {
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
    use std::net::{Ipv4Addr, SocketAddr, TcpListener};

    use pretty_assertions::assert_eq;
    use socket2::{Domain, Protocol, Type};

    use super::TcpSocket;
    use crate::address;
    use crate::error::{ReceiveError, SocketError};
    use crate::handle::Socket;
    use crate::options::SocketOptions;
    use crate::subsystem::subsystem_failing_once;

    #[test]
    fn fresh_socket_is_disconnected() {
        let mut socket = TcpSocket::new();
        assert!(!socket.is_connected());
        assert!(!socket.is_accepted());
        assert_eq!(socket.disconnect(), Err(SocketError::NotConnected));
        assert_eq!(socket.send(b"x"), Err(SocketError::NotConnected));
        assert_eq!(
            socket.receive(&mut [0; 4]),
            Err(ReceiveError::new(SocketError::NotConnected, 0))
        );
        assert_eq!(socket.receive_once(), Err(SocketError::NotConnected));
        assert_eq!(socket.peer_endpoint(), Err(SocketError::NotConnected));
    }

    #[test]
    fn connects_to_std_listener() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let endpoint = listener.local_addr().unwrap();

        let mut socket = TcpSocket::new();
        socket.connect_endpoint(endpoint).unwrap();
        assert!(socket.is_connected());
        assert!(!socket.is_accepted());
        assert_eq!(socket.peer_endpoint(), Ok(endpoint));
        assert_eq!(socket.last_native_error(), 0);
        assert_eq!(
            socket.connect_endpoint(endpoint),
            Err(SocketError::AlreadyConnected)
        );
    }

    #[test]
    fn connect_by_name_tries_candidates() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut socket = TcpSocket::new();
        socket.connect("127.0.0.1", port).unwrap();
        assert!(socket.is_connected());
    }

    #[test]
    fn accepted_flag_follows_connection() {
        let listener = socket2::Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        let any: SocketAddr = (Ipv4Addr::LOCALHOST, 0).into();
        listener.bind(&address::to_native(&any)).unwrap();
        listener.listen(1).unwrap();
        let endpoint = address::from_native(&listener.local_addr().unwrap()).unwrap();

        let mut client = TcpSocket::new();
        client.connect_endpoint(endpoint).unwrap();
        let (accepted, _) = listener.accept().unwrap();

        let mut server_side = TcpSocket::from_accepted(accepted, SocketOptions::default());
        assert!(server_side.is_accepted());
        server_side.disconnect().unwrap();
        assert!(!server_side.is_accepted());
    }

    #[test]
    fn failed_networking_startup_is_retried_on_connect() {
        let subsystem = subsystem_failing_once!(10050);
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let endpoint = listener.local_addr().unwrap();

        let mut socket = TcpSocket::new();
        assert_eq!(
            socket.connect_endpoint_with(endpoint, &subsystem),
            Err(SocketError::NetworkingInitFailed)
        );
        assert_eq!(socket.last_native_error(), 10050);
        assert!(!socket.is_connected());

        socket.connect_endpoint_with(endpoint, &subsystem).unwrap();
        assert!(socket.is_connected());
        assert_eq!(socket.last_native_error(), 0);
    }
}
