//! UDP datagram sockets.

use std::io::ErrorKind;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Type};

use crate::address::{self, Endpoint};
use crate::error::SocketError;
use crate::handle::{Socket, SocketHandle};
use crate::options::SocketOptions;
use crate::subsystem::NetworkingSubsystem;
use crate::sys;

/// A connectionless datagram socket.
///
/// Every datagram is addressed individually. Opening with port `0` skips binding; the operating
/// system then assigns an ephemeral port with the first datagram sent.
#[derive(Debug, Default)]
pub struct UdpSocket {
    handle: SocketHandle,
    options: SocketOptions,
}

impl UdpSocket {
    /// Creates a closed socket with default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a closed socket with the given options.
    pub fn with_options(options: SocketOptions) -> Self {
        Self {
            handle: SocketHandle::default(),
            options,
        }
    }

    /// Creates the socket and binds it to `port` on [`SocketOptions::bind_address`] unless `port` is `0`.
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
        let socket = socket2::Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| {
                let native_error = self.handle.record(&error);
                tracing::warn!(native_error, %error, "creating socket failed");
                SocketError::Other
            })?;

        if port != 0
            && let Err(error) = socket.bind(&address::to_native(&local))
        {
            let native_error = self.handle.record(&error);
            tracing::warn!(native_error, %error, "bind failed");
            return Err(SocketError::BindFailed);
        }

        self.handle.install(socket);
        tracing::debug!("opened");
        Ok(())
    }

    /// Closes the socket.
    pub fn close(&mut self) -> Result<(), SocketError> {
        self.handle.close()
    }

    /// Returns `true` while the socket is open.
    pub fn is_open(&self) -> bool {
        self.handle.is_valid()
    }

    /// Returns the bound address and port.
    ///
    /// An unbound socket reports an unspecified address and port `0` until its first send.
    pub fn local_endpoint(&self) -> Result<Endpoint, SocketError> {
        let socket = self.handle.socket().ok_or(SocketError::NotOpen)?;
        let native = socket.local_addr().map_err(|_| SocketError::Other)?;
        address::from_native(&native).ok_or(SocketError::Other)
    }

    /// Sends `data` as one datagram to `endpoint`.
    pub fn send_to(&mut self, endpoint: Endpoint, data: impl AsRef<[u8]>) -> Result<(), SocketError> {
        let data = data.as_ref();
        let socket = self.handle.socket().ok_or(SocketError::NotOpen)?;

        let result = loop {
            match socket.send_to(data, &address::to_native(&endpoint)) {
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                result => break result,
            }
        };

        match result {
            Ok(count) => {
                tracing::trace!(count, %endpoint, "sent datagram");
                self.handle.clear_error();
                Ok(())
            }
            Err(error) => {
                let native_error = self.handle.record(&error);
                tracing::warn!(native_error, %error, %endpoint, "send failed");
                Err(SocketError::SendFailed)
            }
        }
    }

    /// Receives one datagram into `buffer`, returning its length and sender.
    ///
    /// A datagram longer than `buffer` is truncated.
    pub fn recv_from(&mut self, buffer: &mut [u8]) -> Result<(usize, Endpoint), SocketError> {
        let Some(socket) = self.handle.socket() else {
            return Err(SocketError::NotOpen);
        };

        let (count, native) = loop {
            match sys::recv_from(socket, buffer) {
                Ok(received) => break received,
                Err(error) if error.kind() == ErrorKind::Interrupted => {}
                Err(error) => return Err(self.handle.classify_receive_error(&error)),
            }
        };

        let Some(sender) = address::from_native(&native) else {
            tracing::warn!("datagram from an unsupported address family");
            return Err(SocketError::Other);
        };

        tracing::trace!(count, %sender, "received datagram");
        self.handle.clear_error();
        Ok((count, sender))
    }
}

impl Socket for UdpSocket {
    fn handle(&self) -> &SocketHandle {
        &self.handle
    }

    fn handle_mut(&mut self) -> &mut SocketHandle {
        &mut self.handle
    }
}
