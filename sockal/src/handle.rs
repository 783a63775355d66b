//! Ownership of native socket handles.

use std::fmt::Debug;
use std::io;
use std::time::Duration;

use socket2::Socket as NativeSocket;

use crate::error::{NativeError, SocketError};
use crate::subsystem::NetworkingSubsystem;
use crate::sys;

/// Exclusive owner of one native socket plus the state every socket kind shares.
///
/// A default handle is invalid and holds no operating system resource. Handles cannot be cloned;
/// moving one transfers the native socket, and [`take`](Self::take) leaves an invalid handle behind.
///
/// Dropping a valid handle shuts the socket down and closes it. If closing fails at that point the
/// handle bookkeeping is broken beyond repair and the process is aborted.
#[derive(Debug)]
pub struct SocketHandle {
    socket: Option<NativeSocket>,
    last_native_error: NativeError,
    is_blocking: bool,
}

impl Default for SocketHandle {
    fn default() -> Self {
        Self {
            socket: None,
            last_native_error: 0,
            is_blocking: true,
        }
    }
}

impl SocketHandle {
    /// Returns `true` while the handle owns a native socket.
    pub fn is_valid(&self) -> bool {
        self.socket.is_some()
    }

    /// Returns the native error code of the last failed syscall, `0` if the last operation succeeded.
    pub fn last_native_error(&self) -> NativeError {
        self.last_native_error
    }

    /// Returns whether I/O on this handle blocks.
    pub fn is_blocking(&self) -> bool {
        self.is_blocking
    }

    /// Moves the native socket and its state out, leaving an invalid handle behind.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    /// Shuts the socket down and closes it.
    ///
    /// The handle is invalid afterwards even if a syscall failed. A failed shutdown is only
    /// recorded, since it also fails for sockets that never connected or whose peer is gone.
    pub fn close(&mut self) -> Result<(), SocketError> {
        let Some(socket) = self.socket.take() else {
            return Err(SocketError::NotOpen);
        };
        self.last_native_error = 0;
        self.is_blocking = true;

        if let Err(error) = sys::shutdown(&socket) {
            self.record(&error);
        }

        match sys::close(socket) {
            Ok(()) => {
                tracing::debug!("socket closed");
                Ok(())
            }
            Err(error) => {
                let native_error = self.record(&error);
                tracing::warn!(native_error, "closing socket failed");
                Err(SocketError::Other)
            }
        }
    }

    /// Switches between blocking and non-blocking I/O.
    ///
    /// The cached mode only changes if the syscall succeeds.
    pub fn set_blocking_mode(&mut self, blocking: bool) -> Result<(), SocketError> {
        let socket = self.socket.as_ref().ok_or(SocketError::NotOpen)?;
        match sys::set_non_blocking(socket, !blocking) {
            Ok(()) => {
                self.is_blocking = blocking;
                self.clear_error();
                Ok(())
            }
            Err(error) => {
                let native_error = self.record(&error);
                tracing::warn!(native_error, blocking, "changing blocking mode failed");
                Err(SocketError::Other)
            }
        }
    }

    /// Sets the receive timeout for subsequent blocking receives.
    ///
    /// [`Duration::ZERO`] removes the timeout, so receives block until data arrives.
    /// Shorter non-zero timeouts than the platform supports are rounded up to its resolution.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), SocketError> {
        let socket = self.socket.as_ref().ok_or(SocketError::NotOpen)?;
        let timeout = (!timeout.is_zero()).then_some(timeout);
        match sys::set_timeout(socket, timeout) {
            Ok(()) => {
                self.clear_error();
                Ok(())
            }
            Err(error) => {
                let native_error = self.record(&error);
                tracing::warn!(native_error, ?timeout, "setting receive timeout failed");
                Err(SocketError::Other)
            }
        }
    }

    pub(crate) fn socket(&self) -> Option<&NativeSocket> {
        self.socket.as_ref()
    }

    pub(crate) fn raw(&self) -> Option<sys::RawHandle> {
        self.socket.as_ref().map(sys::raw_handle)
    }

    /// Takes ownership of a freshly created or accepted socket, which is always blocking.
    pub(crate) fn install(&mut self, socket: NativeSocket) {
        debug_assert!(self.socket.is_none(), "installing over a valid handle");
        self.socket = Some(socket);
        self.is_blocking = true;
        self.last_native_error = 0;
    }

    /// Stores the native code of `error` and returns it.
    pub(crate) fn record(&mut self, error: &io::Error) -> NativeError {
        self.last_native_error = error.raw_os_error().unwrap_or(0);
        self.last_native_error
    }

    pub(crate) fn clear_error(&mut self) {
        self.last_native_error = 0;
    }

    /// Closes the socket without shutting it down, used once the peer already did.
    pub(crate) fn release(&mut self) {
        if let Some(socket) = self.socket.take() {
            self.is_blocking = true;
            if let Err(error) = sys::close(socket) {
                let native_error = self.record(&error);
                tracing::warn!(native_error, "releasing socket failed");
            }
        }
    }

    /// Makes sure `subsystem` is usable before the first syscall.
    ///
    /// Sockets pass [`NetworkingSubsystem::global`] outside of tests.
    pub(crate) fn ensure_networking(
        &mut self,
        subsystem: &NetworkingSubsystem,
    ) -> Result<(), SocketError> {
        subsystem.initialize_if_not_already().map_err(|error| {
            self.record(&error);
            SocketError::NetworkingInitFailed
        })
    }

    /// Maps a failed receive or accept syscall to the portable taxonomy.
    ///
    /// "Would block" only counts as [`SocketError::WouldBlock`] in non-blocking mode; in blocking
    /// mode the same code means a configured timeout elapsed.
    pub(crate) fn classify_receive_error(&mut self, error: &io::Error) -> SocketError {
        let native_error = self.record(error);
        if !self.is_blocking && sys::is_would_block_error(native_error) {
            SocketError::WouldBlock
        } else if sys::is_timeout_error(native_error) {
            SocketError::Timeout
        } else {
            tracing::warn!(native_error, %error, "receive failed");
            SocketError::Other
        }
    }
}

impl Drop for SocketHandle {
    fn drop(&mut self) {
        let Some(socket) = self.socket.take() else {
            return;
        };

        // Fails for sockets that are not connected, which is fine to ignore here.
        let _ = sys::shutdown(&socket);

        if let Err(error) = sys::close(socket) {
            tracing::error!(
                native_error = error.raw_os_error(),
                %error,
                "closing a socket handle on drop failed"
            );
            std::process::abort();
        }
    }
}

/// Behavior shared by every socket kind.
///
/// Implementors only expose their [`SocketHandle`]; the provided methods forward to it.
pub trait Socket: Debug {
    /// Returns the handle owning the native socket.
    fn handle(&self) -> &SocketHandle;

    /// Returns the handle owning the native socket.
    fn handle_mut(&mut self) -> &mut SocketHandle;

    /// See [`SocketHandle::set_blocking_mode`].
    fn set_blocking_mode(&mut self, blocking: bool) -> Result<(), SocketError> {
        self.handle_mut().set_blocking_mode(blocking)
    }

    /// See [`SocketHandle::is_blocking`].
    fn is_blocking(&self) -> bool {
        self.handle().is_blocking()
    }

    /// See [`SocketHandle::set_timeout`].
    fn set_timeout(&mut self, timeout: Duration) -> Result<(), SocketError> {
        self.handle_mut().set_timeout(timeout)
    }

    /// See [`SocketHandle::last_native_error`].
    fn last_native_error(&self) -> NativeError {
        self.handle().last_native_error()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use socket2::{Domain, Socket as NativeSocket, Type};

    use super::SocketHandle;
    use crate::error::SocketError;

    fn udp_handle() -> SocketHandle {
        let mut handle = SocketHandle::default();
        handle.install(NativeSocket::new(Domain::IPV4, Type::DGRAM, None).unwrap());
        handle
    }

    #[test]
    fn default_handle_is_invalid() {
        let mut handle = SocketHandle::default();
        assert!(!handle.is_valid());
        assert!(handle.is_blocking());
        assert_eq!(handle.last_native_error(), 0);
        assert_eq!(handle.close(), Err(SocketError::NotOpen));
        assert_eq!(handle.set_blocking_mode(false), Err(SocketError::NotOpen));
        assert_eq!(
            handle.set_timeout(Duration::from_millis(10)),
            Err(SocketError::NotOpen)
        );
    }

    #[test]
    fn close_invalidates() {
        let mut handle = udp_handle();
        assert!(handle.is_valid());
        assert_eq!(handle.close(), Ok(()));
        assert!(!handle.is_valid());
        assert_eq!(handle.close(), Err(SocketError::NotOpen));
    }

    #[test]
    fn take_moves_ownership() {
        let mut source = udp_handle();
        source.set_blocking_mode(false).unwrap();

        let target = source.take();
        assert!(target.is_valid());
        assert!(!target.is_blocking());
        assert!(!source.is_valid());
        assert!(source.is_blocking());
    }

    #[test]
    fn blocking_mode_is_cached() {
        let mut handle = udp_handle();
        handle.set_blocking_mode(false).unwrap();
        assert!(!handle.is_blocking());
        handle.set_blocking_mode(true).unwrap();
        assert!(handle.is_blocking());
    }

    #[test]
    fn zero_timeout_blocks_forever() {
        let mut handle = udp_handle();
        handle.set_timeout(Duration::from_millis(50)).unwrap();
        assert!(handle.socket().unwrap().read_timeout().unwrap().is_some());
        handle.set_timeout(Duration::ZERO).unwrap();
        assert_eq!(handle.socket().unwrap().read_timeout().unwrap(), None);
    }

    #[test]
    fn tiny_timeout_is_not_infinite() {
        let mut handle = udp_handle();
        handle.set_timeout(Duration::from_nanos(500)).unwrap();
        let timeout = handle.socket().unwrap().read_timeout().unwrap();
        assert!(timeout.is_some_and(|timeout| !timeout.is_zero()));
    }

    #[cfg(unix)]
    #[test]
    fn receive_errors_depend_on_blocking_mode() {
        use std::io;

        let would_block = io::Error::from_raw_os_error(libc::EWOULDBLOCK);
        let timed_out = io::Error::from_raw_os_error(libc::ETIMEDOUT);
        let reset = io::Error::from_raw_os_error(libc::ECONNRESET);

        let mut handle = udp_handle();
        assert_eq!(
            handle.classify_receive_error(&would_block),
            SocketError::Timeout
        );
        assert_eq!(handle.last_native_error(), libc::EWOULDBLOCK);

        handle.set_blocking_mode(false).unwrap();
        assert_eq!(
            handle.classify_receive_error(&would_block),
            SocketError::WouldBlock
        );
        assert_eq!(
            handle.classify_receive_error(&timed_out),
            SocketError::Timeout
        );
        assert_eq!(handle.classify_receive_error(&reset), SocketError::Other);
        assert_eq!(handle.last_native_error(), libc::ECONNRESET);
    }
}
