//! The unified error model shared by every socket kind.

/// Raw error code reported by the operating system for the last failed socket call.
///
/// This is `errno` on Unix and the WinSock error code on Windows. `0` means no error was recorded.
pub type NativeError = i32;

/// Numeric code that stands for a successful operation, see [`SocketError::code`].
pub const SUCCESS_CODE: u8 = 0;

/// Portable classification of a failed socket operation.
///
/// Native error codes differ between platforms, so every operation reports one of these instead.
/// The native code of the failed system call can still be queried from the socket for diagnostics,
/// see [`Socket::last_native_error`](crate::Socket::last_native_error).
#[derive(thiserror::Error, Debug, Ord, PartialOrd, Eq, PartialEq, Copy, Clone, Hash)]
#[repr(u8)]
pub enum SocketError {
    /// Connecting failed because the socket is already connected.
    ///
    /// Call `disconnect` first.
    #[error("the socket is already connected")]
    AlreadyConnected = 1,
    /// The operation requires a connected socket.
    #[error("the socket is not connected")]
    NotConnected = 2,
    /// The operating system networking stack could not be initialized.
    #[error("the networking subsystem could not be initialized")]
    NetworkingInitFailed = 10,
    /// The hostname could not be resolved to an address.
    #[error("the hostname could not be resolved")]
    HostNotResolved = 11,
    /// The remote host is down, unreachable or refused the connection.
    #[error("could not connect to the remote host")]
    ConnectFailed = 12,
    /// The operating system refused to send the data.
    #[error("sending failed")]
    SendFailed = 20,
    /// The peer has closed the connection.
    #[error("the connection was closed by the peer")]
    ConnectionClosed = 30,
    /// The configured receive timeout elapsed.
    #[error("the operation timed out")]
    Timeout = 31,
    /// The socket is in non-blocking mode and the operation could not complete immediately.
    #[error("the operation would block")]
    WouldBlock = 32,
    /// Opening failed because the socket is already open.
    ///
    /// Call `close` first.
    #[error("the socket is already open")]
    AlreadyOpen = 40,
    /// The socket could not be bound to the local address.
    #[error("binding to the local address failed")]
    BindFailed = 41,
    /// The socket could not be switched to the listening state.
    #[error("listening failed")]
    ListenFailed = 42,
    /// The operation requires an open socket.
    #[error("the socket is not open")]
    NotOpen = 43,
    /// Any other system error.
    #[error("unclassified system error")]
    Other = 255,
}

impl SocketError {
    /// Returns the stable numeric code of this error.
    ///
    /// [`SUCCESS_CODE`] is reserved for successful operations.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Returns the name of the variant, e.g. `"ConnectFailed"`.
    pub const fn name(self) -> &'static str {
        match self {
            SocketError::AlreadyConnected => "AlreadyConnected",
            SocketError::NotConnected => "NotConnected",
            SocketError::NetworkingInitFailed => "NetworkingInitFailed",
            SocketError::HostNotResolved => "HostNotResolved",
            SocketError::ConnectFailed => "ConnectFailed",
            SocketError::SendFailed => "SendFailed",
            SocketError::ConnectionClosed => "ConnectionClosed",
            SocketError::Timeout => "Timeout",
            SocketError::WouldBlock => "WouldBlock",
            SocketError::AlreadyOpen => "AlreadyOpen",
            SocketError::BindFailed => "BindFailed",
            SocketError::ListenFailed => "ListenFailed",
            SocketError::NotOpen => "NotOpen",
            SocketError::Other => "Other",
        }
    }

    /// Returns `true` for conditions that are expected during normal operation and are meant to be
    /// handled in a loop: [`Timeout`](Self::Timeout), [`WouldBlock`](Self::WouldBlock) and
    /// [`ConnectionClosed`](Self::ConnectionClosed).
    pub const fn is_transient(self) -> bool {
        matches!(
            self,
            SocketError::Timeout | SocketError::WouldBlock | SocketError::ConnectionClosed
        )
    }
}

/// A receive that stopped before the buffer was filled.
///
/// `received` bytes at the start of the buffer are valid.
#[derive(thiserror::Error, Debug, Eq, PartialEq, Copy, Clone, Hash)]
#[error("{kind} after receiving {received} bytes")]
pub struct ReceiveError {
    /// Why the receive stopped.
    pub kind: SocketError,
    /// How many bytes arrived before it stopped.
    pub received: usize,
}

impl ReceiveError {
    pub(crate) const fn new(kind: SocketError, received: usize) -> Self {
        Self { kind, received }
    }
}

impl From<ReceiveError> for SocketError {
    fn from(error: ReceiveError) -> Self {
        error.kind
    }
}

/// Returns the operating system's description of a [`NativeError`].
pub fn native_error_message(code: NativeError) -> String {
    std::io::Error::from_raw_os_error(code).to_string()
}
