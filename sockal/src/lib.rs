//! Portable blocking sockets with one error model.
//!
//! TCP clients, TCP servers and UDP sockets over the native BSD socket or Winsock API. Every operation reports
//! a [`SocketError`] instead of platform-specific codes; the native code of the last failed call stays
//! available through [`Socket::last_native_error`] for diagnostics.
//!
//! All calls are synchronous. A socket blocks until its operation completes, fails after the timeout set
//! with [`Socket::set_timeout`], or returns [`SocketError::WouldBlock`] right away in non-blocking mode.
//! [`wait_for_any`] waits for several sockets at once.
//!
//! # Example
//!
//! ```rust
//! use sockal::{TcpServerSocket, TcpSocket};
//!
//! let mut server = TcpServerSocket::new();
//! server.open(0)?;
//! let endpoint = server.local_endpoint()?;
//!
//! let mut client = TcpSocket::new();
//! client.connect_endpoint(endpoint)?;
//! let (mut connection, _peer) = server.accept()?;
//!
//! client.send("ping")?;
//! let mut buffer = [0; 4];
//! connection.receive(&mut buffer)?;
//! assert_eq!(&buffer, b"ping");
//! # Ok::<(), sockal::SocketError>(())
//! ```
//!
//! Sockets own their native handle. Dropping an open socket shuts it down and closes it; moving a socket
//! moves the handle, and [`std::mem::take`] leaves a closed socket behind.
//!
//! Closing a socket from another thread to interrupt a blocked call is not supported. Use a timeout,
//! non-blocking mode or [`wait_for_any`] instead.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod address;
mod error;
mod handle;
mod net;
mod options;
mod subsystem;
mod sys;

pub use address::{Endpoint, HostPort, HostPortParseError};
pub use error::{NativeError, ReceiveError, SUCCESS_CODE, SocketError, native_error_message};
pub use handle::{Socket, SocketHandle};
pub use net::multiplex::wait_for_any;
pub use net::tcp::TcpSocket;
pub use net::tcp_server::TcpServerSocket;
pub use net::udp::UdpSocket;
pub use options::{DEFAULT_BACKLOG, DEFAULT_RECEIVE_ONCE_CAPACITY, SocketOptions};
pub use subsystem::NetworkingSubsystem;
