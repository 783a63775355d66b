//! Readiness polling over several sockets.

use std::io::ErrorKind;
use std::time::{Duration, Instant};

use crate::error::SocketError;
use crate::handle::Socket;
use crate::sys;

/// Waits until at least one of `sockets` is readable or `timeout` elapses.
///
/// Returns the indices into `sockets` of those that are ready: a connected socket with data
/// pending or whose peer closed, a server with a pending connection, or a datagram socket with a
/// queued datagram. An empty result means the timeout elapsed. Closed sockets are never ready; if
/// no socket is open the call returns immediately. No I/O is performed on the sockets.
///
/// ```no_run
/// use std::time::Duration;
/// use sockal::{Socket, TcpServerSocket, UdpSocket, wait_for_any};
///
/// let mut server = TcpServerSocket::new();
/// server.open(8080)?;
/// let mut udp = UdpSocket::new();
/// udp.open(8081)?;
///
/// let sockets: [&dyn Socket; 2] = [&server, &udp];
/// for index in wait_for_any(&sockets, Duration::from_secs(1))? {
///     println!("socket {index} is ready");
/// }
/// # Ok::<(), sockal::SocketError>(())
/// ```
pub fn wait_for_any(sockets: &[&dyn Socket], timeout: Duration) -> Result<Vec<usize>, SocketError> {
    let (indices, handles): (Vec<usize>, Vec<sys::RawHandle>) = sockets
        .iter()
        .enumerate()
        .filter_map(|(index, socket)| Some((index, socket.handle().raw()?)))
        .unzip();

    if handles.is_empty() {
        return Ok(Vec::new());
    }

    let deadline = Instant::now().checked_add(timeout);
    loop {
        let remaining = deadline.map_or(timeout, |deadline| {
            deadline.saturating_duration_since(Instant::now())
        });
        match sys::poll_readable(&handles, remaining) {
            Ok(ready) => {
                tracing::trace!(ready = ready.len(), polled = handles.len(), "readiness wait done");
                return Ok(ready.into_iter().map(|position| indices[position]).collect());
            }
            Err(error) if error.kind() == ErrorKind::Interrupted => {}
            Err(error) => {
                tracing::warn!(native_error = error.raw_os_error(), %error, "readiness wait failed");
                return Err(SocketError::Other);
            }
        }
    }
}
