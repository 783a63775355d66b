//! POSIX sockets.

use std::io;
use std::os::fd::{AsRawFd, IntoRawFd, RawFd};
use std::time::Duration;

use socket2::Socket as NativeSocket;

pub(crate) type RawHandle = RawFd;

/// Keeps a send to a closed peer from raising `SIGPIPE`.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) const SEND_FLAGS: libc::c_int = libc::MSG_NOSIGNAL;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) const SEND_FLAGS: libc::c_int = 0;

/// `SO_RCVTIMEO` takes a `timeval`, shorter timeouts truncate to zero.
pub(crate) const TIMEOUT_RESOLUTION: Duration = Duration::from_micros(1);

/// POSIX sockets need no global setup.
pub(crate) fn startup() -> io::Result<()> {
    Ok(())
}

pub(crate) fn cleanup() {}

/// Closes the descriptor and reports the outcome, unlike dropping the socket.
pub(crate) fn close(socket: NativeSocket) -> io::Result<()> {
    let fd = socket.into_raw_fd();
    // SAFETY: `fd` was just released by its owning socket, nothing else refers to it.
    if unsafe { libc::close(fd) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub(crate) fn raw_handle(socket: &NativeSocket) -> RawHandle {
    socket.as_raw_fd()
}

/// Lets a restarted server rebind while old connections linger in `TIME_WAIT`.
pub(crate) fn prepare_listener(socket: &NativeSocket) -> io::Result<()> {
    socket.set_reuse_address(true)
}

/// A blocking receive with `SO_RCVTIMEO` set reports an elapsed timeout as `EAGAIN`.
pub(crate) fn is_timeout_error(code: i32) -> bool {
    code == libc::EAGAIN || code == libc::EWOULDBLOCK || code == libc::ETIMEDOUT
}

pub(crate) fn is_would_block_error(code: i32) -> bool {
    code == libc::EAGAIN || code == libc::EWOULDBLOCK
}

/// Waits until at least one of `handles` is readable, returning the indices of the ready ones.
pub(crate) fn poll_readable(handles: &[RawHandle], timeout: Duration) -> io::Result<Vec<usize>> {
    let mut fds: Vec<libc::pollfd> = handles
        .iter()
        .map(|&fd| libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        })
        .collect();
    let nfds = libc::nfds_t::try_from(fds.len())
        .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

    // SAFETY: `fds` is a valid, exclusively borrowed array of `nfds` entries for the whole call.
    let result = unsafe { libc::poll(fds.as_mut_ptr(), nfds, super::poll_timeout_millis(timeout)) };
    if result < 0 {
        return Err(io::Error::last_os_error());
    }

    Ok(fds
        .iter()
        .enumerate()
        .filter(|(_, fd)| fd.revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0)
        .map(|(index, _)| index)
        .collect())
}
