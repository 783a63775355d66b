//! Winsock.

use std::io;
use std::os::windows::io::{AsRawSocket, IntoRawSocket, RawSocket};
use std::time::Duration;

use socket2::Socket as NativeSocket;
use windows_sys::Win32::Networking::WinSock::{
    self, POLLERR, POLLHUP, POLLRDNORM, SOCKET, SOCKET_ERROR, WSADATA, WSAETIMEDOUT,
    WSAEWOULDBLOCK, WSAPOLLFD,
};

pub(crate) type RawHandle = RawSocket;

pub(crate) const SEND_FLAGS: i32 = 0;

/// `SO_RCVTIMEO` takes whole milliseconds, shorter timeouts truncate to zero.
pub(crate) const TIMEOUT_RESOLUTION: Duration = Duration::from_millis(1);

/// Requested Winsock version 2.2.
const WINSOCK_VERSION: u16 = 0x0202;

pub(crate) fn startup() -> io::Result<()> {
    // SAFETY: `WSADATA` is a plain C struct for which all-zero is a valid value.
    let mut data: WSADATA = unsafe { std::mem::zeroed() };
    // SAFETY: `data` is a valid, writable `WSADATA`.
    let result = unsafe { WinSock::WSAStartup(WINSOCK_VERSION, &mut data) };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::from_raw_os_error(result))
    }
}

pub(crate) fn cleanup() {
    // SAFETY: only called after a successful `WSAStartup`.
    unsafe {
        WinSock::WSACleanup();
    }
}

/// Closes the socket and reports the outcome, unlike dropping it.
pub(crate) fn close(socket: NativeSocket) -> io::Result<()> {
    let raw = socket.into_raw_socket();
    // SAFETY: `raw` was just released by its owning socket, nothing else refers to it.
    if unsafe { WinSock::closesocket(raw as SOCKET) } == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

pub(crate) fn raw_handle(socket: &NativeSocket) -> RawHandle {
    socket.as_raw_socket()
}

/// `SO_REUSEADDR` allows port hijacking on Windows, so it is left unset.
pub(crate) fn prepare_listener(_socket: &NativeSocket) -> io::Result<()> {
    Ok(())
}

pub(crate) fn is_timeout_error(code: i32) -> bool {
    code == WSAETIMEDOUT
}

pub(crate) fn is_would_block_error(code: i32) -> bool {
    code == WSAEWOULDBLOCK
}

/// Waits until at least one of `handles` is readable, returning the indices of the ready ones.
pub(crate) fn poll_readable(handles: &[RawHandle], timeout: Duration) -> io::Result<Vec<usize>> {
    let mut fds: Vec<WSAPOLLFD> = handles
        .iter()
        .map(|&raw| WSAPOLLFD {
            fd: raw as SOCKET,
            events: POLLRDNORM,
            revents: 0,
        })
        .collect();
    let count =
        u32::try_from(fds.len()).map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

    // SAFETY: `fds` is a valid, exclusively borrowed array of `count` entries for the whole call.
    let result =
        unsafe { WinSock::WSAPoll(fds.as_mut_ptr(), count, super::poll_timeout_millis(timeout)) };
    if result == SOCKET_ERROR {
        return Err(io::Error::last_os_error());
    }

    Ok(fds
        .iter()
        .enumerate()
        .filter(|(_, fd)| fd.revents & (POLLRDNORM | POLLHUP | POLLERR) != 0)
        .map(|(index, _)| index)
        .collect())
}
