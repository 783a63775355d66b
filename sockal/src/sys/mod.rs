//! Platform-adaptation seam.
//!
//! The rest of the crate only talks to the operating system through this module. Concepts that behave
//! differently per platform (startup, close, error classification, readiness polling) have exactly one
//! implementation compiled in from `unix` or `windows`; the rest are thin wrappers over `socket2`.

use std::io;
use std::mem::MaybeUninit;
use std::net::Shutdown;
use std::time::Duration;

use socket2::{SockAddr, Socket as NativeSocket};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as platform;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as platform;

pub(crate) use platform::{
    RawHandle, cleanup, close, is_timeout_error, is_would_block_error, poll_readable,
    prepare_listener, raw_handle, startup,
};

/// Shuts down both directions of `socket`.
pub(crate) fn shutdown(socket: &NativeSocket) -> io::Result<()> {
    socket.shutdown(Shutdown::Both)
}

/// Sets the receive timeout, `None` blocks forever.
pub(crate) fn set_timeout(socket: &NativeSocket, timeout: Option<Duration>) -> io::Result<()> {
    socket.set_read_timeout(timeout.map(round_timeout))
}

/// Raises a non-zero `timeout` to the platform's resolution, the OS reads a truncated zero as
/// "no timeout".
fn round_timeout(timeout: Duration) -> Duration {
    timeout.max(platform::TIMEOUT_RESOLUTION)
}

pub(crate) fn set_non_blocking(socket: &NativeSocket, non_blocking: bool) -> io::Result<()> {
    socket.set_nonblocking(non_blocking)
}

/// Issues a single send call, which may accept fewer bytes than offered.
pub(crate) fn send(socket: &NativeSocket, buffer: &[u8]) -> io::Result<usize> {
    socket.send_with_flags(buffer, platform::SEND_FLAGS)
}

/// Issues a single receive call, `Ok(0)` signals an orderly shutdown by the peer.
pub(crate) fn recv(socket: &NativeSocket, buffer: &mut [u8]) -> io::Result<usize> {
    socket.recv(as_uninit(buffer))
}

pub(crate) fn recv_from(
    socket: &NativeSocket,
    buffer: &mut [u8],
) -> io::Result<(usize, SockAddr)> {
    socket.recv_from(as_uninit(buffer))
}

/// Returns `true` if the peer has shut down its side and nothing is left to read.
///
/// Never blocks.
pub(crate) fn peer_closed(socket: &NativeSocket) -> bool {
    match poll_readable(&[raw_handle(socket)], Duration::ZERO) {
        Ok(ready) if !ready.is_empty() => {
            let mut probe = [MaybeUninit::<u8>::uninit(); 1];
            matches!(socket.peek(&mut probe), Ok(0))
        }
        _ => false,
    }
}

/// Rounds `timeout` up to whole milliseconds for the polling APIs, saturating at `i32::MAX`.
pub(crate) fn poll_timeout_millis(timeout: Duration) -> i32 {
    let millis = timeout.as_millis() + u128::from(timeout.subsec_nanos() % 1_000_000 != 0);
    i32::try_from(millis).unwrap_or(i32::MAX)
}

fn as_uninit(buffer: &mut [u8]) -> &mut [MaybeUninit<u8>] {
    // SAFETY: `MaybeUninit<u8>` has the same layout as `u8`, and the receive calls only ever write
    // initialized bytes into the buffer.
    unsafe { &mut *(buffer as *mut [u8] as *mut [MaybeUninit<u8>]) }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use test_case::test_case;

    use super::{poll_timeout_millis, round_timeout};

    #[test_case(Duration::ZERO, 0)]
    #[test_case(Duration::from_millis(250), 250)]
    #[test_case(Duration::from_micros(1), 1)]
    #[test_case(Duration::from_micros(1_500), 2)]
    #[test_case(Duration::from_secs(u64::MAX), i32::MAX)]
    fn poll_timeouts_round_up(timeout: Duration, expected: i32) {
        assert_eq!(poll_timeout_millis(timeout), expected);
    }

    #[test_case(Duration::from_nanos(1))]
    #[test_case(Duration::from_nanos(500))]
    #[test_case(Duration::from_micros(999))]
    fn tiny_socket_timeouts_stay_finite(timeout: Duration) {
        assert!(round_timeout(timeout) >= timeout);
        assert!(round_timeout(timeout) >= super::platform::TIMEOUT_RESOLUTION);
    }

    #[test]
    fn coarse_socket_timeouts_are_unchanged() {
        let timeout = Duration::from_millis(250);
        assert_eq!(round_timeout(timeout), timeout);
    }
}
