//! UDP behavior over loopback.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod common;

use std::time::{Duration, Instant};

use common::free_udp_port;
use pretty_assertions::assert_eq;
use serial_test::serial;
use sockal::{Socket, SocketError, UdpSocket};

fn bound_socket() -> UdpSocket {
    let mut socket = UdpSocket::new();
    socket.open(free_udp_port()).unwrap();
    socket
}

#[test]
#[cfg_attr(coverage_nightly, coverage(off))]
#[ntest_timeout::timeout(10000)]
fn datagram_round_trip() {
    let mut receiver = bound_socket();
    let mut sender = bound_socket();

    sender
        .send_to(receiver.local_endpoint().unwrap(), "datagram")
        .unwrap();

    let mut buffer = [0; 64];
    let (count, from) = receiver.recv_from(&mut buffer).unwrap();
    assert_eq!(&buffer[..count], b"datagram");
    assert_eq!(from, sender.local_endpoint().unwrap());

    receiver.send_to(from, "reply").unwrap();
    let (count, from) = sender.recv_from(&mut buffer).unwrap();
    assert_eq!(&buffer[..count], b"reply");
    assert_eq!(from, receiver.local_endpoint().unwrap());
}

#[test]
#[cfg_attr(coverage_nightly, coverage(off))]
#[ntest_timeout::timeout(10000)]
fn unbound_sender_gets_ephemeral_port() {
    let mut receiver = bound_socket();
    let mut sender = UdpSocket::new();
    sender.open(0).unwrap();

    sender
        .send_to(receiver.local_endpoint().unwrap(), [1u8, 2, 3])
        .unwrap();

    let mut buffer = [0; 8];
    let (count, from) = receiver.recv_from(&mut buffer).unwrap();
    assert_eq!(count, 3);
    assert_ne!(from.port(), 0);
    assert_eq!(from.port(), sender.local_endpoint().unwrap().port());
}

#[test]
#[cfg_attr(coverage_nightly, coverage(off))]
#[ntest_timeout::timeout(5000)]
fn non_blocking_receive_would_block() {
    let mut socket = bound_socket();
    socket.set_blocking_mode(false).unwrap();
    assert_eq!(socket.recv_from(&mut [0; 8]), Err(SocketError::WouldBlock));
    assert_ne!(socket.last_native_error(), 0);
}

#[test]
#[serial]
#[cfg_attr(coverage_nightly, coverage(off))]
#[ntest_timeout::timeout(10000)]
fn blocking_receive_times_out() {
    let mut socket = bound_socket();
    socket.set_timeout(Duration::from_millis(200)).unwrap();

    let started = Instant::now();
    assert_eq!(socket.recv_from(&mut [0; 8]), Err(SocketError::Timeout));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(150), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(3), "returned after {elapsed:?}");
}

#[test]
#[cfg_attr(coverage_nightly, coverage(off))]
fn port_in_use_fails_to_bind() {
    let first = bound_socket();
    let port = first.local_endpoint().unwrap().port();

    let mut second = UdpSocket::new();
    assert_eq!(second.open(port), Err(SocketError::BindFailed));
    assert!(!second.is_open());
}

#[test]
#[cfg_attr(coverage_nightly, coverage(off))]
fn open_close_lifecycle() {
    let mut socket = bound_socket();
    assert_eq!(socket.open(0), Err(SocketError::AlreadyOpen));
    assert_eq!(socket.close(), Ok(()));
    assert_eq!(socket.close(), Err(SocketError::NotOpen));
    socket.open(0).unwrap();
    assert!(socket.is_open());
}
