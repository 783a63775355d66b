use std::net::{Ipv4Addr, UdpSocket as StdUdpSocket};

use sockal::{TcpServerSocket, TcpSocket};

/// Returns a connected pair of `(client, accepted)` sockets over loopback.
pub fn connected_pair() -> (TcpSocket, TcpSocket) {
    let mut server = TcpServerSocket::new();
    server.open(0).unwrap();
    let endpoint = server.local_endpoint().unwrap();

    let mut client = TcpSocket::new();
    client.connect_endpoint(endpoint).unwrap();
    let (accepted, peer) = server.accept().unwrap();
    assert_eq!(peer, client.local_endpoint().unwrap());

    (client, accepted)
}

/// Returns a UDP port that was free a moment ago.
#[allow(dead_code, reason = "not every test binary uses it")]
pub fn free_udp_port() -> u16 {
    StdUdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}
