//! Socket kinds and readiness polling.

pub mod multiplex;
pub mod tcp;
pub mod tcp_server;
pub mod udp;
