//! Per-socket configuration.

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 16;

/// Default scratch buffer size of `receive_once`, enough for a jumbo frame.
pub const DEFAULT_RECEIVE_ONCE_CAPACITY: usize = 10 * 1024;

/// Settings that apply when a socket is opened.
///
/// Every field has a default, so a partial configuration is enough:
///
/// ```
/// use sockal::SocketOptions;
///
/// let options: SocketOptions = serde_json::from_str(r#"{ "backlog": 64 }"#)?;
/// assert_eq!(options.backlog, 64);
/// assert_eq!(options, SocketOptions { backlog: 64, ..SocketOptions::default() });
/// # Ok::<(), serde_json::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct SocketOptions {
    /// Local address servers and datagram sockets bind to.
    pub bind_address: IpAddr,

    /// Queue length for connections not yet accepted by a server.
    pub backlog: u32,

    /// Largest number of bytes a single `receive_once` returns, at least 1.
    pub receive_once_capacity: usize,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            backlog: DEFAULT_BACKLOG,
            receive_once_capacity: DEFAULT_RECEIVE_ONCE_CAPACITY,
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::net::{IpAddr, Ipv6Addr};

    use pretty_assertions::assert_eq;

    use super::SocketOptions;

    #[test]
    fn defaults_bind_to_loopback() {
        let options = SocketOptions::default();
        assert_eq!(options.bind_address.to_string(), "127.0.0.1");
        assert_eq!(options.backlog, 16);
        assert_eq!(options.receive_once_capacity, 10240);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let options: SocketOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options, SocketOptions::default());
    }

    #[test]
    fn partial_config() {
        let options: SocketOptions =
            serde_json::from_str(r#"{ "bind_address": "::1", "receive_once_capacity": 1500 }"#)
                .unwrap();
        assert_eq!(options.bind_address, IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(options.receive_once_capacity, 1500);
        assert_eq!(options.backlog, 16);
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let error = serde_json::from_str::<SocketOptions>(r#"{ "backlgo": 1 }"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }
}
