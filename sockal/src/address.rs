//! Endpoints, their native representation and host name resolution.

use std::fmt::{self, Display, Formatter};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use socket2::SockAddr;

/// An (address, port) pair identifying a communication peer.
pub type Endpoint = SocketAddr;

/// Converts an endpoint into the native socket-address structure.
///
/// IPv4 occupies a `sockaddr_in`, IPv6 a `sockaddr_in6`; address and port are stored in network byte
/// order.
pub fn to_native(endpoint: &Endpoint) -> SockAddr {
    SockAddr::from(*endpoint)
}

/// Converts a native socket-address structure back into an endpoint.
///
/// Returns `None` for families other than IPv4 and IPv6.
pub fn from_native(address: &SockAddr) -> Option<Endpoint> {
    address.as_socket()
}

/// Resolves `host` into candidate endpoints for stream sockets, in resolver order.
///
/// IP literals are returned as-is without a lookup.
#[tracing::instrument(level = "debug")]
pub fn resolve(host: &str, port: u16) -> io::Result<Vec<Endpoint>> {
    let endpoints: Vec<Endpoint> = (host, port).to_socket_addrs()?.collect();
    tracing::trace!(count = endpoints.len(), "resolved host");
    Ok(endpoints)
}

/// Looks up the first address of `host`.
pub fn lookup_host(host: &str) -> io::Result<IpAddr> {
    resolve(host, 0)?
        .first()
        .map(SocketAddr::ip)
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, format!("{host} has no address")))
}

/// A `host:port` pair that has not been resolved yet.
///
/// The host is an IPv4 literal, a bracketed IPv6 literal or an RFC 1123 host name:
///
/// ```
/// use sockal::address::HostPort;
///
/// let target: HostPort = "localhost:8080".parse()?;
/// assert_eq!(target.host(), "localhost");
/// assert_eq!(target.port(), 8080);
///
/// let target: HostPort = "[::1]:53".parse()?;
/// assert_eq!(target.host(), "::1");
/// assert_eq!(target.to_string(), "[::1]:53");
/// # Ok::<(), sockal::address::HostPortParseError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostPort {
    host: String,
    port: u16,
}

impl HostPort {
    /// Returns the host name or IP literal, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the port.
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the host, see [`resolve`].
    pub fn resolve(&self) -> io::Result<Vec<Endpoint>> {
        resolve(&self.host, self.port)
    }

    fn is_v6(&self) -> bool {
        self.host.parse::<Ipv6Addr>().is_ok()
    }
}

impl From<Endpoint> for HostPort {
    fn from(endpoint: Endpoint) -> Self {
        Self {
            host: endpoint.ip().to_string(),
            port: endpoint.port(),
        }
    }
}

impl Display for HostPort {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.is_v6() {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Errors that can occur when parsing a [`HostPort`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum HostPortParseError {
    /// There is no `:` before the port.
    #[error("missing ':port' suffix")]
    MissingPort,

    /// The port is not a number in `0..=65535`.
    #[error("invalid port")]
    InvalidPort(#[source] std::num::ParseIntError),

    /// The host is neither an IP literal nor a valid host name.
    #[error("invalid host: {0}")]
    InvalidHost(&'static str),
}

impl FromStr for HostPort {
    type Err = HostPortParseError;

    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let (host, port) = string
            .rsplit_once(':')
            .ok_or(HostPortParseError::MissingPort)?;
        let port = port.parse().map_err(HostPortParseError::InvalidPort)?;

        let bracketed = host.strip_prefix('[').and_then(|host| host.strip_suffix(']'));
        let host = match bracketed {
            Some(host) if host.parse::<Ipv6Addr>().is_ok() => host,
            Some(_) => return Err(HostPortParseError::InvalidHost("malformed IPv6 literal")),
            None if host.parse::<Ipv4Addr>().is_ok() => host,
            None => {
                check_host_name(host)?;
                host
            }
        };

        Ok(Self {
            host: host.to_owned(),
            port,
        })
    }
}

impl TryFrom<String> for HostPort {
    type Error = HostPortParseError;

    fn try_from(string: String) -> Result<Self, Self::Error> {
        string.parse()
    }
}

impl From<HostPort> for String {
    fn from(host_port: HostPort) -> Self {
        host_port.to_string()
    }
}

/// Checks [RFC 1123 §2.1] host name syntax.
///
/// At most 253 characters in total, labels of 1 to 63 alphanumerics or dashes that neither start
/// nor end with a dash, one optional trailing dot.
///
/// [RFC 1123 §2.1]: https://datatracker.ietf.org/doc/html/rfc1123#section-2
fn check_host_name(host: &str) -> Result<(), HostPortParseError> {
    let invalid = |reason| Err(HostPortParseError::InvalidHost(reason));

    if host.is_empty() {
        return invalid("empty");
    }
    if host.len() > 253 {
        return invalid("longer than 253 characters");
    }

    for label in host.strip_suffix('.').unwrap_or(host).split('.') {
        if label.is_empty() {
            return invalid("empty label");
        }
        if label.len() > 63 {
            return invalid("label longer than 63 characters");
        }
        if label.starts_with('-') || label.ends_with('-') {
            return invalid("label starts or ends with '-'");
        }
        if !label.bytes().all(|byte| byte.is_ascii_alphanumeric() || byte == b'-') {
            return invalid("label contains a character other than letters, digits or '-'");
        }
    }

    Ok(())
}
