//! `sockal` CLI

#![forbid(unsafe_code)]

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::Context;
use sockal::{
    DEFAULT_BACKLOG, Endpoint, HostPort, Socket, SocketError, SocketOptions, TcpServerSocket,
    TcpSocket, UdpSocket, wait_for_any,
};

/// How long the echo server waits for activity before checking its connection limit again.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Largest UDP payload over IPv4.
const MAX_DATAGRAM: usize = 65507;

/// Portable socket toolbox
///
/// Talks TCP and UDP through the `sockal` library, mostly for trying out peers by hand.
#[derive(clap::Parser, Debug)]
#[command(disable_help_subcommand = true, version)]
pub struct Arguments {
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Accept TCP connections and echo back everything they send.
    EchoServer {
        /// Port to listen on, 0 picks a free one.
        #[arg(long)]
        port: u16,

        /// Local address to listen on.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        bind: IpAddr,

        /// Queue length for connections not yet accepted.
        #[arg(long, default_value_t = DEFAULT_BACKLOG)]
        backlog: u32,

        /// Exit after this many connections have been closed, serve forever otherwise.
        #[arg(long)]
        max_connections: Option<usize>,
    },

    /// Connect to a TCP server, send a message and print the first reply.
    Send {
        /// The server as `host:port`, can be set via environment to talk to the same peer repeatedly.
        #[arg(long, env = "SOCKAL_SERVER")]
        to: HostPort,

        /// How long to wait for the reply, 0 waits forever.
        #[arg(long, default_value_t = 5000)]
        timeout_ms: u64,

        message: String,
    },

    /// Send a message as one UDP datagram.
    UdpSend {
        /// The receiver as `ip:port`.
        #[arg(long)]
        to: SocketAddr,

        message: String,
    },

    /// Print received UDP datagrams.
    UdpListen {
        /// Port to listen on.
        #[arg(long)]
        port: u16,

        /// Local address to listen on.
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::LOCALHOST))]
        bind: IpAddr,

        /// Exit after this many datagrams, listen forever otherwise.
        #[arg(long)]
        count: Option<usize>,
    },
}

impl Arguments {
    /// Runs the selected command.
    pub fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::EchoServer {
                port,
                bind,
                backlog,
                max_connections,
            } => {
                let options = SocketOptions {
                    bind_address: bind,
                    backlog,
                    ..SocketOptions::default()
                };
                let mut server = EchoServer::open(port, options)
                    .with_context(|| format!("listening on {bind}:{port}"))?;
                println!("listening on {}", server.local_endpoint()?);
                server.serve(max_connections)?;
            }
            Command::Send {
                to,
                timeout_ms,
                message,
            } => {
                let mut socket = TcpSocket::new();
                socket
                    .connect_to(&to)
                    .with_context(|| format!("connecting to {to}"))?;
                socket
                    .set_timeout(Duration::from_millis(timeout_ms))
                    .context("setting receive timeout")?;
                socket.send(&message).context("sending message")?;
                let reply = socket.receive_once().context("receiving reply")?;
                println!("{}", String::from_utf8_lossy(&reply));
            }
            Command::UdpSend { to, message } => {
                let mut socket = UdpSocket::new();
                socket.open(0).context("opening socket")?;
                socket
                    .send_to(to, &message)
                    .with_context(|| format!("sending to {to}"))?;
                println!("sent {} bytes to {to}", message.len());
            }
            Command::UdpListen { port, bind, count } => {
                let mut socket = UdpSocket::with_options(SocketOptions {
                    bind_address: bind,
                    ..SocketOptions::default()
                });
                socket
                    .open(port)
                    .with_context(|| format!("listening on {bind}:{port}"))?;

                let mut buffer = vec![0; MAX_DATAGRAM];
                let mut received = 0;
                while count.is_none_or(|count| received < count) {
                    let (length, from) = socket
                        .recv_from(&mut buffer)
                        .context("receiving datagram")?;
                    println!("{from}: {}", String::from_utf8_lossy(&buffer[..length]));
                    received += 1;
                }
            }
        }

        Ok(())
    }
}

/// A single-threaded TCP echo server.
///
/// Waits on the listener and all clients at once with [`wait_for_any`] and writes back whatever a
/// client sent.
#[derive(Debug)]
pub struct EchoServer {
    listener: TcpServerSocket,
    clients: Vec<TcpSocket>,
}

impl EchoServer {
    /// Starts listening on `port`.
    pub fn open(port: u16, options: SocketOptions) -> Result<Self, SocketError> {
        let mut listener = TcpServerSocket::with_options(options);
        listener.open(port)?;
        Ok(Self {
            listener,
            clients: Vec::new(),
        })
    }

    /// Returns the address the server listens on.
    pub fn local_endpoint(&self) -> Result<Endpoint, SocketError> {
        self.listener.local_endpoint()
    }

    /// Serves clients until `limit` connections have been closed, or forever without a limit.
    pub fn serve(&mut self, limit: Option<usize>) -> anyhow::Result<()> {
        let mut closed = 0;
        while limit.is_none_or(|limit| closed < limit) {
            closed += self.poll_once(POLL_INTERVAL)?;
        }
        Ok(())
    }

    /// Handles whatever became ready within `timeout`, returning the number of closed connections.
    fn poll_once(&mut self, timeout: Duration) -> anyhow::Result<usize> {
        let ready = {
            let mut sockets: Vec<&dyn Socket> = Vec::with_capacity(self.clients.len() + 1);
            sockets.push(&self.listener);
            sockets.extend(self.clients.iter().map(|client| client as &dyn Socket));
            wait_for_any(&sockets, timeout).context("waiting for activity")?
        };

        for index in ready {
            match index.checked_sub(1) {
                None => self.accept(),
                Some(client) => self.echo(client),
            }
        }

        let before = self.clients.len();
        self.clients.retain(TcpSocket::is_connected);
        Ok(before - self.clients.len())
    }

    /// Accepts one pending client, a failed accept only affects that client.
    fn accept(&mut self) {
        match self.listener.accept() {
            Ok((client, peer)) => {
                tracing::info!(%peer, "client connected");
                self.clients.push(client);
            }
            Err(error) if error.is_transient() => {}
            Err(error) => tracing::warn!(
                %error,
                native_error = self.listener.last_native_error(),
                "accepting connection failed"
            ),
        }
    }

    fn echo(&mut self, index: usize) {
        let client = &mut self.clients[index];
        let result = client
            .receive_once()
            .and_then(|data| client.send(data));

        match result {
            Ok(()) => {}
            Err(SocketError::ConnectionClosed) => tracing::info!("client disconnected"),
            Err(error) if error.is_transient() => {}
            Err(error) => {
                tracing::warn!(
                    %error,
                    native_error = client.last_native_error(),
                    "dropping client"
                );
                // The client is gone either way.
                let _ = client.disconnect();
            }
        }
    }
}
