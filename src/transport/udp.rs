//! UDP transport: one datagram is one message
//!
//! "Connecting" a UDP socket only records the default destination, so the
//! stream is usable as soon as it is opened. Peer reachability shows up later
//! as I/O errors, never as an open failure.

use crate::transport::addr::parse_inet_active;
use crate::transport::reactor::Registered;
use crate::transport::traits::{
    apply_dscp, require_runtime, ConnectStatus, DatagramSocket, OpenOptions, Stream, StreamError,
    Wait,
};
use ofconn_shared::OFP_PORT;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::task::{Context, Poll};
use tracing::{debug, error, info, warn};

/// Largest UDP payload over IPv4 (65535 - 20 byte IP header - 8 byte UDP header)
pub const MAX_UDP_PAYLOAD_V4: usize = 65_507;

/// Largest UDP payload over IPv6 without jumbograms
pub const MAX_UDP_PAYLOAD_V6: usize = 65_527;

/// Plain non-blocking UDP socket registered with the tokio reactor
pub type ReactorUdpSocket = Registered<UdpSocket>;

impl DatagramSocket for ReactorUdpSocket {
    fn try_send(&self, buf: &[u8]) -> io::Result<usize> {
        self.get_ref().send(buf)
    }

    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize> {
        self.get_ref().send_to(buf, target)
    }

    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.get_ref().recv_from(buf)
    }

    fn poll_recv_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Registered::poll_read_ready(self, cx)
    }

    fn poll_send_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Registered::poll_write_ready(self, cx)
    }
}

/// Datagram-backed stream
pub struct UdpStream<S: DatagramSocket = ReactorUdpSocket> {
    name: String,
    socket: S,
    /// Default destination
    peer: SocketAddr,
    /// Whether the kernel accepted `peer` as the connected address
    bound_to_peer: bool,
}

impl UdpStream<ReactorUdpSocket> {
    /// Open a UDP stream for `name` (`udp:<host>[:<port>]`) whose address part is `suffix`
    pub fn open(name: &str, suffix: &str, opts: &OpenOptions) -> Result<Self, StreamError> {
        let peer = parse_inet_active(suffix, Some(OFP_PORT)).map_err(|e| {
            error!("Failed to parse UDP address '{}': {}", suffix, e);
            e
        })?;
        require_runtime()?;

        let socket = Socket::new(Domain::for_address(peer), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| {
                error!("Failed to create UDP socket: {}", e);
                StreamError::SocketCreate(e)
            })?;
        socket.set_nonblocking(true).map_err(StreamError::SocketCreate)?;

        if let Err(e) = socket.set_reuse_address(true) {
            warn!("Failed to set SO_REUSEADDR on {}: {}", name, e);
        }
        if let Some(dscp) = opts.dscp {
            apply_dscp(&socket, &peer, dscp)?;
        }

        let local = opts.bind.unwrap_or_else(|| unspecified_for(&peer));
        socket
            .bind(&local.into())
            .map_err(StreamError::SocketCreate)?;

        // Not fatal: sends fall back to an explicit destination
        let bound_to_peer = match socket.connect(&peer.into()) {
            Ok(()) => true,
            Err(e) => {
                warn!("UDP connect() to {} failed, using per-datagram destination: {}", peer, e);
                false
            }
        };

        let socket: UdpSocket = socket.into();
        let socket = Registered::new(socket).map_err(StreamError::SocketCreate)?;
        info!("UDP stream opened to {}", name);

        Ok(Self::with_socket(name, socket, peer, bound_to_peer))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.get_ref().local_addr()
    }
}

impl<S: DatagramSocket> UdpStream<S> {
    /// Wrap an already configured socket
    pub fn with_socket(name: &str, socket: S, peer: SocketAddr, bound_to_peer: bool) -> Self {
        Self {
            name: name.to_string(),
            socket,
            peer,
            bound_to_peer,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

impl<S: DatagramSocket> Stream for UdpStream<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> ConnectStatus {
        ConnectStatus::Connected
    }

    fn connect(&mut self) -> Result<(), StreamError> {
        // No handshake
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let (n, from) = match self.socket.try_recv_from(buf) {
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Err(StreamError::WouldBlock),
            Err(e) => {
                error!("UDP recv error on {}: {}", self.name, e);
                return Err(StreamError::Io(e));
            }
        };

        if !self.bound_to_peer && from != self.peer {
            debug!("Ignoring {} byte datagram from unexpected source {}", n, from);
            return Err(StreamError::WouldBlock);
        }
        if n == 0 {
            return Err(StreamError::WouldBlock);
        }

        debug!("UDP received {} bytes", n);
        Ok(n)
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        let result = if self.bound_to_peer {
            self.socket.try_send(buf)
        } else {
            self.socket.try_send_to(buf, self.peer)
        };

        match result {
            Ok(n) if n == buf.len() => {
                debug!("UDP sent {} bytes", n);
                Ok(n)
            }
            Ok(n) => {
                warn!("Partial UDP send on {}: {} of {} bytes", self.name, n, buf.len());
                Err(StreamError::PartialDatagram {
                    sent: n,
                    len: buf.len(),
                })
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(StreamError::WouldBlock),
            Err(e) => {
                error!("UDP send error on {}: {}", self.name, e);
                Err(StreamError::Io(e))
            }
        }
    }

    fn wait(&mut self, cx: &mut Context<'_>, wait: Wait) -> Poll<()> {
        match wait {
            // Connected from the moment it was opened
            Wait::Connect => Poll::Ready(()),
            Wait::Recv => self.socket.poll_recv_ready(cx).map(|_| ()),
            Wait::Send => self.socket.poll_send_ready(cx).map(|_| ()),
        }
    }

    fn max_unit(&self) -> Option<usize> {
        Some(if self.peer.is_ipv4() {
            MAX_UDP_PAYLOAD_V4
        } else {
            MAX_UDP_PAYLOAD_V6
        })
    }
}

impl<S: DatagramSocket> Drop for UdpStream<S> {
    fn drop(&mut self) {
        info!("Closing UDP stream {}", self.name);
    }
}

/// Open function registered for the `udp` transport
pub fn open_stream(
    name: &str,
    suffix: &str,
    opts: &OpenOptions,
) -> Result<Box<dyn Stream>, StreamError> {
    Ok(Box::new(UdpStream::open(name, suffix, opts)?))
}

fn unspecified_for(peer: &SocketAddr) -> SocketAddr {
    let ip = match peer {
        SocketAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        SocketAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    };
    SocketAddr::new(ip, 0)
}
