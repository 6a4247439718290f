//! Stream trait abstraction for pluggable transports
//!
//! A [`Stream`] owns exactly one socket and never blocks: every call either
//! completes immediately or reports [`StreamError::WouldBlock`]. Readiness is
//! registered through [`Stream::wait`] with the caller's task context.

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use thiserror::Error;

/// Readiness interest for [`Stream::wait`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wait {
    Connect,
    Recv,
    Send,
}

/// Connection progress of a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectStatus {
    Connecting,
    Connected,
    Failed,
}

/// Socket-level knobs applied at open time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Local address to bind before connecting
    pub bind: Option<SocketAddr>,
    /// DSCP value (0..=63) written into the IP header
    pub dscp: Option<u8>,
}

/// Errors that can occur on a stream
#[derive(Error, Debug)]
pub enum StreamError {
    /// Nothing can be done right now; retry after the next readiness signal
    #[error("operation would block")]
    WouldBlock,

    #[error("invalid address '{target}': {reason}")]
    AddressParse { target: String, reason: String },

    #[error("failed to create socket: {0}")]
    SocketCreate(#[source] io::Error),

    #[error("no tokio runtime with I/O enabled is running")]
    NoRuntime,

    #[error("partial datagram send: {sent} of {len} bytes")]
    PartialDatagram { sent: usize, len: usize },

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl StreamError {
    pub fn is_would_block(&self) -> bool {
        matches!(self, StreamError::WouldBlock)
    }
}

impl From<io::Error> for StreamError {
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::WouldBlock {
            StreamError::WouldBlock
        } else {
            StreamError::Io(e)
        }
    }
}

/// A non-blocking transport endpoint.
///
/// Dropping a stream closes its socket, exactly once.
pub trait Stream: Send {
    /// Target this stream was opened with, e.g. `udp:127.0.0.1:6653`
    fn name(&self) -> &str;

    fn status(&self) -> ConnectStatus;

    /// Advance connection setup. `Ok(())` once connected.
    fn connect(&mut self) -> Result<(), StreamError>;

    /// Read into `buf`. For byte streams `Ok(0)` means end of stream;
    /// datagram streams return exactly one whole datagram per call.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, StreamError>;

    /// Write from `buf`, returning how many bytes were accepted.
    fn send(&mut self, buf: &[u8]) -> Result<usize, StreamError>;

    /// Periodic maintenance hook
    fn run(&mut self) {}

    /// Register interest with the task in `cx`. Returns `Ready` if the
    /// interest is already satisfied.
    fn wait(&mut self, cx: &mut Context<'_>, wait: Wait) -> Poll<()>;

    /// Largest payload a single `send` can carry, if the transport has a limit
    fn max_unit(&self) -> Option<usize> {
        None
    }
}

/// The datagram socket primitive a datagram stream is built on.
///
/// Implemented by [`ReactorUdpSocket`](crate::transport::udp::ReactorUdpSocket); tests substitute their own.
pub trait DatagramSocket: Send {
    /// Send to the peer the socket is connected to
    fn try_send(&self, buf: &[u8]) -> io::Result<usize>;

    /// Send to an explicit destination
    fn try_send_to(&self, buf: &[u8], target: SocketAddr) -> io::Result<usize>;

    /// Receive one datagram and its source
    fn try_recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;

    fn poll_recv_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    fn poll_send_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;
}

/// Fail early instead of letting tokio panic when registering a socket
pub(crate) fn require_runtime() -> Result<(), StreamError> {
    tokio::runtime::Handle::try_current()
        .map(|_| ())
        .map_err(|_| StreamError::NoRuntime)
}

/// Apply a DSCP value to a freshly created socket
pub(crate) fn apply_dscp(
    socket: &socket2::Socket,
    peer: &SocketAddr,
    dscp: u8,
) -> Result<(), StreamError> {
    if dscp > 63 {
        return Err(StreamError::SocketCreate(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("DSCP value {} out of range", dscp),
        )));
    }
    // DSCP occupies the upper six bits of the TOS / traffic class byte
    let value = u32::from(dscp) << 2;
    let result = if peer.is_ipv4() {
        socket.set_tos(value)
    } else {
        socket.set_tclass_v6(value)
    };
    result.map_err(StreamError::SocketCreate)
}
