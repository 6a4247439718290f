//! TCP transport implementation

use crate::transport::addr::parse_inet_active;
use crate::transport::byte_stream::{connect_status, ByteSocket, ByteStream};
use crate::transport::reactor::Registered;
use crate::transport::traits::{apply_dscp, require_runtime, OpenOptions, Stream, StreamError};
use ofconn_shared::OFP_PORT;
use socket2::{Domain, Protocol, Socket, Type};
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::task::{Context, Poll};
use tracing::{error, info, warn};

/// Plain non-blocking TCP stream registered with the tokio reactor
pub type ReactorTcpStream = Registered<TcpStream>;

impl ByteSocket for ReactorTcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut stream = self.get_ref();
        stream.read(buf)
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        let mut stream = self.get_ref();
        stream.write(buf)
    }

    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Registered::poll_read_ready(self, cx)
    }

    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Registered::poll_write_ready(self, cx)
    }

    fn take_error(&self) -> io::Result<Option<io::Error>> {
        self.get_ref().take_error()
    }

    fn is_connected(&self) -> bool {
        self.get_ref().peer_addr().is_ok()
    }
}

/// Open a TCP stream for `name` (`tcp:<host>[:<port>]`) whose address part is `suffix`
pub fn open(
    name: &str,
    suffix: &str,
    opts: &OpenOptions,
) -> Result<ByteStream<ReactorTcpStream>, StreamError> {
    let peer = parse_inet_active(suffix, Some(OFP_PORT))?;
    require_runtime()?;

    let socket = Socket::new(Domain::for_address(peer), Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| {
            error!("Failed to create TCP socket: {}", e);
            StreamError::SocketCreate(e)
        })?;
    socket.set_nonblocking(true).map_err(StreamError::SocketCreate)?;
    if let Err(e) = socket.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY on {}: {}", name, e);
    }
    if let Some(dscp) = opts.dscp {
        apply_dscp(&socket, &peer, dscp)?;
    }
    if let Some(local) = opts.bind {
        socket
            .bind(&local.into())
            .map_err(StreamError::SocketCreate)?;
    }

    let status = connect_status(socket.connect(&peer.into())).map_err(|e| {
        warn!("TCP connect to {} failed: {}", peer, e);
        StreamError::Io(e)
    })?;

    let stream: TcpStream = socket.into();
    let stream = Registered::new(stream).map_err(StreamError::SocketCreate)?;
    info!("TCP stream opening to {} ({:?})", name, status);

    Ok(ByteStream::new(name, stream, status))
}

/// Open function registered for the `tcp` transport
pub fn open_stream(
    name: &str,
    suffix: &str,
    opts: &OpenOptions,
) -> Result<Box<dyn Stream>, StreamError> {
    Ok(Box::new(open(name, suffix, opts)?))
}
