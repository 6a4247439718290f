//! Unix domain socket transport
//!
//! Used for local controllers; no port and no IP options apply.

use crate::transport::byte_stream::{connect_status, ByteSocket, ByteStream};
use crate::transport::reactor::Registered;
use crate::transport::traits::{require_runtime, OpenOptions, Stream, StreamError};
use socket2::{Domain, SockAddr, Socket, Type};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::task::{Context, Poll};
use tracing::{error, info};

/// Plain non-blocking Unix stream registered with the tokio reactor
pub type ReactorUnixStream = Registered<UnixStream>;

impl ByteSocket for ReactorUnixStream {
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

/// Open a Unix stream for `name` (`unix:<path>`) whose path is `suffix`
pub fn open(
    name: &str,
    suffix: &str,
    _opts: &OpenOptions,
) -> Result<ByteStream<ReactorUnixStream>, StreamError> {
    if suffix.is_empty() {
        return Err(StreamError::AddressParse {
            target: name.to_string(),
            reason: "socket path required".into(),
        });
    }
    let addr = SockAddr::unix(suffix).map_err(|e| StreamError::AddressParse {
        target: suffix.to_string(),
        reason: e.to_string(),
    })?;
    require_runtime()?;

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(|e| {
        error!("Failed to create Unix socket: {}", e);
        StreamError::SocketCreate(e)
    })?;
    socket.set_nonblocking(true).map_err(StreamError::SocketCreate)?;

    let status = connect_status(socket.connect(&addr)).map_err(StreamError::Io)?;

    let stream: UnixStream = socket.into();
    let stream = Registered::new(stream).map_err(StreamError::SocketCreate)?;
    info!("Unix stream opening to {} ({:?})", name, status);

    Ok(ByteStream::new(name, stream, status))
}

/// Open function registered for the `unix` transport
pub fn open_stream(
    name: &str,
    suffix: &str,
    opts: &OpenOptions,
) -> Result<Box<dyn Stream>, StreamError> {
    Ok(Box::new(open(name, suffix, opts)?))
}
