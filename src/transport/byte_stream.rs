//! Connection-oriented byte streams (TCP, Unix domain)
//!
//! The socket is connected without blocking; the stream stays in
//! `Connecting` until the kernel reports the handshake outcome.

use crate::transport::traits::{ConnectStatus, Stream, StreamError, Wait};
use std::io;
use std::task::{Context, Poll};
use tracing::{debug, error, info, warn};

/// The byte-stream socket primitive
pub trait ByteSocket: Send {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;

    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;

    fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>>;

    /// Pending socket error (SO_ERROR)
    fn take_error(&self) -> io::Result<Option<io::Error>>;

    /// Whether the handshake has completed
    fn is_connected(&self) -> bool;
}

pub struct ByteStream<S: ByteSocket> {
    name: String,
    socket: S,
    status: ConnectStatus,
}

impl<S: ByteSocket> ByteStream<S> {
    pub fn new(name: &str, socket: S, status: ConnectStatus) -> Self {
        Self {
            name: name.to_string(),
            socket,
            status,
        }
    }

    fn failed() -> StreamError {
        StreamError::Io(io::Error::new(
            io::ErrorKind::NotConnected,
            "connection attempt failed",
        ))
    }
}

impl<S: ByteSocket> Stream for ByteStream<S> {
    fn name(&self) -> &str {
        &self.name
    }

    fn status(&self) -> ConnectStatus {
        self.status
    }

    fn connect(&mut self) -> Result<(), StreamError> {
        match self.status {
            ConnectStatus::Connected => Ok(()),
            ConnectStatus::Failed => Err(Self::failed()),
            ConnectStatus::Connecting => {
                if let Some(e) = self.socket.take_error()? {
                    warn!("{}: connection failed: {}", self.name, e);
                    self.status = ConnectStatus::Failed;
                    return Err(StreamError::Io(e));
                }
                if self.socket.is_connected() {
                    info!("{}: connected", self.name);
                    self.status = ConnectStatus::Connected;
                    Ok(())
                } else {
                    Err(StreamError::WouldBlock)
                }
            }
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        self.connect()?;
        match self.socket.try_read(buf) {
            Ok(n) => {
                debug!("{}: received {} bytes", self.name, n);
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(StreamError::WouldBlock),
            Err(e) => {
                error!("{}: recv error: {}", self.name, e);
                Err(StreamError::Io(e))
            }
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        self.connect()?;
        match self.socket.try_write(buf) {
            Ok(n) => {
                debug!("{}: sent {} of {} bytes", self.name, n, buf.len());
                Ok(n)
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(StreamError::WouldBlock),
            Err(e) => {
                error!("{}: send error: {}", self.name, e);
                Err(StreamError::Io(e))
            }
        }
    }

    fn wait(&mut self, cx: &mut Context<'_>, wait: Wait) -> Poll<()> {
        match (wait, self.status) {
            (_, ConnectStatus::Failed) => Poll::Ready(()),
            (Wait::Connect, ConnectStatus::Connected) => Poll::Ready(()),
            // Writability signals completion of a non-blocking connect
            (_, ConnectStatus::Connecting) | (Wait::Send, _) => {
                self.socket.poll_write_ready(cx).map(|_| ())
            }
            (Wait::Recv, ConnectStatus::Connected) => self.socket.poll_read_ready(cx).map(|_| ()),
        }
    }
}

impl<S: ByteSocket> Drop for ByteStream<S> {
    fn drop(&mut self) {
        info!("Closing stream {}", self.name);
    }
}

/// Classify the result of a non-blocking `connect()`
pub(crate) fn connect_status(result: io::Result<()>) -> io::Result<ConnectStatus> {
    match result {
        Ok(()) => Ok(ConnectStatus::Connected),
        Err(e)
            if e.kind() == io::ErrorKind::WouldBlock
                || e.raw_os_error() == Some(libc::EINPROGRESS) =>
        {
            Ok(ConnectStatus::Connecting)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::task::noop_waker_ref;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Wire {
        connected: bool,
        pending_error: Option<io::ErrorKind>,
        inbound: Vec<u8>,
        written: Vec<u8>,
        write_limit: Option<usize>,
    }

    struct MockSocket(Arc<Mutex<Wire>>);

    impl ByteSocket for MockSocket {
        fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
            let mut wire = self.0.lock().unwrap();
            if wire.inbound.is_empty() {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let n = wire.inbound.len().min(buf.len());
            buf[..n].copy_from_slice(&wire.inbound[..n]);
            wire.inbound.drain(..n);
            Ok(n)
        }

        fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
            let mut wire = self.0.lock().unwrap();
            let n = wire.write_limit.map_or(buf.len(), |l| l.min(buf.len()));
            wire.written.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn poll_read_ready(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Pending
        }

        fn poll_write_ready(&self, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            if self.0.lock().unwrap().connected {
                Poll::Ready(Ok(()))
            } else {
                Poll::Pending
            }
        }

        fn take_error(&self) -> io::Result<Option<io::Error>> {
            Ok(self.0.lock().unwrap().pending_error.take().map(io::Error::from))
        }

        fn is_connected(&self) -> bool {
            self.0.lock().unwrap().connected
        }
    }

    fn connecting() -> (ByteStream<MockSocket>, Arc<Mutex<Wire>>) {
        let wire = Arc::new(Mutex::new(Wire::default()));
        let stream = ByteStream::new(
            "tcp:127.0.0.1:6653",
            MockSocket(wire.clone()),
            ConnectStatus::Connecting,
        );
        (stream, wire)
    }

    #[test]
    fn test_connect_in_progress() {
        let (mut stream, wire) = connecting();
        assert!(stream.connect().unwrap_err().is_would_block());
        assert!(stream.send(b"x").unwrap_err().is_would_block());

        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(stream.wait(&mut cx, Wait::Connect).is_pending());

        wire.lock().unwrap().connected = true;
        assert_eq!(stream.wait(&mut cx, Wait::Connect), Poll::Ready(()));
        assert!(stream.connect().is_ok());
        assert_eq!(stream.status(), ConnectStatus::Connected);
    }

    #[test]
    fn test_connect_failure() {
        let (mut stream, wire) = connecting();
        wire.lock().unwrap().pending_error = Some(io::ErrorKind::ConnectionRefused);

        match stream.connect() {
            Err(StreamError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::ConnectionRefused),
            other => panic!("expected refusal, got {:?}", other),
        }
        assert_eq!(stream.status(), ConnectStatus::Failed);
        assert!(stream.recv(&mut [0u8; 4]).is_err());
    }

    #[test]
    fn test_partial_write_is_reported() {
        let (mut stream, wire) = connecting();
        {
            let mut wire = wire.lock().unwrap();
            wire.connected = true;
            wire.write_limit = Some(3);
        }
        assert_eq!(stream.send(b"abcdef").expect("send"), 3);
        assert_eq!(wire.lock().unwrap().written, b"abc");
    }

    #[test]
    fn test_recv_bytes() {
        let (mut stream, wire) = connecting();
        {
            let mut wire = wire.lock().unwrap();
            wire.connected = true;
            wire.inbound = b"hello".to_vec();
        }
        let mut buf = [0u8; 3];
        assert_eq!(stream.recv(&mut buf).expect("recv"), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(stream.recv(&mut buf).expect("recv"), 2);
        assert!(stream.recv(&mut buf).unwrap_err().is_would_block());
    }

    #[test]
    fn test_connect_status_classification() {
        assert_eq!(connect_status(Ok(())).unwrap(), ConnectStatus::Connected);
        assert_eq!(
            connect_status(Err(io::Error::from_raw_os_error(libc::EINPROGRESS))).unwrap(),
            ConnectStatus::Connecting
        );
        assert!(connect_status(Err(io::ErrorKind::ConnectionRefused.into())).is_err());
    }
}
