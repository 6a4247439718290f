//! Length-prefixed framing over a connection-oriented byte stream
//!
//! Message boundaries come from the header's length field. Partial reads are
//! accumulated and partial writes keep their unsent remainder in the transmit
//! slot until [`VconnImpl::run`] drains it.

use crate::transport::{tcp, OpenOptions, Stream, StreamError, Wait};
use crate::vconn::{SendStatus, VconnError, VconnImpl};
use bytes::Bytes;
use ofconn_shared::codec::FrameDecoder;
use std::task::{Context, Poll};
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;

pub struct FramedVconn {
    decoder: FrameDecoder,
    scratch: Vec<u8>,
    /// Unsent remainder of the message being written
    txbuf: Option<Bytes>,
    stream: Box<dyn Stream>,
}

impl FramedVconn {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        Self {
            decoder: FrameDecoder::new(),
            scratch: vec![0; READ_CHUNK],
            txbuf: None,
            stream,
        }
    }

    fn write_some(&mut self, msg: Bytes) -> Result<(), VconnError> {
        match self.stream.send(&msg) {
            Ok(n) if n == msg.len() => Ok(()),
            Ok(n) => {
                debug!("{}: wrote {} of {} bytes", self.stream.name(), n, msg.len());
                self.txbuf = Some(msg.slice(n..));
                Ok(())
            }
            Err(StreamError::WouldBlock) => {
                self.txbuf = Some(msg);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl VconnImpl for FramedVconn {
    fn connect(&mut self) -> Result<(), VconnError> {
        Ok(self.stream.connect()?)
    }

    fn recv(&mut self) -> Result<Bytes, VconnError> {
        if let Some(msg) = self.decoder.decode_next()? {
            return Ok(msg);
        }

        let n = self.stream.recv(&mut self.scratch)?;
        if n == 0 {
            if !self.decoder.is_empty() {
                warn!(
                    "{}: peer closed with {} bytes of an incomplete message buffered",
                    self.stream.name(),
                    self.decoder.buffer_len()
                );
            }
            return Err(VconnError::Eof);
        }
        self.decoder.extend(&self.scratch[..n]);

        match self.decoder.decode_next()? {
            Some(msg) => Ok(msg),
            None => Err(VconnError::WouldBlock),
        }
    }

    fn send(&mut self, msg: Bytes) -> Result<SendStatus, VconnError> {
        if self.txbuf.is_some() {
            return Err(VconnError::WouldBlock);
        }
        self.write_some(msg)?;
        if self.txbuf.is_some() {
            Ok(SendStatus::Queued)
        } else {
            Ok(SendStatus::Sent)
        }
    }

    fn run(&mut self) -> Result<(), VconnError> {
        self.stream.run();
        match self.txbuf.take() {
            Some(rest) => self.write_some(rest),
            None => Ok(()),
        }
    }

    fn wait(&mut self, cx: &mut Context<'_>, wait: Wait) -> Poll<()> {
        match wait {
            Wait::Send if self.txbuf.is_none() => Poll::Pending,
            _ => self.stream.wait(cx, wait),
        }
    }

    fn has_pending_send(&self) -> bool {
        self.txbuf.is_some()
    }
}

/// Open function registered for the `tcp` transport
pub fn open_tcp(
    name: &str,
    suffix: &str,
    opts: &OpenOptions,
) -> Result<Box<dyn VconnImpl>, VconnError> {
    let stream = tcp::open_stream(name, suffix, opts)?;
    Ok(Box::new(FramedVconn::new(stream)))
}

/// Open function registered for the `unix` transport
#[cfg(unix)]
pub fn open_unix(
    name: &str,
    suffix: &str,
    opts: &OpenOptions,
) -> Result<Box<dyn VconnImpl>, VconnError> {
    let stream = crate::transport::unix::open_stream(name, suffix, opts)?;
    Ok(Box::new(FramedVconn::new(stream)))
}
