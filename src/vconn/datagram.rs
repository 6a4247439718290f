//! Datagram framing: one datagram carries exactly one message
//!
//! Whatever a single receive returns is either a whole message or garbage.
//! A header that claims more bytes than arrived can never be completed by a
//! later read, so such datagrams are dropped and reported as `WouldBlock`
//! instead of tearing the connection down. Bytes beyond the declared length
//! are padding and are cut off.

use crate::transport::{udp, OpenOptions, Stream, StreamError, Wait};
use crate::vconn::{SendStatus, VconnError, VconnImpl};
use bytes::{Bytes, BytesMut};
use ofconn_shared::codec::{check_datagram, DatagramCheck};
use ofconn_shared::MAX_MESSAGE_SIZE;
use std::task::{Context, Poll};
use tracing::{debug, error, warn};

pub struct DatagramVconn {
    // Buffers are declared before the stream so they are released first
    /// Receive buffer, allocated on first use and reused afterwards
    rxbuf: Option<BytesMut>,
    /// Single transmit slot; a newer message replaces an unsent older one
    txbuf: Option<Bytes>,
    max_unit: usize,
    stream: Box<dyn Stream>,
}

impl DatagramVconn {
    pub fn new(stream: Box<dyn Stream>) -> Self {
        let max_unit = stream
            .max_unit()
            .map_or(MAX_MESSAGE_SIZE, |unit| unit.min(MAX_MESSAGE_SIZE));
        Self {
            rxbuf: None,
            txbuf: None,
            max_unit,
            stream,
        }
    }

    /// Largest message `send` accepts
    pub fn max_unit(&self) -> usize {
        self.max_unit
    }
}

impl VconnImpl for DatagramVconn {
    fn connect(&mut self) -> Result<(), VconnError> {
        Ok(self.stream.connect()?)
    }

    fn recv(&mut self) -> Result<Bytes, VconnError> {
        let rx = self
            .rxbuf
            .get_or_insert_with(|| BytesMut::zeroed(MAX_MESSAGE_SIZE));

        let received = self.stream.recv(&mut rx[..])?;
        let datagram = &rx[..received];

        match check_datagram(datagram) {
            DatagramCheck::Complete { len } => {
                if len < received {
                    debug!(
                        "{}: ignoring {} bytes of padding after {}-byte message",
                        self.stream.name(),
                        received - len,
                        len
                    );
                }
                debug!("{}: received {}-byte message", self.stream.name(), len);
                Ok(Bytes::copy_from_slice(&datagram[..len]))
            }
            DatagramCheck::TooShort { received } => {
                warn!("{}: discarding {}-byte datagram, too short for a header", self.stream.name(), received);
                Err(VconnError::WouldBlock)
            }
            DatagramCheck::Truncated { declared, received } => {
                warn!(
                    "{}: message claims {} bytes but only {} received, discarding",
                    self.stream.name(),
                    declared,
                    received
                );
                Err(VconnError::WouldBlock)
            }
            DatagramCheck::Undersized { declared } => {
                warn!(
                    "{}: discarding datagram with impossible length field {}",
                    self.stream.name(),
                    declared
                );
                Err(VconnError::WouldBlock)
            }
        }
    }

    fn send(&mut self, msg: Bytes) -> Result<SendStatus, VconnError> {
        let len = msg.len();
        if len > self.max_unit {
            error!("{}: {}-byte message too large for one datagram", self.stream.name(), len);
            return Err(VconnError::MessageTooLarge {
                len,
                max: self.max_unit,
            });
        }

        match self.stream.send(&msg) {
            Ok(n) if n == len => {
                if self.txbuf.take().is_some() {
                    debug!("{}: newer message sent, dropping queued one", self.stream.name());
                }
                debug!("{}: sent {}-byte message", self.stream.name(), len);
                Ok(SendStatus::Sent)
            }
            Ok(n) => Err(VconnError::Stream(StreamError::PartialDatagram { sent: n, len })),
            Err(StreamError::WouldBlock) => {
                if self.txbuf.replace(msg).is_some() {
                    debug!("{}: replacing unsent queued message", self.stream.name());
                }
                Ok(SendStatus::Queued)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn run(&mut self) -> Result<(), VconnError> {
        self.stream.run();

        let msg = match self.txbuf.take() {
            Some(msg) => msg,
            None => return Ok(()),
        };

        match self.stream.send(&msg) {
            Ok(n) if n == msg.len() => {
                debug!("{}: flushed queued {}-byte message", self.stream.name(), n);
                Ok(())
            }
            Ok(n) => Err(VconnError::Stream(StreamError::PartialDatagram {
                sent: n,
                len: msg.len(),
            })),
            Err(StreamError::WouldBlock) => {
                self.txbuf = Some(msg);
                Ok(())
            }
            Err(e) => {
                error!("{}: discarding queued message after send error: {}", self.stream.name(), e);
                Err(e.into())
            }
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

/// Open function registered for the `udp` transport
pub fn open_udp(
    name: &str,
    suffix: &str,
    opts: &OpenOptions,
) -> Result<Box<dyn VconnImpl>, VconnError> {
    let stream = udp::open_stream(name, suffix, opts)?;
    Ok(Box::new(DatagramVconn::new(stream)))
}
