//! Virtual connections: message framing on top of a [`Stream`]
//!
//! A [`Vconn`] is the handle a connection manager holds. It tracks the
//! `Connecting -> Connected -> Closed` lifecycle, stores the allowed and
//! negotiated protocol versions, and delegates framing to a per-transport
//! [`VconnImpl`].
//!
//! [`Stream`]: crate::transport::Stream

pub mod datagram;
pub mod framed;
#[cfg(test)]
pub(crate) mod mock;

use crate::transport::{StreamError, Wait};
use bytes::Bytes;
use ofconn_shared::{CodecError, ConnEvent, ConnState, ConnStateMachine, Transition, VersionBitmap};
use std::task::{Context, Poll};
use thiserror::Error;
use tracing::{debug, info, warn};

pub use datagram::DatagramVconn;
pub use framed::FramedVconn;

/// Outcome of a successful [`Vconn::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    /// Handed to the transport in full
    Sent,
    /// Transport would block; the message now sits in the transmit slot
    /// and is flushed by [`Vconn::run`]
    Queued,
}

#[derive(Error, Debug)]
pub enum VconnError {
    /// Nothing usable right now; retry after the next readiness signal
    #[error("operation would block")]
    WouldBlock,

    #[error("connection is closed")]
    Closed,

    #[error("connection closed by peer")]
    Eof,

    #[error("message of {len} bytes exceeds the {max}-byte transport limit")]
    MessageTooLarge { len: usize, max: usize },

    #[error("framing error: {0}")]
    Protocol(#[from] CodecError),

    #[error(transparent)]
    Stream(StreamError),
}

impl VconnError {
    pub fn is_would_block(&self) -> bool {
        matches!(self, VconnError::WouldBlock)
    }
}

impl From<StreamError> for VconnError {
    fn from(e: StreamError) -> Self {
        match e {
            StreamError::WouldBlock => VconnError::WouldBlock,
            other => VconnError::Stream(other),
        }
    }
}

/// Per-transport framing behind a [`Vconn`].
///
/// Dropping an implementation releases its buffers and then its stream.
pub trait VconnImpl: Send {
    /// Advance connection setup; `Err(WouldBlock)` while still in progress
    fn connect(&mut self) -> Result<(), VconnError>;

    /// Receive one complete message
    fn recv(&mut self) -> Result<Bytes, VconnError>;

    /// Send one complete message
    fn send(&mut self, msg: Bytes) -> Result<SendStatus, VconnError>;

    /// Maintenance: drive the stream and flush the transmit slot
    fn run(&mut self) -> Result<(), VconnError>;

    fn wait(&mut self, cx: &mut Context<'_>, wait: Wait) -> Poll<()>;

    /// Whether a message is waiting in the transmit slot
    fn has_pending_send(&self) -> bool;
}

/// An open message-oriented connection
pub struct Vconn {
    name: String,
    allowed_versions: VersionBitmap,
    version: Option<u8>,
    needs_probes: bool,
    fsm: ConnStateMachine,
    inner: Option<Box<dyn VconnImpl>>,
    /// Error from a background flush, reported at the next observation point
    deferred_error: Option<VconnError>,
}

impl Vconn {
    /// Wrap a freshly opened transport; the connection starts in `Connecting`
    pub fn new(
        name: &str,
        inner: Box<dyn VconnImpl>,
        allowed_versions: VersionBitmap,
        needs_probes: bool,
    ) -> Self {
        Self {
            name: name.to_string(),
            allowed_versions,
            version: None,
            needs_probes,
            fsm: ConnStateMachine::new(),
            inner: Some(inner),
            deferred_error: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ConnState {
        self.fsm.state()
    }

    pub fn allowed_versions(&self) -> VersionBitmap {
        self.allowed_versions
    }

    /// Negotiated version, once the layer above has settled on one
    pub fn version(&self) -> Option<u8> {
        self.version
    }

    pub fn set_version(&mut self, version: u8) {
        if !self.allowed_versions.contains(version) {
            warn!("{}: negotiated version 0x{:02x} not in allowed set {}", self.name, version, self.allowed_versions);
        }
        self.version = Some(version);
    }

    /// Whether the transport wants liveness probes from its manager
    pub fn needs_probes(&self) -> bool {
        self.needs_probes
    }

    pub fn has_pending_send(&self) -> bool {
        self.inner.as_ref().is_some_and(|inner| inner.has_pending_send())
    }

    /// Advance `Connecting -> Connected`
    pub fn connect(&mut self) -> Result<(), VconnError> {
        match self.fsm.state() {
            ConnState::Connected => Ok(()),
            ConnState::Closed => Err(VconnError::Closed),
            ConnState::Connecting => {
                let inner = self.inner.as_mut().ok_or(VconnError::Closed)?;
                match inner.connect() {
                    Ok(()) => {
                        self.transition(ConnEvent::ConnectComplete);
                        Ok(())
                    }
                    Err(VconnError::WouldBlock) => Err(VconnError::WouldBlock),
                    Err(e) => {
                        warn!("{}: connection failed: {}", self.name, e);
                        self.transition(ConnEvent::ConnectFailed);
                        self.inner = None;
                        Err(e)
                    }
                }
            }
        }
    }

    /// Receive one message.
    ///
    /// `Err(WouldBlock)` covers both "nothing arrived" and "something
    /// arrived but was not a usable message".
    pub fn recv(&mut self) -> Result<Bytes, VconnError> {
        self.ready()?;
        let inner = self.inner.as_mut().ok_or(VconnError::Closed)?;
        inner.recv()
    }

    /// Send one message.
    ///
    /// The message is either transmitted, kept in the transmit slot
    /// ([`SendStatus::Queued`]), or rejected with an error. The
    /// connection stays usable after a size-limit rejection.
    pub fn send(&mut self, msg: Bytes) -> Result<SendStatus, VconnError> {
        self.ready()?;
        let inner = self.inner.as_mut().ok_or(VconnError::Closed)?;
        inner.send(msg)
    }

    /// Periodic maintenance: finishes a pending connect and flushes the
    /// transmit slot. Errors are held until the next `recv`, `send` or
    /// [`Vconn::take_error`].
    pub fn run(&mut self) {
        match self.connect() {
            Ok(()) => {}
            Err(VconnError::WouldBlock) | Err(VconnError::Closed) => return,
            Err(e) => {
                self.deferred_error = Some(e);
                return;
            }
        }

        if let Some(inner) = self.inner.as_mut() {
            if let Err(e) = inner.run() {
                debug!("{}: deferring run error: {}", self.name, e);
                self.deferred_error = Some(e);
            }
        }
    }

    /// Register readiness interest. `Send` interest is only registered while
    /// a message is queued.
    pub fn wait(&mut self, cx: &mut Context<'_>, wait: Wait) -> Poll<()> {
        if self.deferred_error.is_some() {
            return Poll::Ready(());
        }
        let connecting = self.fsm.state() == ConnState::Connecting;
        match self.inner.as_mut() {
            None => Poll::Ready(()),
            Some(inner) if connecting => inner.wait(cx, Wait::Connect),
            Some(inner) => inner.wait(cx, wait),
        }
    }

    /// Take the error left behind by [`Vconn::run`], if any
    pub fn take_error(&mut self) -> Option<VconnError> {
        self.deferred_error.take()
    }

    /// Release buffered messages and the stream. Safe to call repeatedly.
    pub fn close(&mut self) {
        if let Some(inner) = self.inner.take() {
            info!("Closing vconn {}", self.name);
            drop(inner);
        }
        self.deferred_error = None;
        self.transition(ConnEvent::Close);
    }

    fn ready(&mut self) -> Result<(), VconnError> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        self.connect()
    }

    fn transition(&mut self, event: ConnEvent) {
        match self.fsm.process_event(event) {
            Transition::Changed { from, to } => debug!("{}: {} -> {}", self.name, from, to),
            Transition::Unchanged(_) => {}
            Transition::Invalid { from, event } => {
                warn!("{}: ignoring {:?} in state {}", self.name, event, from)
            }
        }
    }
}

impl std::fmt::Debug for Vconn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vconn")
            .field("name", &self.name)
            .field("state", &self.fsm.state())
            .field("allowed_versions", &self.allowed_versions)
            .field("version", &self.version)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vconn::mock::{MockHandle, SendAction};
    use futures::task::noop_waker_ref;
    use ofconn_shared::{codec::encode_message, msg_type, version};

    fn hello(xid: u32) -> Bytes {
        encode_message(version::OFP13, msg_type::HELLO, xid, &[]).expect("encode")
    }

    fn datagram_vconn() -> (Vconn, MockHandle) {
        let stream = MockHandle::datagram(1500);
        let inner = DatagramVconn::new(stream.boxed());
        let vconn = Vconn::new(
            "udp:192.0.2.1:6653",
            Box::new(inner),
            VersionBitmap::from_versions(&[version::OFP10, version::OFP13]),
            false,
        );
        (vconn, stream)
    }

    #[test]
    fn test_datagram_vconn_connects_immediately() {
        let (mut vconn, _stream) = datagram_vconn();
        assert_eq!(vconn.state(), ConnState::Connecting);
        vconn.connect().expect("connect");
        assert_eq!(vconn.state(), ConnState::Connected);
    }

    #[test]
    fn test_connecting_vconn_reports_would_block() {
        let stream = MockHandle::datagram(1500);
        stream.state().connect_polls = 2;
        let mut vconn = Vconn::new(
            "tcp:192.0.2.1:6653",
            Box::new(FramedVconn::new(stream.boxed())),
            VersionBitmap::ALL,
            true,
        );

        assert!(vconn.recv().unwrap_err().is_would_block());
        assert!(vconn.send(hello(1)).unwrap_err().is_would_block());
        assert_eq!(vconn.state(), ConnState::Connecting);
        assert_eq!(stream.state().send_calls, 0);

        vconn.run();
        assert_eq!(vconn.state(), ConnState::Connected);
    }

    #[test]
    fn test_close_releases_stream_once() {
        let (mut vconn, stream) = datagram_vconn();
        vconn.connect().expect("connect");

        vconn.close();
        vconn.close();
        assert_eq!(stream.state().drops, 1);
        assert_eq!(vconn.state(), ConnState::Closed);
    }

    #[test]
    fn test_operations_after_close() {
        let (mut vconn, stream) = datagram_vconn();
        vconn.close();

        assert!(matches!(vconn.recv(), Err(VconnError::Closed)));
        assert!(matches!(vconn.send(hello(1)), Err(VconnError::Closed)));
        assert!(matches!(vconn.connect(), Err(VconnError::Closed)));
        vconn.run();

        let mut cx = Context::from_waker(noop_waker_ref());
        assert_eq!(vconn.wait(&mut cx, Wait::Recv), Poll::Ready(()));
        assert_eq!(stream.state().send_calls, 0);
    }

    #[test]
    fn test_close_discards_queued_message() {
        let (mut vconn, stream) = datagram_vconn();
        stream.state().send_script.push_back(SendAction::WouldBlock);

        assert_eq!(vconn.send(hello(1)).expect("send"), SendStatus::Queued);
        assert!(vconn.has_pending_send());

        vconn.close();
        assert!(!vconn.has_pending_send());
        assert!(stream.state().sent.is_empty());
        assert_eq!(stream.state().drops, 1);
    }

    #[test]
    fn test_flush_error_surfaces_on_next_recv() {
        let (mut vconn, stream) = datagram_vconn();
        {
            let mut state = stream.state();
            state.send_script.push_back(SendAction::WouldBlock);
            state.send_script.push_back(SendAction::Fail(std::io::ErrorKind::PermissionDenied));
        }

        assert_eq!(vconn.send(hello(1)).expect("send"), SendStatus::Queued);
        vconn.run();
        assert!(!vconn.has_pending_send());

        let mut cx = Context::from_waker(noop_waker_ref());
        assert_eq!(vconn.wait(&mut cx, Wait::Recv), Poll::Ready(()));

        assert!(matches!(vconn.recv(), Err(VconnError::Stream(StreamError::Io(_)))));
        // Reported once; the connection itself is still usable
        assert!(vconn.recv().unwrap_err().is_would_block());
        assert_eq!(vconn.state(), ConnState::Connected);
    }

    #[test]
    fn test_take_error_status_query() {
        let (mut vconn, stream) = datagram_vconn();
        {
            let mut state = stream.state();
            state.send_script.push_back(SendAction::WouldBlock);
            state.send_script.push_back(SendAction::Fail(std::io::ErrorKind::NetworkUnreachable));
        }
        vconn.send(hello(1)).expect("send");
        vconn.run();

        assert!(vconn.take_error().is_some());
        assert!(vconn.take_error().is_none());
    }

    #[test]
    fn test_version_bookkeeping() {
        let (mut vconn, _stream) = datagram_vconn();
        assert!(vconn.allowed_versions().contains(version::OFP13));
        assert_eq!(vconn.version(), None);

        vconn.set_version(version::OFP13);
        assert_eq!(vconn.version(), Some(version::OFP13));
        assert!(!vconn.needs_probes());
    }

    #[test]
    fn test_send_interest_only_when_queued() {
        let (mut vconn, stream) = datagram_vconn();
        vconn.connect().expect("connect");

        let mut cx = Context::from_waker(noop_waker_ref());
        assert!(vconn.wait(&mut cx, Wait::Send).is_pending());

        stream.state().send_script.push_back(SendAction::WouldBlock);
        vconn.send(hello(2)).expect("send");
        assert_eq!(vconn.wait(&mut cx, Wait::Send), Poll::Ready(()));
    }
}
