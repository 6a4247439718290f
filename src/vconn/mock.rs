//! Scripted in-memory stream for framing tests

use crate::transport::{ConnectStatus, Stream, StreamError, Wait};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};

/// What the next `send` call does
#[derive(Debug, Clone, Copy)]
pub enum SendAction {
    Accept,
    Partial(usize),
    WouldBlock,
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
pub struct MockState {
    /// Each entry is handed out by one `recv` call
    pub inbound: VecDeque<Result<Vec<u8>, io::ErrorKind>>,
    /// Consumed one per `send` call; empty means accept
    pub send_script: VecDeque<SendAction>,
    /// Bytes accepted by each `send`
    pub sent: Vec<Vec<u8>>,
    pub send_calls: usize,
    pub run_calls: usize,
    /// Number of `connect` calls that report `WouldBlock` before success
    pub connect_polls: usize,
    pub max_unit: Option<usize>,
    /// Streams dropped (closed)
    pub drops: usize,
}

/// Test-side view of a [`MockStream`]'s state
#[derive(Clone, Default)]
pub struct MockHandle(Arc<Mutex<MockState>>);

impl MockHandle {
    pub fn datagram(max_unit: usize) -> Self {
        let handle = Self::default();
        handle.state().max_unit = Some(max_unit);
        handle
    }

    pub fn byte_stream() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn boxed(&self) -> Box<dyn Stream> {
        Box::new(MockStream(self.0.clone()))
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        self.state().inbound.push_back(Ok(bytes.to_vec()));
    }
}

pub struct MockStream(Arc<Mutex<MockState>>);

impl Stream for MockStream {
    fn name(&self) -> &str {
        "mock:"
    }

    fn status(&self) -> ConnectStatus {
        if self.0.lock().unwrap().connect_polls > 0 {
            ConnectStatus::Connecting
        } else {
            ConnectStatus::Connected
        }
    }

    fn connect(&mut self) -> Result<(), StreamError> {
        let mut state = self.0.lock().unwrap();
        if state.connect_polls > 0 {
            state.connect_polls -= 1;
            return Err(StreamError::WouldBlock);
        }
        Ok(())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        let mut state = self.0.lock().unwrap();
        match state.inbound.pop_front() {
            Some(Ok(bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(n)
            }
            Some(Err(kind)) => Err(io::Error::from(kind).into()),
            None => Err(StreamError::WouldBlock),
        }
    }

    fn send(&mut self, buf: &[u8]) -> Result<usize, StreamError> {
        let mut state = self.0.lock().unwrap();
        state.send_calls += 1;
        match state.send_script.pop_front().unwrap_or(SendAction::Accept) {
            SendAction::Accept => {
                state.sent.push(buf.to_vec());
                Ok(buf.len())
            }
            SendAction::Partial(n) => {
                state.sent.push(buf[..n].to_vec());
                Ok(n)
            }
            SendAction::WouldBlock => Err(StreamError::WouldBlock),
            SendAction::Fail(kind) => Err(io::Error::from(kind).into()),
        }
    }

    fn run(&mut self) {
        self.0.lock().unwrap().run_calls += 1;
    }

    fn wait(&mut self, _cx: &mut Context<'_>, wait: Wait) -> Poll<()> {
        let state = self.0.lock().unwrap();
        let ready = match wait {
            Wait::Connect => state.connect_polls == 0,
            Wait::Recv => !state.inbound.is_empty(),
            Wait::Send => true,
        };
        if ready {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    fn max_unit(&self) -> Option<usize> {
        self.0.lock().unwrap().max_unit
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.lock() {
            state.drops += 1;
        }
    }
}
