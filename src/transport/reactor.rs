//! Reactor registration for plain non-blocking sockets
//!
//! Reads and writes go straight to the OS socket, so `WouldBlock` only ever
//! means the kernel said EAGAIN. The tokio reactor is used for readiness
//! alone: a readiness report is confirmed with a zero-timeout `poll(2)` and
//! cleared when the socket turns out not to be ready after all.

use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::task::{ready, Context, Poll};
use tokio::io::unix::AsyncFd;
use tokio::io::Interest;

/// A non-blocking socket registered with the current tokio runtime
pub struct Registered<T: AsRawFd> {
    fd: AsyncFd<T>,
}

impl<T: AsRawFd> Registered<T> {
    /// Register `socket`, which must already be in non-blocking mode
    pub fn new(socket: T) -> io::Result<Self> {
        let fd = AsyncFd::with_interest(socket, Interest::READABLE | Interest::WRITABLE)?;
        Ok(Self { fd })
    }

    pub fn get_ref(&self) -> &T {
        self.fd.get_ref()
    }

    pub fn poll_read_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_read_ready(cx))?;
            match guard.try_io(|fd| poll_now(fd.as_raw_fd(), libc::POLLIN)) {
                Ok(result) => return Poll::Ready(result),
                // Stale readiness was cleared; poll again to register the waker
                Err(_would_block) => continue,
            }
        }
    }

    pub fn poll_write_ready(&self, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.fd.poll_write_ready(cx))?;
            match guard.try_io(|fd| poll_now(fd.as_raw_fd(), libc::POLLOUT)) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }
}

/// Level-triggered readiness check that never blocks. Error and hangup
/// conditions count as ready so the next I/O call can report them.
fn poll_now(fd: RawFd, events: libc::c_short) -> io::Result<()> {
    let mut pfd = libc::pollfd {
        fd,
        events,
        revents: 0,
    };
    // SAFETY: `pfd` is a single valid pollfd and the timeout is zero
    let rc = unsafe { libc::poll(&mut pfd, 1, 0) };
    match rc {
        n if n < 0 => Err(io::Error::last_os_error()),
        0 => Err(io::ErrorKind::WouldBlock.into()),
        _ => Ok(()),
    }
}
