//! Connection management on top of [`Vconn`](crate::vconn::Vconn)
//!
//! This module handles:
//! - Opening a target through the transport registry, with reconnect backoff
//! - Driving the connection: receive, transmit-slot flushing, readiness waits
//! - Echo probes and inactivity detection for transports that want them

mod manager;

pub use manager::{ConnectionConfig, ConnectionEvent, ConnectionManager};
