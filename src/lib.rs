//! Message-oriented connections over pluggable transports
//!
//! - [`transport`]: non-blocking [`Stream`]s over UDP, TCP and Unix sockets
//! - [`vconn`]: whole-message [`Vconn`] connections on top of a stream
//! - [`registry`]: `<transport>:<address>` target resolution
//! - [`connection`]: a reconnecting manager that drives one connection

pub mod connection;
pub mod registry;
pub mod transport;
pub mod vconn;

pub use registry::{OpenError, Registry, RegistryError, TransportClass};
pub use transport::{OpenOptions, Stream, StreamError, Wait};
pub use vconn::{SendStatus, Vconn, VconnError};
