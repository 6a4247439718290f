pub mod addr;
pub mod byte_stream;
pub mod reactor;
pub mod tcp;
pub mod traits;
pub mod udp;
#[cfg(unix)]
pub mod unix;

pub use addr::parse_inet_active;
pub use byte_stream::{ByteSocket, ByteStream};
pub use reactor::Registered;
pub use traits::{ConnectStatus, DatagramSocket, OpenOptions, Stream, StreamError, Wait};
pub use udp::UdpStream;
