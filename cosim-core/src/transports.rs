//! Implementations of [`Network`](crate::transport::Network).

mod memory;
pub use memory::{DropFilter, MemoryNetwork};

mod udp;
pub use udp::{UdpNetwork, UdpTransport};
