//! The datagram transport the protocol runs over.
//!
//! A [`Network`] opens [`Transport`] handles bound to local endpoints. Delivery
//! is best-effort: datagrams may be lost or reordered and nothing is retried
//! at this layer. Every node opens two handles, one for control traffic and
//! one for coupling data.

use crate::pdu::{BuildError, Pdu};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display, Formatter},
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
    sync::Arc,
};
use thiserror::Error as ThisError;

/// An IPv4 address and port pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub const fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }

    pub const fn localhost(port: u16) -> Self {
        Self::new(Ipv4Addr::LOCALHOST, port)
    }
}

impl From<Endpoint> for SocketAddr {
    fn from(endpoint: Endpoint) -> Self {
        SocketAddr::V4(SocketAddrV4::new(endpoint.address, endpoint.port))
    }
}

impl TryFrom<SocketAddr> for Endpoint {
    type Error = TransportError;

    fn try_from(address: SocketAddr) -> Result<Self, Self::Error> {
        match address {
            SocketAddr::V4(v4) => Ok(Self::new(*v4.ip(), v4.port())),
            SocketAddr::V6(_) => Err(TransportError::NotIpv4(address)),
        }
    }
}

impl Display for Endpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A handle on one open local endpoint.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// The endpoint the handle is bound to.
    fn local_endpoint(&self) -> Endpoint;

    /// Sends one datagram. Success means the datagram left, not that it
    /// arrived.
    async fn send(&self, to: Endpoint, bytes: &[u8]) -> Result<(), TransportError>;

    /// Waits for the next datagram and returns it with its sender.
    async fn recv(&self) -> Result<(Endpoint, Vec<u8>), TransportError>;

    async fn send_pdu(&self, to: Endpoint, pdu: &Pdu) -> Result<(), TransportError> {
        let bytes = pdu.build()?;
        self.send(to, &bytes).await
    }
}

/// Opens transport handles.
#[async_trait]
pub trait Network: Send + Sync + 'static {
    async fn open(&self, local: Endpoint) -> Result<SharedTransport, TransportError>;
}

pub type SharedTransport = Arc<dyn Transport>;
pub type SharedNetwork = Arc<dyn Network>;

#[derive(Debug, ThisError)]
pub enum TransportError {
    #[error("Socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Could not encode the PDU: {0}")]
    Build(#[from] BuildError),
    #[error("Endpoint {0} is already open")]
    AddressInUse(Endpoint),
    #[error("Received a datagram from the non-IPv4 address {0}")]
    NotIpv4(SocketAddr),
    #[error("The transport was closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_socket_addr_conversion() {
        let endpoint = Endpoint::new(Ipv4Addr::new(192, 168, 1, 4), 5000);
        let socket: SocketAddr = endpoint.into();
        assert_eq!(socket.to_string(), "192.168.1.4:5000");
        assert_eq!(Endpoint::try_from(socket).unwrap(), endpoint);
        assert!(Endpoint::try_from("[::1]:80".parse::<SocketAddr>().unwrap()).is_err());
    }
}
