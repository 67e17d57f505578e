use crate::transport::{Endpoint, Network, SharedTransport, Transport, TransportError};
use async_trait::async_trait;
use std::{net::SocketAddr, sync::Arc};
use tokio::{net::UdpSocket, sync::Mutex};

/// The largest datagram a UDP socket can deliver.
const MAX_DATAGRAM: usize = 65_535;

/// Opens real UDP sockets.
#[derive(Debug, Clone, Copy, Default)]
pub struct UdpNetwork;

impl UdpNetwork {
    pub fn new() -> Self {
        Self
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Network for UdpNetwork {
    async fn open(&self, local: Endpoint) -> Result<SharedTransport, TransportError> {
        Ok(Arc::new(UdpTransport::bind(local).await?))
    }
}

/// A bound UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local: Endpoint,
    /// Receive buffer shared by every `recv` call on this socket.
    buffer: Mutex<Box<[u8]>>,
}

impl UdpTransport {
    /// Binds to `local`. Port zero picks a free port.
    pub async fn bind(local: Endpoint) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(SocketAddr::from(local)).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                TransportError::AddressInUse(local)
            } else {
                e.into()
            }
        })?;
        let local = socket.local_addr()?.try_into()?;
        Ok(Self {
            socket,
            local,
            buffer: Mutex::new(vec![0; MAX_DATAGRAM].into_boxed_slice()),
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    async fn send(&self, to: Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(bytes, SocketAddr::from(to)).await?;
        Ok(())
    }

    async fn recv(&self) -> Result<(Endpoint, Vec<u8>), TransportError> {
        let mut buffer = self.buffer.lock().await;
        let (length, sender) = self.socket.recv_from(&mut buffer[..]).await?;
        Ok((sender.try_into()?, buffer[..length].to_vec()))
    }
}
