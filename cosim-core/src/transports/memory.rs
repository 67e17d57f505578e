use crate::transport::{Endpoint, Network, SharedTransport, Transport, TransportError};
use async_trait::async_trait;
use rand::{rngs::SmallRng, Rng, SeedableRng};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

type Datagram = (Endpoint, Vec<u8>);

/// Decides whether a datagram is dropped, given its sender, its destination
/// and its bytes.
pub type DropFilter = Arc<dyn Fn(Endpoint, Endpoint, &[u8]) -> bool + Send + Sync>;

/// The first port handed out when a handle is opened on port zero.
const EPHEMERAL_START: u16 = 49_152;

/// An in-process network. Endpoints are plain map keys, so any address can be
/// opened without touching the operating system. Datagrams can be dropped at
/// random with a fixed-seed generator or selectively with a filter.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<Inner>,
}

struct Inner {
    endpoints: Mutex<Registry>,
    rng: Mutex<SmallRng>,
    loss_rate: f64,
    filter: Option<DropFilter>,
}

struct Registry {
    senders: FxHashMap<Endpoint, mpsc::UnboundedSender<Datagram>>,
    next_ephemeral: u16,
}

impl MemoryNetwork {
    /// A lossless network.
    pub fn new() -> Self {
        Self::build(0.0, None)
    }

    /// A network that drops each datagram with probability `loss_rate`.
    pub fn lossy(loss_rate: f64) -> Self {
        Self::build(loss_rate.clamp(0.0, 1.0), None)
    }

    /// A network that drops every datagram `filter` returns true for.
    pub fn with_drop_filter(
        filter: impl Fn(Endpoint, Endpoint, &[u8]) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::build(0.0, Some(Arc::new(filter)))
    }

    fn build(loss_rate: f64, filter: Option<DropFilter>) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoints: Mutex::new(Registry {
                    senders: FxHashMap::default(),
                    next_ephemeral: EPHEMERAL_START,
                }),
                rng: Mutex::new(SmallRng::seed_from_u64(0xBAD5EED)),
                loss_rate,
                filter,
            }),
        }
    }

    pub fn shared(&self) -> Arc<Self> {
        Arc::new(self.clone())
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Network for MemoryNetwork {
    async fn open(&self, local: Endpoint) -> Result<SharedTransport, TransportError> {
        let mut registry = self.inner.endpoints.lock().map_err(|_| TransportError::Closed)?;
        let local = if local.port == 0 {
            let mut port = registry.next_ephemeral;
            while registry.senders.contains_key(&Endpoint::new(local.address, port)) {
                port = port.checked_add(1).unwrap_or(EPHEMERAL_START);
            }
            registry.next_ephemeral = port.checked_add(1).unwrap_or(EPHEMERAL_START);
            Endpoint::new(local.address, port)
        } else {
            local
        };
        // A handle whose receiver was dropped frees its endpoint
        if let Some(existing) = registry.senders.get(&local) {
            if !existing.is_closed() {
                return Err(TransportError::AddressInUse(local));
            }
        }
        let (send, receive) = mpsc::unbounded_channel();
        registry.senders.insert(local, send);
        Ok(Arc::new(MemoryTransport {
            local,
            network: self.inner.clone(),
            receiver: AsyncMutex::new(receive),
        }))
    }
}

struct MemoryTransport {
    local: Endpoint,
    network: Arc<Inner>,
    receiver: AsyncMutex<mpsc::UnboundedReceiver<Datagram>>,
}

impl MemoryTransport {
    fn dropped(&self, to: Endpoint, bytes: &[u8]) -> bool {
        if let Some(filter) = &self.network.filter {
            if filter(self.local, to, bytes) {
                return true;
            }
        }
        if self.network.loss_rate > 0.0 {
            if let Ok(mut rng) = self.network.rng.lock() {
                return rng.gen_bool(self.network.loss_rate);
            }
        }
        false
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_endpoint(&self) -> Endpoint {
        self.local
    }

    async fn send(&self, to: Endpoint, bytes: &[u8]) -> Result<(), TransportError> {
        if self.dropped(to, bytes) {
            tracing::trace!("Dropped a datagram from {} to {}", self.local, to);
            return Ok(());
        }
        let channel = {
            let registry = self
                .network
                .endpoints
                .lock()
                .map_err(|_| TransportError::Closed)?;
            registry.senders.get(&to).cloned()
        };
        match channel {
            Some(channel) => {
                if channel.send((self.local, bytes.to_vec())).is_err() {
                    tracing::trace!("Nobody is listening on {} anymore", to);
                }
            }
            None => tracing::trace!("Nobody is listening on {}", to),
        }
        Ok(())
    }

    async fn recv(&self) -> Result<(Endpoint, Vec<u8>), TransportError> {
        self.receiver
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    #[ntest::timeout(5000)]
    async fn delivers_between_handles() {
        let network = MemoryNetwork::new();
        let a = network.open(Endpoint::localhost(5000)).await.unwrap();
        let b = network.open(Endpoint::localhost(0)).await.unwrap();
        assert_eq!(b.local_endpoint().port, EPHEMERAL_START);
        b.send(a.local_endpoint(), &[1, 2, 3]).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), (b.local_endpoint(), vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn endpoints_are_exclusive_until_dropped() -> anyhow::Result<()> {
        let network = MemoryNetwork::new();
        let a = network.open(Endpoint::localhost(5000)).await?;
        assert!(matches!(
            network.open(Endpoint::localhost(5000)).await,
            Err(TransportError::AddressInUse(_))
        ));
        drop(a);
        network.open(Endpoint::localhost(5000)).await?;
        Ok(())
    }

    #[tokio::test]
    async fn filter_drops_selected_datagrams() -> anyhow::Result<()> {
        let network = MemoryNetwork::with_drop_filter(|_, _, bytes| bytes.first() == Some(&0));
        let a = network.open(Endpoint::localhost(1)).await?;
        let b = network.open(Endpoint::localhost(2)).await?;
        a.send(b.local_endpoint(), &[0]).await?;
        a.send(b.local_endpoint(), &[1]).await?;
        assert_eq!(b.recv().await?.1, vec![1]);
        let nothing = tokio::time::timeout(Duration::from_millis(50), b.recv()).await;
        assert!(nothing.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn full_loss_delivers_nothing() -> anyhow::Result<()> {
        let network = MemoryNetwork::lossy(1.0);
        let a = network.open(Endpoint::localhost(1)).await?;
        let b = network.open(Endpoint::localhost(2)).await?;
        for _ in 0..10 {
            a.send(b.local_endpoint(), &[7]).await?;
        }
        let nothing = tokio::time::timeout(Duration::from_millis(50), b.recv()).await;
        assert!(nothing.is_err());
        Ok(())
    }
}
