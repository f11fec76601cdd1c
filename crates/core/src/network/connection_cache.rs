/// Per-destination cache of outbound tunnels
///
/// Each destination owns a slot guarded by its own async mutex, so the
/// check-then-connect sequence is atomic per address while unrelated
/// destinations proceed in parallel. Only usable channels stay cached: a
/// slot whose channel failed to connect or was spent by a write is
/// forgotten, and the next send to that destination reconnects.

use crate::protocol::{CodecError, Packet};
use crate::transport::{open_tunnel, OutboundChannel};
use hiddenlink_common::NodeConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

type Slot = Arc<Mutex<Option<Arc<OutboundChannel>>>>;

/// Connection cache
pub struct ConnectionCache {
    /// SOCKS proxy endpoint of the transport daemon
    proxy: String,

    connect_timeout: Duration,
    io_timeout: Duration,

    /// Destination address -> slot
    slots: RwLock<HashMap<String, Slot>>,
}

impl ConnectionCache {
    pub fn new(proxy: impl Into<String>, connect_timeout: Duration, io_timeout: Duration) -> Self {
        Self {
            proxy: proxy.into(),
            connect_timeout,
            io_timeout,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &NodeConfig) -> Self {
        Self::new(
            config.socks_endpoint(),
            config.connect_timeout(),
            config.io_timeout(),
        )
    }

    pub fn proxy(&self) -> &str {
        &self.proxy
    }

    async fn slot(&self, address: &str) -> Slot {
        if let Some(slot) = self.slots.read().await.get(address) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(address.to_string())
            .or_default()
            .clone()
    }

    /// Return the cached channel for `address`, reconnecting if it is not usable
    ///
    /// Never fails: an unreachable destination yields a disconnected channel.
    pub async fn resolve(&self, address: &str) -> Arc<OutboundChannel> {
        let slot = self.slot(address).await;
        let mut entry = slot.lock().await;
        let channel = self.resolve_locked(address, &mut entry).await;
        self.evict_unusable(address, &slot, &mut entry).await;
        channel
    }

    async fn resolve_locked(
        &self,
        address: &str,
        entry: &mut Option<Arc<OutboundChannel>>,
    ) -> Arc<OutboundChannel> {
        if let Some(channel) = entry.as_ref().filter(|c| c.is_connected()) {
            return channel.clone();
        }

        let channel = Arc::new(self.connect(address).await);
        *entry = Some(channel.clone());
        channel
    }

    async fn connect(&self, address: &str) -> OutboundChannel {
        match open_tunnel(&self.proxy, address, self.connect_timeout, self.io_timeout).await {
            Ok(stream) => {
                debug!("Opened tunnel to {} via {}", address, self.proxy);
                OutboundChannel::connected(address, stream, self.io_timeout)
            }
            Err(e) => {
                warn!("Failed to open tunnel to {}: {}", address, e);
                OutboundChannel::dummy(address)
            }
        }
    }

    /// Resolve the destination of `packet` and write it
    ///
    /// The slot stays locked for the write so concurrent sends to one
    /// destination each get their own tunnel.
    pub async fn send(&self, packet: &Packet) -> Result<(), CodecError> {
        let address = packet.target_process.address.as_str();
        let slot = self.slot(address).await;
        let mut entry = slot.lock().await;
        let channel = self.resolve_locked(address, &mut entry).await;
        let result = channel.write_packet(packet).await;
        self.evict_unusable(address, &slot, &mut entry).await;
        result
    }

    /// Drop `slot` from the map unless it holds a usable channel
    ///
    /// Called with the slot locked. A slot that was already replaced in
    /// the map is left alone.
    async fn evict_unusable(
        &self,
        address: &str,
        slot: &Slot,
        entry: &mut Option<Arc<OutboundChannel>>,
    ) {
        if entry.as_ref().is_some_and(|c| c.is_connected()) {
            return;
        }
        *entry = None;

        let mut slots = self.slots.write().await;
        if slots.get(address).is_some_and(|cached| Arc::ptr_eq(cached, slot)) {
            slots.remove(address);
            debug!("Forgot spent channel to {}", address);
        }
    }

    /// Number of cached destinations
    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slots.read().await.is_empty()
    }

    /// Number of cached channels that are currently usable
    pub async fn connected_count(&self) -> usize {
        let slots: Vec<Slot> = self.slots.read().await.values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.as_ref().is_some_and(|c| c.is_connected()) {
                count += 1;
            }
        }
        count
    }

    /// Close every cached channel and forget all destinations
    pub async fn close_all(&self) {
        let slots: Vec<Slot> = self.slots.write().await.drain().map(|(_, s)| s).collect();
        for slot in slots {
            if let Some(channel) = slot.lock().await.take() {
                channel.close().await;
            }
        }
        debug!("Connection cache cleared");
    }
}
