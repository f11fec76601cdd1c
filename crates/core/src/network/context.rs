use super::ConnectionCache;
use crate::control::ControlNotification;
use crate::links::{DeliveryChannel, EventTask};
use crate::protocol::Packet;
use hiddenlink_common::NodeConfig;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

const SHARD_COUNT: usize = 16;

/// Sharded multimap from topic to subscribers
///
/// Each topic hashes to one shard, so writers on different topics rarely
/// contend.
pub struct TopicRegistry<S> {
    shards: Vec<RwLock<HashMap<String, Vec<S>>>>,
}

impl<S: Clone> TopicRegistry<S> {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARD_COUNT).map(|_| RwLock::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, topic: &str) -> &RwLock<HashMap<String, Vec<S>>> {
        let mut hasher = DefaultHasher::new();
        topic.hash(&mut hasher);
        &self.shards[(hasher.finish() as usize) % SHARD_COUNT]
    }

    pub fn subscribe(&self, topic: &str, subscriber: S) {
        self.shard(topic)
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(topic.to_string())
            .or_default()
            .push(subscriber);
    }

    /// Remove every subscriber of `topic` matching `predicate`
    pub fn unsubscribe_where(&self, topic: &str, predicate: impl Fn(&S) -> bool) -> usize {
        let mut shard = self.shard(topic).write().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = shard.get_mut(topic) else {
            return 0;
        };
        let before = subscribers.len();
        subscribers.retain(|s| !predicate(s));
        let removed = before - subscribers.len();
        if subscribers.is_empty() {
            shard.remove(topic);
        }
        removed
    }

    /// Snapshot of the subscribers of `topic`
    pub fn subscribers(&self, topic: &str) -> Vec<S> {
        self.shard(topic)
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    pub fn topic_count(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.read().unwrap_or_else(|e| e.into_inner()).len())
            .sum()
    }

    pub fn clear(&self) {
        for shard in &self.shards {
            shard.write().unwrap_or_else(|e| e.into_inner()).clear();
        }
    }
}

impl<S: Clone> Default for TopicRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

/// Node-wide shared state
///
/// Created once per node and shared by `Arc`. Holds the outbound connection
/// cache, the hidden-service addresses this node owns, local process
/// registrations, and subscribers to control-daemon notifications.
pub struct NetworkContext {
    config: NodeConfig,
    connections: ConnectionCache,
    local_addresses: RwLock<Vec<String>>,
    processes: TopicRegistry<DeliveryChannel>,
    control: TopicRegistry<UnboundedSender<ControlNotification>>,
}

impl NetworkContext {
    pub fn new(config: NodeConfig) -> Self {
        let connections = ConnectionCache::from_config(&config);
        Self {
            config,
            connections,
            local_addresses: RwLock::new(Vec::new()),
            processes: TopicRegistry::new(),
            control: TopicRegistry::new(),
        }
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn connections(&self) -> &ConnectionCache {
        &self.connections
    }

    /// Record an address this node is reachable at
    pub fn add_local_address(&self, address: impl Into<String>) {
        let address = address.into();
        let mut addresses = self.local_addresses.write().unwrap_or_else(|e| e.into_inner());
        if !addresses.contains(&address) {
            info!("Local address registered: {}", address);
            addresses.push(address);
        }
    }

    pub fn remove_local_address(&self, address: &str) -> bool {
        let mut addresses = self.local_addresses.write().unwrap_or_else(|e| e.into_inner());
        let before = addresses.len();
        addresses.retain(|a| a != address);
        addresses.len() != before
    }

    pub fn is_local_address(&self, address: &str) -> bool {
        self.local_addresses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|a| a == address)
    }

    pub fn local_addresses(&self) -> Vec<String> {
        self.local_addresses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// The first registered address, used as the source of outgoing packets
    pub fn primary_address(&self) -> Option<String> {
        self.local_addresses
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .first()
            .cloned()
    }

    /// Register a delivery channel for packets targeting process `id`
    pub fn register_process(&self, id: &str, channel: DeliveryChannel) {
        debug!("Registering process {} on channel {}", id, channel.id());
        self.processes.subscribe(id, channel);
    }

    pub fn unregister_process(&self, id: &str, channel: &DeliveryChannel) -> bool {
        self.processes.unsubscribe_where(id, |c| c == channel) > 0
    }

    /// Hand `packet` to every channel registered under its target process id
    ///
    /// Returns the number of channels that accepted it.
    pub fn deliver_local(&self, packet: Packet) -> usize {
        let id = packet.target_process.id.clone();
        let channels = self.processes.subscribers(&id);
        let task = EventTask::deliver(packet);

        let mut delivered = 0;
        for channel in &channels {
            if !channel.accepts(&task) {
                continue;
            }
            if channel.offer(&task) {
                delivered += 1;
            } else {
                self.unregister_process(&id, channel);
            }
        }
        debug!("Local delivery to process {} reached {} channel(s)", id, delivered);
        delivered
    }

    /// Subscribe to control notifications published on `topic`
    pub fn subscribe_control(&self, topic: &str) -> UnboundedReceiver<ControlNotification> {
        let (tx, rx) = unbounded_channel();
        self.control.subscribe(topic, tx);
        rx
    }

    /// Fan `notification` out to every subscriber of `topic`
    pub fn publish_control(&self, topic: &str, notification: ControlNotification) -> usize {
        let mut delivered = 0;
        let mut closed = false;
        for subscriber in self.control.subscribers(topic) {
            if subscriber.send(notification.clone()).is_ok() {
                delivered += 1;
            } else {
                closed = true;
            }
        }
        if closed {
            self.control.unsubscribe_where(topic, |s| s.is_closed());
        }
        delivered
    }

    /// Close cached connections and drop every registration
    pub async fn shutdown(&self) {
        self.connections.close_all().await;
        self.processes.clear();
        self.control.clear();
        self.local_addresses
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        info!("Network context shut down");
    }
}
