use super::{
    AnyMatcher, DeliveryChannel, DeliveryChannels, EventRouter, Link, LinkHandle, PacketMatcher,
    PathMatcher,
};
use crate::network::NetworkContext;
use crate::protocol::{AuthInfo, Message, Packet, Process};
use hiddenlink_common::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Receives packets delivered to the application
///
/// Listeners run on the application router task and must not block. A
/// listener tells requests from responses by `Packet::is_response`.
pub trait MessageListener: Send + Sync {
    fn on_message(&self, packet: &Packet);
}

impl<F> MessageListener for F
where
    F: Fn(&Packet) + Send + Sync,
{
    fn on_message(&self, packet: &Packet) {
        self(packet)
    }
}

/// Identifies a registered listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    listener: Arc<dyn MessageListener>,
    matchers: Vec<Arc<dyn PacketMatcher>>,
}

impl Registration {
    fn accepts(&self, packet: &Packet) -> bool {
        self.matchers.iter().all(|m| m.matches_packet(packet))
    }
}

/// Copy-on-write listener table shared by the link and its handle
#[derive(Default)]
struct Listeners {
    next_id: AtomicU64,
    entries: RwLock<Arc<Vec<Arc<Registration>>>>,
}

impl Listeners {
    fn add(&self, listener: Arc<dyn MessageListener>, matchers: Vec<Arc<dyn PacketMatcher>>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let registration = Arc::new(Registration {
            id,
            listener,
            matchers,
        });

        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut next: Vec<_> = guard.iter().cloned().collect();
        next.push(registration);
        *guard = Arc::new(next);
        id
    }

    fn remove(&self, id: ListenerId) -> bool {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let next: Vec<_> = guard.iter().filter(|r| r.id != id).cloned().collect();
        let removed = next.len() != guard.len();
        *guard = Arc::new(next);
        removed
    }

    fn snapshot(&self) -> Arc<Vec<Arc<Registration>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Top of the link stack
///
/// Delivered packets are offered to every listener whose matchers accept
/// them, then to any registered delivery channels. Sends go to the wrapped
/// perfect link.
pub struct ApplicationLink {
    lower: LinkHandle,
    listeners: Arc<Listeners>,
    deliveries: DeliveryChannels,
}

impl Link for ApplicationLink {
    fn name(&self) -> &'static str {
        "application"
    }

    fn send(&mut self, packet: Packet) {
        if self.lower.send(packet).is_err() {
            debug!("application: lower link is gone");
        }
    }

    fn deliver(&mut self, packet: Packet) {
        let listeners = self.listeners.snapshot();
        let mut notified = 0;
        for registration in listeners.iter().filter(|r| r.accepts(&packet)) {
            registration.listener.on_message(&packet);
            notified += 1;
        }
        trace!(
            "Packet {} reached {} listener(s)",
            packet.source_packet_id,
            notified
        );

        self.deliveries.deliver(packet);
    }

    fn deliveries(&self) -> &DeliveryChannels {
        &self.deliveries
    }
}

/// Application-facing handle to the link stack
#[derive(Clone)]
pub struct ApplicationLayer {
    handle: LinkHandle,
    listeners: Arc<Listeners>,
    context: Arc<NetworkContext>,
}

impl ApplicationLayer {
    /// Start the application link on top of `lower` and subscribe it to
    /// every packet `lower` delivers
    pub fn spawn(lower: &LinkHandle, context: Arc<NetworkContext>) -> Result<(Self, JoinHandle<()>)> {
        let listeners = Arc::new(Listeners::default());
        let link = ApplicationLink {
            lower: lower.clone(),
            listeners: listeners.clone(),
            deliveries: DeliveryChannels::new(),
        };

        let (handle, task) = EventRouter::spawn(link);
        lower.register(DeliveryChannel::new(
            handle.mailbox(),
            vec![Arc::new(AnyMatcher)],
        ))?;

        Ok((
            Self {
                handle,
                listeners,
                context,
            },
            task,
        ))
    }

    pub fn handle(&self) -> &LinkHandle {
        &self.handle
    }

    pub fn register_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        matchers: Vec<Arc<dyn PacketMatcher>>,
    ) -> ListenerId {
        self.listeners.add(listener, matchers)
    }

    /// Register `listener` for packets whose target path is `path`
    pub fn register_path_listener(
        &self,
        listener: Arc<dyn MessageListener>,
        path: impl Into<String>,
    ) -> ListenerId {
        self.listeners
            .add(listener, vec![Arc::new(PathMatcher::new(path))])
    }

    pub fn unregister_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    /// Build a fresh packet from this node and send it down the stack
    ///
    /// Returns the packet so callers can correlate a later response with
    /// its `source_packet_id`.
    pub fn send_message(
        &self,
        target: Process,
        auth_info: Option<AuthInfo>,
        message: Message,
        response_packet_id: Option<String>,
    ) -> Result<Packet> {
        let source = self.context.primary_address().unwrap_or_default();
        let mut packet = Packet::new(source, target, auth_info.unwrap_or_default(), message);
        if let Some(id) = response_packet_id {
            packet = packet.with_response_packet_id(id);
        }

        debug!(
            "Sending packet {} to {}",
            packet.source_packet_id, packet.target_process
        );
        self.handle.send(packet.clone())?;
        Ok(packet)
    }
}
