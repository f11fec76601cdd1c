/// Point-to-point link stack
///
/// Links are layered bottom-up:
/// - fair-loss: send once, no guarantee
/// - stubborn: keep resending until acknowledged or expired
/// - perfect: deliver every distinct packet at most once
/// - application and ping: listener dispatch and the diagnostic protocol
///
/// Each link runs inside its own [`EventRouter`] task and is only reached
/// through that task's mailbox. Layers are wired together by registering
/// the upper router's mailbox as a [`DeliveryChannel`] on the lower one.

mod application;
mod event;
mod fair_loss;
mod matcher;
mod perfect;
mod ping;
mod router;
mod stubborn;

pub use application::{ApplicationLayer, ApplicationLink, ListenerId, MessageListener};
pub use event::{
    ChannelEvent, ChannelKind, CommunicationEvent, CommunicationKind, EventTask, Inbox, Mailbox,
};
pub use fair_loss::FairLossLink;
pub use matcher::{
    AnyMatcher, AnyPathMatcher, EndpointMatcher, FnMatcher, PacketMatcher, PathMatcher,
    TaskMatcher,
};
pub use perfect::PerfectLink;
pub use ping::{PingLink, Pinger, PING_PROCESS};
pub use router::{EventRouter, LinkHandle};
pub use stubborn::{StubbornConfig, StubbornLink};

use crate::protocol::Packet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::debug;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// A destination mailbox plus the matchers that gate it
///
/// Clones share the same id, and equality is by id, so a clone can be
/// used to unregister the original.
#[derive(Clone)]
pub struct DeliveryChannel {
    id: u64,
    destination: Mailbox,
    matchers: Arc<[Arc<dyn TaskMatcher>]>,
}

impl DeliveryChannel {
    pub fn new(destination: Mailbox, matchers: Vec<Arc<dyn TaskMatcher>>) -> Self {
        Self {
            id: NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed),
            destination,
            matchers: matchers.into(),
        }
    }

    /// A channel that accepts every packet
    pub fn any(destination: Mailbox) -> Self {
        Self::new(destination, vec![Arc::new(AnyMatcher)])
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// True when every matcher accepts `task`
    pub fn accepts(&self, task: &EventTask) -> bool {
        self.matchers.iter().all(|m| m.matches(task))
    }

    /// Forward `task` if accepted. Returns false when the destination is gone.
    pub fn offer(&self, task: &EventTask) -> bool {
        if !self.accepts(task) {
            return true;
        }
        self.destination.send(task.clone()).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.destination.is_closed()
    }
}

impl PartialEq for DeliveryChannel {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DeliveryChannel {}

impl fmt::Debug for DeliveryChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryChannel")
            .field("id", &self.id)
            .field("matchers", &self.matchers.len())
            .finish()
    }
}

/// Copy-on-write set of delivery channels
///
/// Writers replace the whole list, readers iterate an immutable snapshot,
/// so a concurrent register never disturbs an in-progress delivery.
#[derive(Default)]
pub struct DeliveryChannels {
    channels: RwLock<Arc<Vec<DeliveryChannel>>>,
}

impl DeliveryChannels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, channel: DeliveryChannel) {
        let mut guard = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if guard.contains(&channel) {
            return;
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(channel);
        *guard = Arc::new(next);
    }

    /// Remove the channel with `id`. Returns whether it was present.
    pub fn unregister(&self, id: u64) -> bool {
        let mut guard = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if !guard.iter().any(|c| c.id() == id) {
            return false;
        }
        let next: Vec<_> = guard.iter().filter(|c| c.id() != id).cloned().collect();
        *guard = Arc::new(next);
        true
    }

    pub fn snapshot(&self) -> Arc<Vec<DeliveryChannel>> {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Forward `task` to every accepting channel
    ///
    /// Channels whose destination has shut down are dropped from the set.
    pub fn dispatch(&self, task: &EventTask) {
        let snapshot = self.snapshot();
        for channel in snapshot.iter() {
            if !channel.offer(task) {
                debug!("Dropping closed delivery channel {}", channel.id());
                self.unregister(channel.id());
            }
        }
    }

    /// Deliver `packet` upwards to every accepting channel
    pub fn deliver(&self, packet: Packet) {
        self.dispatch(&EventTask::deliver(packet));
    }

    pub fn clear(&self) {
        *self.channels.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(Vec::new());
    }
}

/// A point-to-point link driven by an [`EventRouter`]
///
/// Both operations are called from the router task, one event at a time,
/// and must not block.
pub trait Link: Send + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Move a packet downward
    fn send(&mut self, packet: Packet);

    /// Move a packet upward to matching delivery channels
    fn deliver(&mut self, packet: Packet);

    fn deliveries(&self) -> &DeliveryChannels;

    fn register_for_delivery(&mut self, channel: DeliveryChannel) {
        debug!("{}: registering delivery channel {}", self.name(), channel.id());
        self.deliveries().register(channel);
    }

    fn unregister_for_delivery(&mut self, channel: &DeliveryChannel) {
        debug!("{}: unregistering delivery channel {}", self.name(), channel.id());
        self.deliveries().unregister(channel.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AuthInfo, Message, Process};
    use tokio::sync::mpsc::unbounded_channel;

    fn packet(path: &str) -> Packet {
        Packet::new(
            "",
            Process::new("id", "abc.onion", path),
            AuthInfo::NoAuth,
            Message::new(1, vec![]),
        )
    }

    #[test]
    fn test_register_and_unregister() {
        let channels = DeliveryChannels::new();
        let (tx, _rx) = unbounded_channel();
        let channel = DeliveryChannel::any(tx);

        channels.register(channel.clone());
        channels.register(channel.clone());
        assert_eq!(channels.len(), 1);

        assert!(channels.unregister(channel.id()));
        assert!(!channels.unregister(channel.id()));
        assert!(channels.is_empty());
    }

    #[test]
    fn test_snapshot_survives_mutation() {
        let channels = DeliveryChannels::new();
        let (tx, _rx) = unbounded_channel();
        channels.register(DeliveryChannel::any(tx.clone()));

        let snapshot = channels.snapshot();
        channels.register(DeliveryChannel::any(tx));
        assert_eq!(snapshot.len(), 1);
        assert_eq!(channels.len(), 2);
    }

    #[test]
    fn test_matcher_gating() {
        let channels = DeliveryChannels::new();
        let (never_tx, mut never_rx) = unbounded_channel();
        let (any_tx, mut any_rx) = unbounded_channel();

        channels.register(DeliveryChannel::new(
            never_tx,
            vec![Arc::new(FnMatcher(|_: &Packet| false))],
        ));
        channels.register(DeliveryChannel::any(any_tx));

        for _ in 0..50 {
            channels.deliver(packet("chat"));
        }

        assert!(never_rx.try_recv().is_err());
        let mut received = 0;
        while let Ok(task) = any_rx.try_recv() {
            assert!(task.is_deliver());
            received += 1;
        }
        assert_eq!(received, 50);
    }

    #[test]
    fn test_all_matchers_must_accept() {
        let channels = DeliveryChannels::new();
        let (tx, mut rx) = unbounded_channel();
        channels.register(DeliveryChannel::new(
            tx,
            vec![
                Arc::new(PathMatcher::new("chat")),
                Arc::new(EndpointMatcher::new("abc.onion")),
            ],
        ));

        channels.deliver(packet("ping"));
        channels.deliver(packet("chat"));

        let task = rx.try_recv().unwrap();
        assert_eq!(task.packet().unwrap().target_process.path, "chat");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channels_are_pruned() {
        let channels = DeliveryChannels::new();
        let (tx, rx) = unbounded_channel();
        channels.register(DeliveryChannel::any(tx));
        drop(rx);

        channels.deliver(packet("chat"));
        assert!(channels.is_empty());
    }
}
