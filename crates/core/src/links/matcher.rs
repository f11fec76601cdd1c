/// Predicates gating which events reach a delivery channel or listener
///
/// Every concrete matcher is written against a [`Packet`] and becomes a
/// [`TaskMatcher`] through the blanket impl, which rejects channel events.

use super::EventTask;
use crate::protocol::Packet;

/// Predicate over a whole event task
pub trait TaskMatcher: Send + Sync {
    fn matches(&self, task: &EventTask) -> bool;
}

/// Predicate over the packet carried by a communication event
pub trait PacketMatcher: Send + Sync {
    fn matches_packet(&self, packet: &Packet) -> bool;
}

impl<T: PacketMatcher + ?Sized> TaskMatcher for T {
    fn matches(&self, task: &EventTask) -> bool {
        task.packet()
            .map(|packet| self.matches_packet(packet))
            .unwrap_or(false)
    }
}

/// Accepts every packet
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyMatcher;

impl PacketMatcher for AnyMatcher {
    fn matches_packet(&self, _packet: &Packet) -> bool {
        true
    }
}

/// Accepts packets addressed to one remote endpoint
#[derive(Debug, Clone)]
pub struct EndpointMatcher {
    address: String,
}

impl EndpointMatcher {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl PacketMatcher for EndpointMatcher {
    fn matches_packet(&self, packet: &Packet) -> bool {
        packet.target_process.address == self.address
    }
}

/// Accepts packets whose target path equals `path`
#[derive(Debug, Clone)]
pub struct PathMatcher {
    path: String,
}

impl PathMatcher {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

impl PacketMatcher for PathMatcher {
    fn matches_packet(&self, packet: &Packet) -> bool {
        packet.target_process.path == self.path
    }
}

/// Accepts packets that carry any non-empty path
#[derive(Debug, Clone, Copy, Default)]
pub struct AnyPathMatcher;

impl PacketMatcher for AnyPathMatcher {
    fn matches_packet(&self, packet: &Packet) -> bool {
        !packet.target_process.path.is_empty()
    }
}

/// Adapts a closure into a matcher
pub struct FnMatcher<F>(pub F);

impl<F> PacketMatcher for FnMatcher<F>
where
    F: Fn(&Packet) -> bool + Send + Sync,
{
    fn matches_packet(&self, packet: &Packet) -> bool {
        (self.0)(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::DeliveryChannel;
    use crate::protocol::{AuthInfo, Message, Process};
    use std::sync::Arc;
    use tokio::sync::mpsc::unbounded_channel;

    fn packet(address: &str, path: &str) -> Packet {
        Packet::new(
            "",
            Process::new("id", address, path),
            AuthInfo::NoAuth,
            Message::new(1, vec![]),
        )
    }

    #[test]
    fn test_packet_matchers() {
        let p = packet("abc.onion", "chat");

        assert!(AnyMatcher.matches_packet(&p));
        assert!(EndpointMatcher::new("abc.onion").matches_packet(&p));
        assert!(!EndpointMatcher::new("xyz.onion").matches_packet(&p));
        assert!(PathMatcher::new("chat").matches_packet(&p));
        assert!(!PathMatcher::new("ping").matches_packet(&p));
        assert!(AnyPathMatcher.matches_packet(&p));
        assert!(!AnyPathMatcher.matches_packet(&packet("abc.onion", "")));
        assert!(FnMatcher(|p: &Packet| p.message.message_type == 1).matches_packet(&p));
    }

    #[test]
    fn test_channel_events_never_match() {
        let (tx, _rx) = unbounded_channel();
        let task = EventTask::register(DeliveryChannel::any(tx));
        assert!(!AnyMatcher.matches(&task));
        assert!(AnyMatcher.matches(&EventTask::deliver(packet("a", "b"))));
    }

    #[test]
    fn test_trait_objects() {
        let matchers: Vec<Arc<dyn PacketMatcher>> =
            vec![Arc::new(AnyMatcher), Arc::new(PathMatcher::new("chat"))];
        let p = packet("abc.onion", "chat");
        assert!(matchers.iter().all(|m| m.matches_packet(&p)));
        assert!(matchers.iter().all(|m| m.matches(&EventTask::send(p.clone()))));
    }
}
