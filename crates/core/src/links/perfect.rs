use super::{DeliveryChannels, Link, LinkHandle};
use crate::protocol::Packet;
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

/// Deliver every distinct packet at most once
///
/// Remembers the last `capacity` delivered packets and silently drops any
/// repeat of one of them. Sends pass straight through to the stubborn link.
pub struct PerfectLink {
    lower: LinkHandle,
    delivered: HashSet<Packet>,
    order: VecDeque<Packet>,
    capacity: usize,
    deliveries: DeliveryChannels,
}

impl PerfectLink {
    pub fn new(lower: LinkHandle, capacity: usize) -> Self {
        Self {
            lower,
            delivered: HashSet::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
            deliveries: DeliveryChannels::new(),
        }
    }

    /// Record `packet` as delivered. Returns false if it was already known.
    fn remember(&mut self, packet: &Packet) -> bool {
        if self.delivered.contains(packet) {
            return false;
        }

        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.delivered.remove(&oldest);
            }
        }
        self.delivered.insert(packet.clone());
        self.order.push_back(packet.clone());
        true
    }
}

impl Link for PerfectLink {
    fn name(&self) -> &'static str {
        "perfect"
    }

    fn send(&mut self, packet: Packet) {
        if self.lower.send(packet).is_err() {
            debug!("perfect: stubborn link is gone");
        }
    }

    fn deliver(&mut self, packet: Packet) {
        if !self.remember(&packet) {
            trace!("Dropping duplicate packet {}", packet.source_packet_id);
            return;
        }
        self.deliveries.deliver(packet);
    }

    fn deliveries(&self) -> &DeliveryChannels {
        &self.deliveries
    }
}
