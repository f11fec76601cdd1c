use super::{DeliveryChannel, DeliveryChannels, EventRouter, Link, LinkHandle, PathMatcher};
use crate::network::NetworkContext;
use crate::protocol::{AuthInfo, Message, Packet, Process};
use hiddenlink_common::config::links::{PING, PING_PATH, PONG};
use hiddenlink_common::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Process id used by both ends of a ping exchange
pub const PING_PROCESS: &str = "ping";

fn ping_process(address: impl Into<String>) -> Process {
    Process::new(PING_PROCESS, address, PING_PATH)
}

/// Diagnostic request/response protocol
///
/// Answers every PING with a PONG addressed back to the sender and logs
/// every PONG it receives.
pub struct PingLink {
    lower: LinkHandle,
    deliveries: DeliveryChannels,
}

impl PingLink {
    pub fn new(lower: LinkHandle) -> Self {
        Self {
            lower,
            deliveries: DeliveryChannels::new(),
        }
    }
}

impl Link for PingLink {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn send(&mut self, packet: Packet) {
        if self.lower.send(packet).is_err() {
            debug!("ping: lower link is gone");
        }
    }

    fn deliver(&mut self, packet: Packet) {
        match packet.message.message_type {
            PING => {
                debug!("PING {} from {}", packet.source_packet_id, packet.source_address);
                let pong = packet.reply(
                    ping_process(packet.source_address.clone()),
                    Message::new(PONG, Vec::new()),
                );
                self.send(pong);
            }
            PONG => {
                info!(
                    "PONG from {} (request {})",
                    packet.source_address, packet.response_packet_id
                );
            }
            _ => {}
        }

        self.deliveries.deliver(packet);
    }

    fn deliveries(&self) -> &DeliveryChannels {
        &self.deliveries
    }
}

/// Handle to a running ping link
#[derive(Clone)]
pub struct Pinger {
    handle: LinkHandle,
    context: Arc<NetworkContext>,
}

impl Pinger {
    /// Start the ping link on top of `lower`, receiving packets on the ping path
    pub fn spawn(lower: &LinkHandle, context: Arc<NetworkContext>) -> Result<(Self, JoinHandle<()>)> {
        let (handle, task) = EventRouter::spawn(PingLink::new(lower.clone()));
        lower.register(DeliveryChannel::new(
            handle.mailbox(),
            vec![Arc::new(PathMatcher::new(PING_PATH))],
        ))?;
        Ok((Self { handle, context }, task))
    }

    pub fn handle(&self) -> &LinkHandle {
        &self.handle
    }

    /// Send a PING to the node at `address`
    pub fn ping(&self, address: impl Into<String>) -> Result<Packet> {
        let source = self.context.primary_address().unwrap_or_default();
        let packet = Packet::new(
            source,
            ping_process(address),
            AuthInfo::NoAuth,
            Message::new(PING, Vec::new()),
        );
        self.handle.send(packet.clone())?;
        Ok(packet)
    }
}
