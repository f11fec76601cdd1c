use super::DeliveryChannel;
use crate::protocol::Packet;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

/// Inbound queue of a link's router
pub type Mailbox = UnboundedSender<EventTask>;

/// Receiving end of a [`Mailbox`]
pub type Inbox = UnboundedReceiver<EventTask>;

/// Direction of a communication event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommunicationKind {
    /// Move a packet down towards the network
    Send,
    /// Move a packet up towards the application
    Deliver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommunicationEvent {
    pub kind: CommunicationKind,
    pub packet: Packet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Register,
    Unregister,
}

#[derive(Debug, Clone)]
pub struct ChannelEvent {
    pub kind: ChannelKind,
    pub channel: DeliveryChannel,
}

/// Everything that travels through a link mailbox
#[derive(Debug, Clone)]
pub enum EventTask {
    Communication(CommunicationEvent),
    Channel(ChannelEvent),
}

impl EventTask {
    pub fn send(packet: Packet) -> Self {
        Self::Communication(CommunicationEvent {
            kind: CommunicationKind::Send,
            packet,
        })
    }

    pub fn deliver(packet: Packet) -> Self {
        Self::Communication(CommunicationEvent {
            kind: CommunicationKind::Deliver,
            packet,
        })
    }

    pub fn register(channel: DeliveryChannel) -> Self {
        Self::Channel(ChannelEvent {
            kind: ChannelKind::Register,
            channel,
        })
    }

    pub fn unregister(channel: DeliveryChannel) -> Self {
        Self::Channel(ChannelEvent {
            kind: ChannelKind::Unregister,
            channel,
        })
    }

    /// The carried packet, if this is a communication event
    pub fn packet(&self) -> Option<&Packet> {
        match self {
            Self::Communication(event) => Some(&event.packet),
            Self::Channel(_) => None,
        }
    }

    /// The carried packet, consuming the task
    pub fn into_packet(self) -> Option<Packet> {
        match self {
            Self::Communication(event) => Some(event.packet),
            Self::Channel(_) => None,
        }
    }

    pub fn is_deliver(&self) -> bool {
        matches!(
            self,
            Self::Communication(CommunicationEvent {
                kind: CommunicationKind::Deliver,
                ..
            })
        )
    }

    pub fn is_send(&self) -> bool {
        matches!(
            self,
            Self::Communication(CommunicationEvent {
                kind: CommunicationKind::Send,
                ..
            })
        )
    }
}
