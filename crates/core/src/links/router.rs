use super::{ChannelEvent, ChannelKind, CommunicationEvent, CommunicationKind, DeliveryChannel};
use super::{EventTask, Inbox, Link, Mailbox};
use crate::protocol::Packet;
use hiddenlink_common::{HiddenLinkError, Result};
use tokio::sync::mpsc::unbounded_channel;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Cloneable entry point into a running link
#[derive(Debug, Clone)]
pub struct LinkHandle {
    mailbox: Mailbox,
}

impl LinkHandle {
    pub fn new(mailbox: Mailbox) -> Self {
        Self { mailbox }
    }

    pub fn mailbox(&self) -> Mailbox {
        self.mailbox.clone()
    }

    pub fn dispatch(&self, task: EventTask) -> Result<()> {
        self.mailbox
            .send(task)
            .map_err(|_| HiddenLinkError::link_closed("router mailbox closed"))
    }

    pub fn send(&self, packet: Packet) -> Result<()> {
        self.dispatch(EventTask::send(packet))
    }

    pub fn deliver(&self, packet: Packet) -> Result<()> {
        self.dispatch(EventTask::deliver(packet))
    }

    pub fn register(&self, channel: DeliveryChannel) -> Result<()> {
        self.dispatch(EventTask::register(channel))
    }

    pub fn unregister(&self, channel: DeliveryChannel) -> Result<()> {
        self.dispatch(EventTask::unregister(channel))
    }

    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }
}

/// Drives one link from its mailbox
///
/// The router is the only place that interprets [`EventTask`] variants.
/// Events are handled strictly in arrival order.
pub struct EventRouter;

impl EventRouter {
    /// Move `link` into a new task and return the handle to its mailbox
    pub fn spawn<L: Link>(link: L) -> (LinkHandle, JoinHandle<()>) {
        let (mailbox, inbox) = unbounded_channel();
        let task = tokio::spawn(Self::run(link, inbox));
        (LinkHandle::new(mailbox), task)
    }

    async fn run<L: Link>(mut link: L, mut inbox: Inbox) {
        debug!("{} router started", link.name());

        while let Some(task) = inbox.recv().await {
            match task {
                EventTask::Communication(CommunicationEvent { kind, packet }) => {
                    trace!("{}: {:?} {}", link.name(), kind, packet.source_packet_id);
                    match kind {
                        CommunicationKind::Send => link.send(packet),
                        CommunicationKind::Deliver => link.deliver(packet),
                    }
                }
                EventTask::Channel(ChannelEvent { kind, channel }) => match kind {
                    ChannelKind::Register => link.register_for_delivery(channel),
                    ChannelKind::Unregister => link.unregister_for_delivery(&channel),
                },
            }
        }

        debug!("{} router stopped", link.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::DeliveryChannels;
    use crate::protocol::{AuthInfo, Message, Process};
    use std::sync::{Arc, Mutex};

    /// Records sends, forwards deliveries
    struct RecordingLink {
        sent: Arc<Mutex<Vec<Packet>>>,
        deliveries: DeliveryChannels,
    }

    impl Link for RecordingLink {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn send(&mut self, packet: Packet) {
            self.sent.lock().unwrap().push(packet);
        }

        fn deliver(&mut self, packet: Packet) {
            self.deliveries.deliver(packet);
        }

        fn deliveries(&self) -> &DeliveryChannels {
            &self.deliveries
        }
    }

    fn packet(n: i32) -> Packet {
        Packet::new(
            "",
            Process::new("id", "abc.onion", "path"),
            AuthInfo::NoAuth,
            Message::new(n, vec![]),
        )
    }

    #[tokio::test]
    async fn test_router_dispatches_in_order() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let (handle, _task) = EventRouter::spawn(RecordingLink {
            sent: sent.clone(),
            deliveries: DeliveryChannels::new(),
        });

        let (tx, mut rx) = unbounded_channel();
        let channel = DeliveryChannel::any(tx);
        handle.register(channel.clone()).unwrap();

        handle.send(packet(1)).unwrap();
        handle.deliver(packet(2)).unwrap();
        handle.unregister(channel).unwrap();
        handle.deliver(packet(3)).unwrap();
        handle.send(packet(4)).unwrap();

        // Wait for the last send to land
        while sent.lock().unwrap().len() < 2 {
            tokio::task::yield_now().await;
        }

        let types: Vec<i32> = sent
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.message.message_type)
            .collect();
        assert_eq!(types, vec![1, 4]);

        let delivered = rx.recv().await.unwrap();
        assert_eq!(delivered.packet().unwrap().message.message_type, 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_router() {
        let (handle, task) = EventRouter::spawn(RecordingLink {
            sent: Arc::new(Mutex::new(Vec::new())),
            deliveries: DeliveryChannels::new(),
        });
        task.abort();
        let _ = task.await;

        assert!(handle.is_closed());
        assert!(handle.send(packet(1)).is_err());
    }
}
