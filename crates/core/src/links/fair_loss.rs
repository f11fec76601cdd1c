use super::{DeliveryChannels, Link};
use crate::network::NetworkContext;
use crate::protocol::Packet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Send once, no guarantee
///
/// Packets for one of our own addresses are handed to the processes
/// registered in the network context. Everything else goes out through
/// the connection cache on a separate task; transport failures are logged
/// and the packet is lost.
pub struct FairLossLink {
    context: Arc<NetworkContext>,
    deliveries: DeliveryChannels,
}

impl FairLossLink {
    pub fn new(context: Arc<NetworkContext>) -> Self {
        Self {
            context,
            deliveries: DeliveryChannels::new(),
        }
    }
}

impl Link for FairLossLink {
    fn name(&self) -> &'static str {
        "fair-loss"
    }

    fn send(&mut self, packet: Packet) {
        if self.context.is_local_address(&packet.target_process.address) {
            debug!(
                "Packet {} targets local process {}",
                packet.source_packet_id, packet.target_process.id
            );
            self.context.deliver_local(packet);
            return;
        }

        let context = self.context.clone();
        tokio::spawn(async move {
            if let Err(e) = context.connections().send(&packet).await {
                warn!(
                    "Failed to send packet {} to {}: {}",
                    packet.source_packet_id, packet.target_process.address, e
                );
            }
        });
    }

    fn deliver(&mut self, packet: Packet) {
        self.deliveries.deliver(packet);
    }

    fn deliveries(&self) -> &DeliveryChannels {
        &self.deliveries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::links::{DeliveryChannel, EventRouter};
    use crate::protocol::{AuthInfo, Message, PacketCodec, Process};
    use hiddenlink_common::NodeConfig;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::mpsc::unbounded_channel;
    use tokio::sync::oneshot;

    fn packet(address: &str) -> Packet {
        Packet::new(
            "me.onion",
            Process::new("chat", address, "room"),
            AuthInfo::NoAuth,
            Message::new(3, "Hello Onion"),
        )
    }

    #[tokio::test]
    async fn test_local_packets_skip_the_network() {
        // Nothing listens on this proxy port; any outbound attempt would just fail
        let config = NodeConfig::default().with_socks_port(1);
        let context = Arc::new(NetworkContext::new(config));
        context.add_local_address("me.onion");

        let (first_tx, mut first_rx) = unbounded_channel();
        let (second_tx, mut second_rx) = unbounded_channel();
        context.register_process("chat", DeliveryChannel::any(first_tx));
        context.register_process("chat", DeliveryChannel::any(second_tx));

        let (handle, _task) = EventRouter::spawn(FairLossLink::new(context.clone()));
        let packet = packet("me.onion");
        handle.send(packet.clone()).unwrap();

        let first = first_rx.recv().await.unwrap();
        let second = second_rx.recv().await.unwrap();
        assert!(first.is_deliver());
        assert_eq!(first.packet(), Some(&packet));
        assert_eq!(second.packet(), Some(&packet));
        assert!(context.connections().is_empty().await);
    }

    #[tokio::test]
    async fn test_remote_packets_go_through_the_tunnel() {
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = proxy.local_addr().unwrap().port();
        let (bytes_tx, bytes_rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = proxy.accept().await.unwrap();
            let mut request = vec![0u8; 9 + "peer.onion".len() + 1];
            socket.read_exact(&mut request).await.unwrap();
            socket.write_all(&[0, 90, 0, 0, 0, 0, 0, 0]).await.unwrap();
            let mut payload = Vec::new();
            socket.read_to_end(&mut payload).await.unwrap();
            let _ = bytes_tx.send(payload);
        });

        let config = NodeConfig::default().with_socks_port(port);
        let context = Arc::new(NetworkContext::new(config));
        let (handle, _task) = EventRouter::spawn(FairLossLink::new(context));

        let packet = packet("peer.onion");
        handle.send(packet.clone()).unwrap();

        let payload = tokio::time::timeout(Duration::from_secs(5), bytes_rx)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, PacketCodec::encode(&packet).unwrap());
    }

    #[tokio::test]
    async fn test_unreachable_destination_does_not_stop_the_link() {
        let proxy = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = proxy.local_addr().unwrap().port();
        drop(proxy);

        let context = Arc::new(NetworkContext::new(
            NodeConfig::default().with_socks_port(port),
        ));
        let (handle, _task) = EventRouter::spawn(FairLossLink::new(context));

        let (tx, mut rx) = unbounded_channel();
        handle.register(DeliveryChannel::any(tx)).unwrap();
        handle.send(packet("peer.onion")).unwrap();

        // The router keeps serving events after the failed send
        let inbound = packet("me.onion");
        handle.deliver(inbound.clone()).unwrap();
        assert_eq!(rx.recv().await.unwrap().packet(), Some(&inbound));
    }
}
