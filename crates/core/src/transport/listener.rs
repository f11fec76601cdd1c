use crate::links::LinkHandle;
use crate::protocol::PacketCodec;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Inbound packet listener
///
/// Each accepted connection carries exactly one encoded packet. It is read
/// on its own task, injected into the fair-loss link as a deliver event,
/// and the connection is closed.
pub struct PacketListener {
    listener: TcpListener,
    read_timeout: Duration,
}

impl PacketListener {
    pub async fn bind(addr: &str, read_timeout: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            read_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Start accepting connections, delivering packets to `sink`
    pub fn spawn(self, sink: LinkHandle) -> JoinHandle<()> {
        tokio::spawn(self.run(sink))
    }

    async fn run(self, sink: LinkHandle) {
        if let Ok(addr) = self.listener.local_addr() {
            info!("Listening for packets on {}", addr);
        }

        loop {
            let (socket, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    accept_failed(&e).await;
                    continue;
                }
            };

            debug!("Inbound connection from {}", peer);
            let target = sink.clone();
            let read_timeout = self.read_timeout;
            tokio::spawn(async move {
                handle_connection(socket, peer, target, read_timeout).await;
            });

            if sink.is_closed() {
                debug!("Fair-loss link is gone, listener stopping");
                return;
            }
        }
    }
}

/// Log an accept failure and pause before the next attempt
async fn accept_failed(error: &io::Error) {
    warn!("Failed to accept connection: {}", error);
    tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
}

async fn handle_connection(
    mut socket: TcpStream,
    peer: SocketAddr,
    sink: LinkHandle,
    read_timeout: Duration,
) {
    match timeout(read_timeout, PacketCodec::read_packet(&mut socket)).await {
        Ok(Ok(packet)) => {
            debug!("Received packet {} from {}", packet.source_packet_id, peer);
            if sink.deliver(packet).is_err() {
                debug!("Dropping inbound packet, link closed");
            }
        }
        Ok(Err(e)) => warn!("Malformed packet from {}: {}", peer, e),
        Err(_) => warn!("Timed out reading packet from {}", peer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{AuthInfo, Message, Packet, Process};
    use tokio::io::AsyncWriteExt;
    use tokio::sync::mpsc::unbounded_channel;

    fn packet(n: i32) -> Packet {
        Packet::new(
            "peer.onion",
            Process::new("chat", "me.onion", "room"),
            AuthInfo::token("pk", "session"),
            Message::new(n, "payload"),
        )
    }

    #[tokio::test]
    async fn test_one_packet_per_connection() {
        let listener = PacketListener::bind("127.0.0.1:0", Duration::from_secs(1))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let _task = listener.spawn(LinkHandle::new(tx));

        for n in 0..3 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream.write_all(&PacketCodec::encode(&packet(n)).unwrap()).await.unwrap();
            stream.shutdown().await.unwrap();
        }

        let mut types = Vec::new();
        for _ in 0..3 {
            let task = rx.recv().await.unwrap();
            assert!(task.is_deliver());
            types.push(task.packet().unwrap().message.message_type);
        }
        types.sort();
        assert_eq!(types, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_slow_peer_does_not_block_others() {
        let listener = PacketListener::bind("127.0.0.1:0", Duration::from_secs(5))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let _task = listener.spawn(LinkHandle::new(tx));

        // Opens a connection and sends half a packet
        let mut slow = TcpStream::connect(addr).await.unwrap();
        slow.write_all(&[0, 0, 0, 10, b'a']).await.unwrap();

        let mut fast = TcpStream::connect(addr).await.unwrap();
        fast.write_all(&PacketCodec::encode(&packet(9)).unwrap()).await.unwrap();
        fast.shutdown().await.unwrap();

        let task = rx.recv().await.unwrap();
        assert_eq!(task.packet().unwrap().message.message_type, 9);
        drop(slow);
    }

    #[tokio::test]
    async fn test_garbage_is_dropped() {
        let listener = PacketListener::bind("127.0.0.1:0", Duration::from_secs(1))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, mut rx) = unbounded_channel();
        let _task = listener.spawn(LinkHandle::new(tx));

        let mut bad = TcpStream::connect(addr).await.unwrap();
        bad.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();
        bad.shutdown().await.unwrap();

        let mut good = TcpStream::connect(addr).await.unwrap();
        good.write_all(&PacketCodec::encode(&packet(1)).unwrap()).await.unwrap();
        good.shutdown().await.unwrap();

        let task = rx.recv().await.unwrap();
        assert_eq!(task.packet().unwrap().message.message_type, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_accept_error_backs_off() {
        let started = tokio::time::Instant::now();
        accept_failed(&io::Error::from(io::ErrorKind::Other)).await;
        assert!(started.elapsed() >= ACCEPT_RETRY_DELAY);
    }
}
