use crate::protocol::{CodecError, Packet, PacketCodec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

type Sink = Box<dyn AsyncWrite + Send + Unpin>;

/// A tunnelled connection to one remote address
///
/// A channel carries a single packet: after the write the stream is shut
/// down and the channel reports itself disconnected, so the next resolve
/// opens a fresh tunnel. A dummy channel is never connected and silently
/// drops everything written to it.
pub struct OutboundChannel {
    address: String,
    sink: Mutex<Option<Sink>>,
    connected: AtomicBool,
    io_timeout: Duration,
}

impl OutboundChannel {
    /// Wrap an established tunnel
    pub fn connected<S>(address: impl Into<String>, stream: S, io_timeout: Duration) -> Self
    where
        S: AsyncWrite + Send + Unpin + 'static,
    {
        Self::with_sink(address.into(), Some(Box::new(stream)), io_timeout)
    }

    /// A placeholder for a destination that could not be reached
    pub fn dummy(address: impl Into<String>) -> Self {
        Self::with_sink(address.into(), None, Duration::ZERO)
    }

    fn with_sink(address: String, sink: Option<Sink>, io_timeout: Duration) -> Self {
        let connected = sink.is_some();
        Self {
            address,
            sink: Mutex::new(sink),
            connected: AtomicBool::new(connected),
            io_timeout,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Write one packet and close the stream
    ///
    /// Writing to a disconnected channel is a no-op.
    pub async fn write_packet(&self, packet: &Packet) -> Result<(), CodecError> {
        let sink = {
            let mut guard = self.sink.lock().await;
            self.connected.store(false, Ordering::Release);
            guard.take()
        };

        let Some(mut sink) = sink else {
            debug!(
                "Dropping packet {} for {}: channel not connected",
                packet.source_packet_id, self.address
            );
            return Ok(());
        };

        let write = async {
            PacketCodec::write_packet(&mut sink, packet).await?;
            sink.shutdown().await?;
            Ok::<_, CodecError>(())
        };

        timeout(self.io_timeout, write).await.map_err(|_| {
            CodecError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "packet write timed out",
            ))
        })??;

        debug!("Sent packet {} to {}", packet.source_packet_id, self.address);
        Ok(())
    }

    /// Drop the underlying stream without writing
    pub async fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.sink.lock().await.take();
    }
}

impl std::fmt::Debug for OutboundChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboundChannel")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}
