use super::{DeliveryChannels, Link, LinkHandle};
use crate::protocol::Packet;
use hiddenlink_common::NodeConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Shortest period the retransmission timer accepts
const MIN_POLL_PERIOD: Duration = Duration::from_millis(1);

/// Retransmission schedule
#[derive(Debug, Clone, Copy)]
pub struct StubbornConfig {
    /// Time between retransmission rounds
    pub poll_period: Duration,
    /// Delay before the first round
    pub initial_delay: Duration,
    /// Retained packets older than this are dropped
    pub retention: Duration,
}

impl StubbornConfig {
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            poll_period: config.poll_period(),
            initial_delay: config.initial_delay(),
            retention: config.retention(),
        }
    }
}

impl Default for StubbornConfig {
    fn default() -> Self {
        Self::from_config(&NodeConfig::default())
    }
}

struct Retained {
    packet: Packet,
    first_sent: Instant,
}

type RetainedSet = Arc<Mutex<HashMap<String, Retained>>>;

/// Keep sending until told otherwise
///
/// Every sent packet is forwarded to the fair-loss link at once and kept
/// in a retained set that a timer task re-sends each poll period. The same
/// packet value is re-sent every time so an upper perfect link can drop
/// the duplicates. A packet leaves the set when a response naming its
/// `source_packet_id` is delivered, or when its retention expires.
pub struct StubbornLink {
    lower: LinkHandle,
    retained: RetainedSet,
    deliveries: DeliveryChannels,
    timer: JoinHandle<()>,
}

impl StubbornLink {
    /// Create the link and start its retransmission timer
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(lower: LinkHandle, config: StubbornConfig) -> Self {
        let retained: RetainedSet = Arc::new(Mutex::new(HashMap::new()));
        let timer = tokio::spawn(retransmit(lower.clone(), retained.clone(), config));

        Self {
            lower,
            retained,
            deliveries: DeliveryChannels::new(),
            timer,
        }
    }

    /// Number of packets still being retransmitted
    pub fn retained_count(&self) -> usize {
        self.retained.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Link for StubbornLink {
    fn name(&self) -> &'static str {
        "stubborn"
    }

    fn send(&mut self, packet: Packet) {
        self.retained
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(packet.source_packet_id.clone())
            .or_insert_with(|| Retained {
                packet: packet.clone(),
                first_sent: Instant::now(),
            });

        if self.lower.send(packet).is_err() {
            debug!("stubborn: fair-loss link is gone");
        }
    }

    fn deliver(&mut self, packet: Packet) {
        if packet.is_response() {
            let acked = self
                .retained
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&packet.response_packet_id);
            if acked.is_some() {
                debug!("Packet {} acknowledged", packet.response_packet_id);
            }
        }

        self.deliveries.deliver(packet);
    }

    fn deliveries(&self) -> &DeliveryChannels {
        &self.deliveries
    }
}

impl Drop for StubbornLink {
    fn drop(&mut self) {
        self.timer.abort();
    }
}

async fn retransmit(lower: LinkHandle, retained: RetainedSet, config: StubbornConfig) {
    let period = config.poll_period.max(MIN_POLL_PERIOD);
    let mut ticker = interval_at(Instant::now() + config.initial_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        let due: Vec<Packet> = {
            let mut retained = retained.lock().unwrap_or_else(|e| e.into_inner());
            retained.retain(|id, entry| {
                let keep = entry.first_sent.elapsed() < config.retention;
                if !keep {
                    debug!("Packet {} expired without acknowledgement", id);
                }
                keep
            });
            retained.values().map(|entry| entry.packet.clone()).collect()
        };

        trace!("stubborn: retransmitting {} packet(s)", due.len());
        for packet in due {
            if lower.send(packet).is_err() {
                debug!("stubborn: fair-loss link is gone, stopping timer");
                return;
            }
        }
    }
}
