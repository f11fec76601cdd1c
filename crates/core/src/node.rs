/// hiddenlink node runtime
///
/// This module provides the main Node struct that assembles one node: the
/// network context, the fair-loss → stubborn → perfect link stack with the
/// application and ping links on top, the inbound packet listener, and an
/// optional control connection that publishes a hidden service.

use crate::control::{ControlChannel, KeyType, OnionPort};
use crate::links::{
    ApplicationLayer, DeliveryChannel, EventRouter, FairLossLink, LinkHandle, PerfectLink,
    Pinger, StubbornConfig, StubbornLink, PING_PROCESS,
};
use crate::network::NetworkContext;
use crate::service::OnionAddress;
use crate::transport::PacketListener;
use anyhow::{anyhow, Context, Result};
use hiddenlink_common::NodeConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const EVENT_CAPACITY: usize = 32;

/// Lifecycle notifications for the UI/CLI
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// The inbound listener is accepting connections
    Listening(SocketAddr),
    /// Authenticated on the daemon's control port
    ControlConnected,
    /// The daemon published our hidden service under this hostname
    HiddenServiceReady(String),
    /// Something the node could not recover from on its own
    Failed(String),
}

/// Main hiddenlink node runtime
pub struct Node {
    /// Node configuration
    config: NodeConfig,

    /// Shared context (connection cache, local addresses, registries)
    context: Arc<NetworkContext>,

    /// Bottom of the link stack, fed by the inbound listener
    fair_loss: LinkHandle,

    /// Application entry point on top of the perfect link
    application: ApplicationLayer,

    /// Ping diagnostics on top of the perfect link
    pinger: Pinger,

    /// Address the inbound listener is bound to, once started
    listen_addr: Option<SocketAddr>,

    /// Connection to the daemon's control port
    control: Option<ControlChannel>,

    /// Lifecycle event fan-out
    events: broadcast::Sender<NodeEvent>,

    /// Router, timer and listener tasks
    tasks: Vec<JoinHandle<()>>,
}

impl Node {
    /// Create a node and start its link stack
    ///
    /// Nothing touches the network until [`Node::start`].
    pub async fn new(config: NodeConfig) -> Result<Self> {
        info!("Initializing hiddenlink node...");

        let context = Arc::new(NetworkContext::new(config.clone()));
        let mut tasks = Vec::new();

        let (fair_loss, task) = EventRouter::spawn(FairLossLink::new(context.clone()));
        tasks.push(task);

        let (stubborn, task) = EventRouter::spawn(StubbornLink::new(
            fair_loss.clone(),
            StubbornConfig::from_config(&config),
        ));
        tasks.push(task);
        fair_loss.register(DeliveryChannel::any(stubborn.mailbox()))?;

        let (perfect, task) = EventRouter::spawn(PerfectLink::new(
            stubborn.clone(),
            config.perfect_history_capacity,
        ));
        tasks.push(task);
        stubborn.register(DeliveryChannel::any(perfect.mailbox()))?;

        let (application, task) = ApplicationLayer::spawn(&perfect, context.clone())?;
        tasks.push(task);

        let (pinger, task) = Pinger::spawn(&perfect, context.clone())?;
        tasks.push(task);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let node = Self {
            config,
            context,
            fair_loss,
            application,
            pinger,
            listen_addr: None,
            control: None,
            events,
            tasks,
        };

        // Pings addressed to one of our own addresses loop back locally
        node.register_process(PING_PROCESS);

        Ok(node)
    }

    /// Start the node
    ///
    /// Binds the inbound listener, then, if a control endpoint is
    /// configured, authenticates and publishes the hidden service. Control
    /// failures are reported as [`NodeEvent::Failed`] and leave the node
    /// running without a hidden service.
    pub async fn start(&mut self) -> Result<()> {
        let endpoint = self.config.listen_endpoint();
        info!("Starting hiddenlink node on {}...", endpoint);

        let listener = match PacketListener::bind(&endpoint, self.config.io_timeout()).await {
            Ok(listener) => listener,
            Err(e) => {
                self.emit(NodeEvent::Failed(format!("listen on {}: {}", endpoint, e)));
                return Err(e).with_context(|| format!("Failed to bind {}", endpoint));
            }
        };
        let local = listener.local_addr()?;
        self.tasks.push(listener.spawn(self.fair_loss.clone()));
        self.listen_addr = Some(local);
        self.emit(NodeEvent::Listening(local));

        if let Some(control_addr) = self.config.control_addr.clone() {
            if let Err(e) = self.publish_hidden_service(&control_addr, local).await {
                error!("Hidden service setup failed: {:#}", e);
                self.emit(NodeEvent::Failed(format!("{:#}", e)));
            }
        }

        info!("Node started successfully");
        Ok(())
    }

    async fn publish_hidden_service(&mut self, control_addr: &str, local: SocketAddr) -> Result<()> {
        let control = ControlChannel::connect(
            control_addr,
            self.context.clone(),
            self.config.connect_timeout(),
        )
        .await
        .with_context(|| format!("Failed to connect to control port {}", control_addr))?;

        let secret = self.config.control_password.as_deref().map(str::as_bytes);
        control
            .authenticate(secret)
            .await
            .context("Control authentication failed")?;
        self.emit(NodeEvent::ControlConnected);

        let port = OnionPort::with_target(self.config.hidden_service_port, local.to_string());
        let response = control
            .add_onion(KeyType::New, "BEST", vec![port], Vec::new())
            .await
            .context("ADD_ONION failed")?;

        let service_id = response
            .get("ServiceID")
            .ok_or_else(|| anyhow!("ADD_ONION reply carries no ServiceID"))?;
        let address = OnionAddress::from_hostname(service_id)?;
        let hostname = address.to_hostname();

        self.context.add_local_address(hostname.clone());
        self.control = Some(control);
        info!("Hidden service is now accessible at: {}", hostname);
        self.emit(NodeEvent::HiddenServiceReady(hostname));

        Ok(())
    }

    /// Stop the node
    pub async fn stop(&mut self) {
        info!("Stopping hiddenlink node...");

        if let Some(control) = self.control.take() {
            control.close();
        }
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.context.shutdown().await;
        self.listen_addr = None;
    }

    /// Route locally sent packets for process `id` into this node's stack
    pub fn register_process(&self, id: &str) -> DeliveryChannel {
        let channel = DeliveryChannel::any(self.fair_loss.mailbox());
        self.context.register_process(id, channel.clone());
        channel
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: NodeEvent) {
        // Err only means nobody is subscribed
        let _ = self.events.send(event);
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn context(&self) -> Arc<NetworkContext> {
        self.context.clone()
    }

    pub fn application(&self) -> &ApplicationLayer {
        &self.application
    }

    pub fn pinger(&self) -> &Pinger {
        &self.pinger
    }

    pub fn control(&self) -> Option<&ControlChannel> {
        self.control.as_ref()
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.listen_addr
    }

    pub fn is_running(&self) -> bool {
        self.listen_addr.is_some()
    }

    /// Get node statistics
    pub async fn stats(&self) -> NodeStats {
        let connections = self.context.connections();
        NodeStats {
            local_addresses: self.context.local_addresses(),
            listen_addr: self.listen_addr,
            cached_connections: connections.len().await,
            open_connections: connections.connected_count().await,
            control_connected: self.control.is_some(),
            is_running: self.is_running(),
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            warn!("Node dropped without stop(), aborting {} task(s)", self.tasks.len());
            for task in &self.tasks {
                task.abort();
            }
        }
    }
}

/// Node statistics
#[derive(Debug, Clone)]
pub struct NodeStats {
    pub local_addresses: Vec<String>,
    pub listen_addr: Option<SocketAddr>,
    pub cached_connections: usize,
    pub open_connections: usize,
    pub control_connected: bool,
    pub is_running: bool,
}
