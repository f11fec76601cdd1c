/// hiddenlink daemon - point-to-point messaging over hidden services
///
/// This daemon runs a hiddenlink node that:
/// - Publishes a hidden service through the transport daemon's control port
/// - Accepts inbound packets and delivers them through the link stack
/// - Sends packets to other nodes through the SOCKS proxy
/// - Serves a small local HTTP API

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use hiddenlink_common::config::links::PONG;
use hiddenlink_common::NodeConfig;
use hiddenlink_core::{FnMatcher, Message, Node, NodeEvent, NodeStats, OnionAddress, Packet, Process};
use hiddenlink_daemon::{ApiServer, AppState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG: &str = "hiddenlink.toml";

/// How long to wait for a PONG
const PING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Parser, Debug)]
#[command(name = "hiddenlink", version)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config", global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the node and the local API until Ctrl+C
    Run,
    /// Send one message to a remote process
    Send {
        /// Destination node address
        address: String,
        /// Message body
        body: String,
        /// Destination process id
        #[arg(long, default_value = "chat")]
        id: String,
        /// Destination path
        #[arg(long, default_value = "inbox")]
        path: String,
        /// Application message type
        #[arg(long = "type", default_value_t = 1)]
        message_type: i32,
    },
    /// Ping a remote node and wait for its PONG
    Ping {
        /// Destination node address
        address: String,
    },
    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    if let Commands::InitConfig { force } = cli.command {
        init_logging(cli.verbose);
        return init_config(&config_path, force);
    }

    let mut config = load_config(&config_path)?;
    config.verbose |= cli.verbose;
    init_logging(config.verbose);

    info!("Starting hiddenlink daemon v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Run => run_node(config).await,
        Commands::Send {
            address,
            body,
            id,
            path,
            message_type,
        } => send_once(config, Process::new(id, address, path), message_type, body).await,
        Commands::Ping { address } => ping(config, address).await,
        Commands::InitConfig { .. } => Ok(()),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

fn load_config(path: &Path) -> Result<NodeConfig> {
    if path.exists() {
        info!("Loading configuration from {:?}", path);
        let config = NodeConfig::from_file(&path.to_path_buf())
            .with_context(|| format!("Failed to load {:?}", path))?;
        Ok(config)
    } else {
        info!("No configuration file found, using defaults");
        Ok(NodeConfig::default())
    }
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{:?} already exists (use --force to overwrite)", path);
    }
    NodeConfig::default()
        .to_file(&path.to_path_buf())
        .with_context(|| format!("Failed to write {:?}", path))?;
    info!("Saved default configuration to {:?}", path);
    Ok(())
}

/// Log lifecycle events until the node goes away
fn spawn_event_logger(node: &Node) {
    let mut events = node.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                NodeEvent::Listening(addr) => info!("Listening for packets on {}", addr),
                NodeEvent::ControlConnected => info!("Control port authenticated"),
                NodeEvent::HiddenServiceReady(address) => info!("Reachable at {}", address),
                NodeEvent::Failed(reason) => error!("Node failure: {}", reason),
            }
        }
    });
}

/// Run the full node
async fn run_node(config: NodeConfig) -> Result<()> {
    let api_addr = config.api_endpoint()?;

    info!("Creating hiddenlink node...");
    let mut node = Node::new(config).await?;
    spawn_event_logger(&node);

    info!("Starting node...");
    node.start().await?;

    print_node_stats(&node.stats().await);

    let api_server = ApiServer::new(api_addr, AppState::from_node(&node));
    tokio::spawn(async move {
        if let Err(e) = api_server.start().await {
            warn!("API server error: {}", e);
        }
    });

    // Keep node running
    info!("Node is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received");
    node.stop().await;

    info!("Node stopped");
    Ok(())
}

/// Send a single message and give the outbound write time to finish
async fn send_once(config: NodeConfig, target: Process, message_type: i32, body: String) -> Result<()> {
    if OnionAddress::is_onion_address(&target.address) {
        OnionAddress::from_hostname(&target.address)?;
    }
    let linger = config.connect_timeout() + config.io_timeout();

    let mut node = Node::new(config).await?;
    let packet = node.application().send_message(
        target,
        None,
        Message::new(message_type, body.into_bytes()),
        None,
    )?;
    println!("Sent packet {}", packet.source_packet_id);

    tokio::time::sleep(linger).await;
    node.stop().await;
    Ok(())
}

/// Ping a node; the PONG comes back to our hidden service, so the node is started
async fn ping(config: NodeConfig, address: String) -> Result<()> {
    if config.control_addr.is_none() {
        warn!("No control_addr configured; the PONG has no way back to this node");
    }

    let mut node = Node::new(config).await?;
    spawn_event_logger(&node);
    node.start().await?;

    let (tx, mut pongs) = unbounded_channel();
    node.application().register_listener(
        Arc::new(move |packet: &Packet| {
            let _ = tx.send(packet.clone());
        }),
        vec![Arc::new(FnMatcher(|p: &Packet| p.message.message_type == PONG))],
    );

    let request = node.pinger().ping(address.clone())?;
    let started = std::time::Instant::now();

    let result = tokio::time::timeout(PING_TIMEOUT, async {
        while let Some(pong) = pongs.recv().await {
            if pong.response_packet_id == request.source_packet_id {
                return Some(pong);
            }
        }
        None
    })
    .await;

    match result {
        Ok(Some(pong)) => println!(
            "PONG from {} in {:?}",
            pong.source_address,
            started.elapsed()
        ),
        _ => println!("No PONG from {} within {:?}", address, PING_TIMEOUT),
    }

    node.stop().await;
    Ok(())
}

/// Print node statistics
fn print_node_stats(stats: &NodeStats) {
    println!("\n========================================");
    println!("         hiddenlink Node Status");
    println!("========================================");
    println!("Status:           {}", if stats.is_running { "Running" } else { "Stopped" });
    match &stats.listen_addr {
        Some(addr) => println!("Listening on:     {}", addr),
        None => println!("Listening on:     -"),
    }
    if stats.local_addresses.is_empty() {
        println!("Hidden service:   none");
    }
    for address in &stats.local_addresses {
        println!("Hidden service:   {}", address);
    }
    println!("Control port:     {}", if stats.control_connected { "connected" } else { "not connected" });
    println!("Connections:      {} cached, {} open", stats.cached_connections, stats.open_connections);
    println!("========================================\n");
}
