/// API request and response types

use serde::{Deserialize, Serialize};

/// Node status response
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Hidden-service addresses this node answers to
    pub local_addresses: Vec<String>,
    /// Address of the inbound packet listener, if started
    pub listen_addr: Option<String>,
    /// Destinations with a cached outbound channel
    pub cached_connections: usize,
    /// Cached channels that are still open
    pub open_connections: usize,
}

fn default_process_id() -> String {
    "chat".to_string()
}

fn default_path() -> String {
    "inbox".to_string()
}

/// Message submission request
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Destination node address
    pub address: String,
    /// Destination process id
    #[serde(default = "default_process_id")]
    pub id: String,
    /// Destination path
    #[serde(default = "default_path")]
    pub path: String,
    /// Application message type
    #[serde(rename = "type", default)]
    pub message_type: i32,
    /// Message body as UTF-8 text
    #[serde(default)]
    pub body: String,
    /// Packet id this message answers, if any
    #[serde(default)]
    pub response_packet_id: Option<String>,
}

/// Message submission response
#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageResponse {
    /// Id the remote side will answer with
    pub packet_id: String,
    /// Source address stamped on the packet (empty without a hidden service)
    pub source_address: String,
    /// Send time (milliseconds since the epoch)
    pub timestamp: i64,
}

/// Ping request
#[derive(Debug, Serialize, Deserialize)]
pub struct PingRequest {
    pub address: String,
}

/// Ping response
#[derive(Debug, Serialize, Deserialize)]
pub struct PingResponse {
    pub packet_id: String,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Error code
    pub code: u16,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: u16) -> Self {
        Self {
            error: error.into(),
            code,
        }
    }
}
