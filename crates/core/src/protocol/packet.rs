use hiddenlink_common::Timestamp;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length in bytes of a generated packet id (hex encoded on the wire)
const PACKET_ID_LEN: usize = 16;

/// Generate a fresh random correlation id for a packet
pub fn generate_packet_id() -> String {
    let mut bytes = [0u8; PACKET_ID_LEN];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// A process reachable through the network
///
/// `id` names a local delivery target, `address` is the hidden-service
/// address of the node hosting it and `path` is an application route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Process {
    pub id: String,
    pub address: String,
    pub path: String,
}

impl Process {
    pub fn new(id: impl Into<String>, address: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}/{}", self.id, self.address, self.path)
    }
}

/// Application message. The meaning of `message_type` is up to the application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type")]
    pub message_type: i32,
    pub body: Vec<u8>,
}

impl Message {
    pub fn new(message_type: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            message_type,
            body: body.into(),
        }
    }
}

/// Authentication attached to a packet
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuthInfo {
    #[default]
    NoAuth,
    Basic { username: String, password: String },
    Token { public_key: String, session_token: String },
    Unsupported,
}

impl AuthInfo {
    pub const NO_AUTH_TAG: i32 = 0;
    pub const BASIC_TAG: i32 = 1;
    pub const TOKEN_TAG: i32 = 2;
    pub const UNSUPPORTED_TAG: i32 = -1;

    /// Wire discriminant
    pub fn type_tag(&self) -> i32 {
        match self {
            Self::NoAuth => Self::NO_AUTH_TAG,
            Self::Basic { .. } => Self::BASIC_TAG,
            Self::Token { .. } => Self::TOKEN_TAG,
            Self::Unsupported => Self::UNSUPPORTED_TAG,
        }
    }

    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn token(public_key: impl Into<String>, session_token: impl Into<String>) -> Self {
        Self::Token {
            public_key: public_key.into(),
            session_token: session_token.into(),
        }
    }
}

/// The unit of application traffic
///
/// Retransmissions reuse the same value, so equality across retries is what
/// the perfect link relies on for deduplication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Packet {
    pub source_packet_id: String,
    /// Empty unless this packet answers another one
    pub response_packet_id: String,
    pub source_address: String,
    pub target_process: Process,
    pub auth_info: AuthInfo,
    /// Creation time in Unix epoch milliseconds
    pub timestamp: i64,
    pub message: Message,
}

impl Packet {
    /// Create a packet with a fresh `source_packet_id`
    pub fn new(
        source_address: impl Into<String>,
        target_process: Process,
        auth_info: AuthInfo,
        message: Message,
    ) -> Self {
        Self {
            source_packet_id: generate_packet_id(),
            response_packet_id: String::new(),
            source_address: source_address.into(),
            target_process,
            auth_info,
            timestamp: Timestamp::now().as_millis(),
            message,
        }
    }

    pub fn with_source_packet_id(mut self, id: impl Into<String>) -> Self {
        self.source_packet_id = id.into();
        self
    }

    pub fn with_response_packet_id(mut self, id: impl Into<String>) -> Self {
        self.response_packet_id = id.into();
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// True when this packet answers a previously sent one
    pub fn is_response(&self) -> bool {
        !self.response_packet_id.is_empty()
    }

    /// Build a response to this packet, sent from our address back to the sender
    pub fn reply(&self, target_process: Process, message: Message) -> Packet {
        Packet::new(
            self.target_process.address.clone(),
            target_process,
            AuthInfo::NoAuth,
            message,
        )
        .with_response_packet_id(self.source_packet_id.clone())
    }
}
