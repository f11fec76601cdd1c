pub mod control;
pub mod links;
pub mod network;
pub mod node;
pub mod protocol;
pub mod service;
pub mod transport;

pub use protocol::*;

// Re-export link stack types
pub use links::{
    AnyMatcher, ApplicationLayer, DeliveryChannel, DeliveryChannels, EndpointMatcher,
    EventRouter, EventTask, FnMatcher, Link, LinkHandle, ListenerId, MessageListener,
    PacketMatcher, PathMatcher, Pinger, TaskMatcher,
};

// Re-export network types
pub use network::{ConnectionCache, NetworkContext};

// Re-export control types
pub use control::{
    ControlChannel, ControlCommand, ControlError, ControlEvent, ControlNotification,
    ControlResponse, ControlTransaction, PasswordDigest,
};

pub use node::{Node, NodeEvent, NodeStats};
pub use service::{OnionAddress, OnionAddressError};
pub use transport::{PacketListener, TunnelError};
