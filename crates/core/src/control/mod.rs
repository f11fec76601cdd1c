/// Control protocol of the transport daemon
///
/// Commands are single CRLF-terminated lines (or a `+` data block for
/// `LOADCONF`). Replies are status-coded line groups. The
/// [`ControlChannel`] pairs replies with the commands that caused them and
/// publishes the results on the network context.

mod channel;
mod command;
mod password;
mod reply;

pub use channel::ControlChannel;
pub use command::{
    info_keys, CircuitPurpose, ControlCommand, EventKind, KeyType, OnionClient, OnionFlag,
    OnionPort, SignalKind,
};
pub use password::PasswordDigest;
pub use reply::{read_reply, read_response, ControlResponse, ReplyLine};

use thiserror::Error;

/// Control protocol errors
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("Malformed control reply line: {0:?}")]
    MalformedReply(String),

    #[error("Control stream ended in the middle of a reply")]
    UnexpectedEof,

    #[error("Daemon rejected command: {code} {message}")]
    Rejected { code: u16, message: String },

    #[error("Control channel closed")]
    Closed,

    #[error("Timed out connecting to control port")]
    Timeout,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A completed request/response pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlTransaction {
    pub request: ControlCommand,
    pub response: ControlResponse,
}

/// An unsolicited daemon notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlEvent {
    pub response: ControlResponse,
}

/// What subscribers of the control topics receive
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlNotification {
    Event(ControlEvent),
    Transaction(ControlTransaction),
}
