pub mod config;
pub mod error;
pub mod types;

pub use config::{ConfigError, NodeConfig};
pub use error::{HiddenLinkError, Result};
pub use types::Timestamp;
