use thiserror::Error;

/// Common error types for hiddenlink
#[derive(Debug, Error)]
pub enum HiddenLinkError {
    #[error("Link closed: {0}")]
    LinkClosed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for hiddenlink operations
pub type Result<T> = std::result::Result<T, HiddenLinkError>;

impl HiddenLinkError {
    pub fn link_closed(msg: impl Into<String>) -> Self {
        Self::LinkClosed(msg.into())
    }
}
