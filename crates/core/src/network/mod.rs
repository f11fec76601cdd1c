/// Node-wide network state
///
/// This module provides the shared context every link consults:
/// - the per-destination outbound connection cache
/// - the list of hidden-service addresses this node owns
/// - topic registries for local process delivery and control notifications

mod connection_cache;
mod context;

pub use connection_cache::ConnectionCache;
pub use context::{NetworkContext, TopicRegistry};
