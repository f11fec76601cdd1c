/// REST API module for the hiddenlink daemon
///
/// Provides local HTTP endpoints to:
/// - Check node health and status
/// - Send application messages
/// - Ping other nodes

pub mod handlers;
pub mod responses;
pub mod server;

pub use handlers::AppState;
pub use responses::*;
pub use server::{router, ApiServer};
