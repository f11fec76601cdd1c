/// hiddenlink daemon library
///
/// This crate provides the daemon that runs a hiddenlink node and the
/// local HTTP API used to inspect it and submit messages.

pub mod api;

pub use api::responses::*;
pub use api::{router, ApiServer, AppState};
