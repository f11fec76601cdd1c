/// API request handlers

use super::responses::*;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hiddenlink_common::HiddenLinkError;
use hiddenlink_core::{ApplicationLayer, Message, NetworkContext, Node, OnionAddress, Pinger, Process};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub context: Arc<NetworkContext>,
    pub application: ApplicationLayer,
    pub pinger: Pinger,
    pub listen_addr: Option<SocketAddr>,
}

impl AppState {
    /// Capture the handles the API needs from a created (and usually started) node
    pub fn from_node(node: &Node) -> Self {
        Self {
            context: node.context(),
            application: node.application().clone(),
            pinger: node.pinger().clone(),
            listen_addr: node.listen_addr(),
        }
    }
}

/// Reject empty addresses and malformed .onion hostnames
fn validate_address(address: &str) -> Result<(), AppError> {
    if address.trim().is_empty() {
        return Err(AppError::bad_request("address must not be empty"));
    }
    if OnionAddress::is_onion_address(address) {
        OnionAddress::from_hostname(address)
            .map_err(|e| AppError::bad_request(format!("{}: {}", address, e)))?;
    }
    Ok(())
}

/// Handler for GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    debug!("API: GET /api/status");

    let connections = state.context.connections();

    Ok(Json(StatusResponse {
        local_addresses: state.context.local_addresses(),
        listen_addr: state.listen_addr.map(|a| a.to_string()),
        cached_connections: connections.len().await,
        open_connections: connections.connected_count().await,
    }))
}

/// Handler for POST /api/messages
pub async fn send_message(
    State(state): State<AppState>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<SendMessageResponse>, AppError> {
    debug!("API: POST /api/messages to {}", request.address);

    validate_address(&request.address)?;
    if request.id.is_empty() {
        return Err(AppError::bad_request("process id must not be empty"));
    }

    let packet = state.application.send_message(
        Process::new(request.id, request.address, request.path),
        None,
        Message::new(request.message_type, request.body.into_bytes()),
        request.response_packet_id,
    )?;

    Ok(Json(SendMessageResponse {
        packet_id: packet.source_packet_id,
        source_address: packet.source_address,
        timestamp: packet.timestamp,
    }))
}

/// Handler for POST /api/ping
pub async fn send_ping(
    State(state): State<AppState>,
    Json(request): Json<PingRequest>,
) -> Result<Json<PingResponse>, AppError> {
    debug!("API: POST /api/ping to {}", request.address);

    validate_address(&request.address)?;
    let packet = state.pinger.ping(request.address)?;

    Ok(Json(PingResponse {
        packet_id: packet.source_packet_id,
    }))
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    debug!("API: GET /health");
    (StatusCode::OK, "OK")
}

/// Application error type
pub struct AppError {
    message: String,
    status_code: StatusCode,
}

impl AppError {
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::BAD_REQUEST,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status_code: StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error!("API Error: {}", self.message);

        let body = Json(ErrorResponse::new(self.message, self.status_code.as_u16()));

        (self.status_code, body).into_response()
    }
}

impl From<HiddenLinkError> for AppError {
    fn from(err: HiddenLinkError) -> Self {
        match err {
            HiddenLinkError::LinkClosed(_) => AppError::unavailable(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}
