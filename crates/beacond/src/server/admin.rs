//! Administrative HTTP handlers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use beacon_core::ConnectionId;
use beacon_protocol::{
    preview, BroadcastRequest, BroadcastResponse, ErrorResponse, HealthResponse,
    PersonalMessageRequest, PersonalMessageResponse, StatusResponse,
};
use tracing::info;

use super::AppState;
use crate::registry::RegistryError;
use crate::transport::SendError;

/// Errors returned by the admin endpoints, rendered as `{"detail": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum AdminError {
    #[error("Message must not be empty")]
    EmptyMessage,

    #[error("Client not connected")]
    ClientNotConnected,

    #[error("Client disconnected while sending: {0}")]
    SendFailed(#[from] SendError),

    #[error("Registry unavailable")]
    Unavailable,
}

impl From<RegistryError> for AdminError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownClientId(_) => Self::ClientNotConnected,
            _ => Self::Unavailable,
        }
    }
}

impl AdminError {
    fn status(&self) -> StatusCode {
        match self {
            Self::EmptyMessage => StatusCode::BAD_REQUEST,
            Self::ClientNotConnected => StatusCode::NOT_FOUND,
            Self::SendFailed(_) => StatusCode::GONE,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (self.status(), Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

/// `GET /`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AdminError> {
    let registry = state.broadcaster.registry();
    let clients = registry.clients().await?;

    Ok(Json(StatusResponse::new(
        state.coordinator.phase(),
        registry.is_accepting(),
        clients,
    )))
}

/// `POST /notify/broadcast`
pub async fn notify_broadcast(
    State(state): State<AppState>,
    Json(request): Json<BroadcastRequest>,
) -> Result<Json<BroadcastResponse>, AdminError> {
    if request.message.is_empty() {
        return Err(AdminError::EmptyMessage);
    }

    let report = state.broadcaster.broadcast_all(&request.message).await?;
    let active = state.broadcaster.registry().count().await?;

    info!(
        delivered = report.delivered,
        message = %preview(&request.message, state.config.message_preview_len),
        "Admin broadcast sent"
    );

    Ok(Json(BroadcastResponse::sent(report.delivered, active)))
}

/// `POST /notify/{client_id}`
pub async fn notify_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
    Json(request): Json<PersonalMessageRequest>,
) -> Result<Json<PersonalMessageResponse>, AdminError> {
    let client_id = ConnectionId::new(client_id);
    let handle = state
        .broadcaster
        .registry()
        .lookup_by_id(&client_id)
        .await?;

    state
        .broadcaster
        .send_personal(&request.message, &handle)
        .await?;

    info!(
        client_id = %client_id,
        message = %preview(&request.message, state.config.message_preview_len),
        "Admin personal message sent"
    );

    Ok(Json(PersonalMessageResponse::sent(client_id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AdminError::EmptyMessage.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AdminError::from(RegistryError::UnknownClientId(ConnectionId::new("x"))).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AdminError::from(SendError::Closed).status(),
            StatusCode::GONE
        );
        assert_eq!(
            AdminError::from(RegistryError::ChannelClosed).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_not_connected_detail() {
        assert_eq!(AdminError::ClientNotConnected.to_string(), "Client not connected");
    }
}
