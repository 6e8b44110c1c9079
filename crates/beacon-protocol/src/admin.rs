//! JSON bodies of the administrative HTTP surface.

use std::collections::BTreeMap;

use beacon_core::{ClientInfo, ConnectionId, ShutdownPhase};
use serde::{Deserialize, Serialize};

/// Service name reported by the health endpoint.
pub const SERVICE_NAME: &str = "Beacon Notification Server";

/// Path of the WebSocket endpoint.
pub const WEBSOCKET_ENDPOINT: &str = "/ws";

/// `GET /`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub websocket_endpoint: String,
}

impl HealthResponse {
    /// The healthy response.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
            service: SERVICE_NAME.to_string(),
            websocket_endpoint: WEBSOCKET_ENDPOINT.to_string(),
        }
    }
}

/// `GET /status`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// `running` while serving, otherwise the shutdown phase
    pub status: String,
    pub active_connections: usize,
    pub accepting_new_connections: bool,
    /// Per-client metadata keyed by connection id
    pub clients: BTreeMap<ConnectionId, ClientInfo>,
}

impl StatusResponse {
    /// Builds the status body from a shutdown phase and a client listing.
    pub fn new(phase: ShutdownPhase, accepting: bool, clients: Vec<ClientInfo>) -> Self {
        let clients: BTreeMap<_, _> = clients.into_iter().map(|c| (c.id.clone(), c)).collect();
        Self {
            status: phase.to_string(),
            active_connections: clients.len(),
            accepting_new_connections: accepting,
            clients,
        }
    }
}

/// `POST /notify/broadcast` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastRequest {
    pub message: String,
}

/// `POST /notify/broadcast` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BroadcastResponse {
    pub status: String,
    pub target: String,
    pub delivered: usize,
    pub active_connections: usize,
}

impl BroadcastResponse {
    /// Response for a completed fan-out.
    pub fn sent(delivered: usize, active_connections: usize) -> Self {
        Self {
            status: "sent".to_string(),
            target: "all".to_string(),
            delivered,
            active_connections,
        }
    }
}

/// `POST /notify/{client_id}` request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalMessageRequest {
    pub message: String,
}

/// `POST /notify/{client_id}` response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonalMessageResponse {
    pub status: String,
    pub client_id: ConnectionId,
}

impl PersonalMessageResponse {
    /// Response for a delivered personal message.
    pub fn sent(client_id: ConnectionId) -> Self {
        Self {
            status: "sent".to_string(),
            client_id,
        }
    }
}

/// Error body for every non-2xx admin response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}

impl ErrorResponse {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::ConnectionInfo;
    use chrono::Utc;

    #[test]
    fn test_health_shape() {
        let json = serde_json::to_value(HealthResponse::ok()).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["websocket_endpoint"], "/ws");
    }

    #[test]
    fn test_endpoint_constants_exported_at_root() {
        let json = serde_json::to_value(HealthResponse::ok()).unwrap();
        assert_eq!(json["service"], crate::SERVICE_NAME);
        assert_eq!(json["websocket_endpoint"], crate::WEBSOCKET_ENDPOINT);
    }

    #[test]
    fn test_status_keys_clients_by_id() {
        let now = Utc::now();
        let clients = vec![
            ClientInfo::from_info(&ConnectionInfo::new(ConnectionId::new("b"), now), now),
            ClientInfo::from_info(&ConnectionInfo::new(ConnectionId::new("a"), now), now),
        ];
        let status = StatusResponse::new(ShutdownPhase::Running, true, clients);

        assert_eq!(status.status, "running");
        assert_eq!(status.active_connections, 2);

        let json = serde_json::to_value(&status).unwrap();
        assert!(json["clients"]["a"]["connected_at"].is_string());
        assert!(json["clients"]["b"]["connection_duration"].is_number());
        assert_eq!(json["accepting_new_connections"], true);
    }

    #[test]
    fn test_status_while_draining() {
        let status = StatusResponse::new(ShutdownPhase::Draining, false, Vec::new());
        assert_eq!(status.status, "draining");
        assert!(!status.accepting_new_connections);
        assert_eq!(status.active_connections, 0);
    }

    #[test]
    fn test_request_bodies_parse() {
        let req: BroadcastRequest = serde_json::from_str(r#"{"message":"hi"}"#).unwrap();
        assert_eq!(req.message, "hi");
        let req: PersonalMessageRequest = serde_json::from_str(r#"{"message":""}"#).unwrap();
        assert!(req.message.is_empty());
        assert!(serde_json::from_str::<BroadcastRequest>("{}").is_err());
    }

    #[test]
    fn test_error_body() {
        let json = serde_json::to_string(&ErrorResponse::new("Client not connected")).unwrap();
        assert_eq!(json, r#"{"detail":"Client not connected"}"#);
    }
}
