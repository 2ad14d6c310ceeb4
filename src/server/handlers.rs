//! HTTP signaling and status handlers.
//!
//! All bodies are JSON. Requests are parsed by hand so malformed JSON
//! is always a 400 with an `{error, details}` body; method mismatches
//! are a 405 from the router.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::error::RelayError;
use crate::registry::{PeerRole, PeerTransport};
use crate::webrtc::signaling;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    /// Should be "offer"; kept for wire compatibility, not validated.
    #[serde(rename = "type", default)]
    pub sdp_type: Option<String>,
    #[serde(rename = "peerType", default)]
    pub peer_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(rename = "peerID")]
    pub peer_id: String,
}

#[derive(Debug, Deserialize)]
pub struct IceCandidateRequest {
    #[serde(rename = "peerID")]
    pub peer_id: String,
    pub candidate: String,
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLine", default)]
    pub sdp_mline: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: String,
    #[serde(rename = "peerCount")]
    pub peer_count: usize,
    #[serde(rename = "webPeers")]
    pub web_peers: usize,
    #[serde(rename = "pyPeers")]
    pub py_peers: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub details: String,
}

fn error_response(status: StatusCode, error: &str, details: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            details: details.to_string(),
        }),
    )
        .into_response()
}

/// Permissive CORS for every route; preflight requests short-circuit
/// with a success response.
pub async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::OK.into_response();
        apply_cors(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors(response.headers_mut());
    response
}

fn apply_cors(headers: &mut HeaderMap) {
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
}

/// POST /offer — run the admission flow, returning the answer SDP and
/// the assigned peer id.
pub async fn handle_offer(State(state): State<AppState>, body: String) -> Response {
    let request: OfferRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON", e),
    };

    let role = PeerRole::parse(request.peer_type.as_deref().unwrap_or(""));

    match signaling::admit_offer(
        &state.registry,
        &state.router,
        &state.config.stun_server,
        request.sdp,
        role,
    )
    .await
    {
        Ok((sdp, peer_id)) => (
            StatusCode::OK,
            Json(AnswerResponse {
                sdp,
                sdp_type: "answer".to_string(),
                peer_id,
            }),
        )
            .into_response(),
        Err(e @ RelayError::BadSdp(_)) => {
            error_response(StatusCode::BAD_REQUEST, "Invalid SDP offer", e)
        }
        Err(e @ RelayError::RegistryClosed) => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "Server shutting down", e)
        }
        Err(e) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to process offer",
            e,
        ),
    }
}

/// POST /answer — reserved for server-initiated offers.
pub async fn handle_answer() -> Response {
    Json(json!({"message": "Answer endpoint ready"})).into_response()
}

/// POST /ice — append a trickled ICE candidate to an admitted peer.
pub async fn handle_ice(State(state): State<AppState>, body: String) -> Response {
    let request: IceCandidateRequest = match serde_json::from_str(&body) {
        Ok(request) => request,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, "Invalid JSON", e),
    };

    match signaling::ice_append(
        &state.registry,
        &request.peer_id,
        request.candidate,
        request.sdp_mid,
        request.sdp_mline,
    )
    .await
    {
        Ok(()) => {
            info!("[signaling] ICE candidate added for peer {}", request.peer_id);
            Json(json!({"status": "ok"})).into_response()
        }
        Err(e @ RelayError::PeerNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Peer not found", e)
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, "Failed to add ICE candidate", e),
    }
}

/// GET /status — peer counts for the datagram transport.
pub async fn handle_status(State(state): State<AppState>) -> Response {
    let registry = &state.registry;
    Json(StatusResponse {
        status: "running".to_string(),
        peer_count: registry.count_by_transport(PeerTransport::WebRtc),
        web_peers: registry.count_matching(PeerRole::Controller, PeerTransport::WebRtc),
        py_peers: registry.count_matching(PeerRole::Robot, PeerTransport::WebRtc),
    })
    .into_response()
}

/// GET /health
pub async fn handle_health() -> Response {
    Json(json!({"status": "healthy"})).into_response()
}

/// GET /stats — routing counters plus socket-transport client counts.
pub async fn handle_stats(State(state): State<AppState>) -> Response {
    let stats = state.router.stats();
    Json(json!({
        "received": stats.received,
        "forwarded": stats.forwarded,
        "errors": stats.decode_errors,
        "ws_signaling": state.hub.count(),
        "ws_data_web": state
            .registry
            .count_matching(PeerRole::Controller, PeerTransport::WebSocket),
        "ws_data_python": state
            .registry
            .count_matching(PeerRole::Robot, PeerTransport::WebSocket),
    }))
    .into_response()
}
