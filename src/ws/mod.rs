//! WebSocket (socket transport) endpoints.
//!
//! `/ws/data` carries velocity frames and registers its clients as
//! routable peers. `/ws/signaling` is a broadcast hub for clients doing
//! their own offer/answer exchange. Both endpoints send a welcome frame
//! on connect and run the keepalive of the read/write pumps in
//! `client`.

pub mod client;
pub mod messages;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use crate::registry::{PeerRole, OUTBOUND_BUFFER};
use crate::server::AppState;
use self::messages::SignalEnvelope;

/// Maximum inbound WebSocket message size (1 MiB).
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Role selector: `web`/`controller` or `python`/`robot`.
    #[serde(rename = "type")]
    pub peer_type: Option<String>,
}

impl WsQuery {
    fn role(&self) -> PeerRole {
        PeerRole::parse(self.peer_type.as_deref().unwrap_or(""))
    }
}

/// Upgrade handler for `/ws/data`.
pub async fn data_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let role = query.role();
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| client::run_data_socket(socket, role, state))
}

/// Upgrade handler for `/ws/signaling`.
pub async fn signaling_ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let role = query.role();
    ws.max_message_size(MAX_FRAME_BYTES)
        .on_upgrade(move |socket| client::run_signaling_socket(socket, role, state))
}

struct SignalingClient {
    role: PeerRole,
    tx: mpsc::Sender<Vec<u8>>,
    closed_tx: watch::Sender<bool>,
}

/// Connected signaling clients. These are not velocity-frame peers:
/// they never appear in the registry and the router never targets
/// them; envelopes they send are relayed to every other signaling
/// client.
pub struct SignalingHub {
    clients: RwLock<HashMap<String, SignalingClient>>,
}

impl Default for SignalingHub {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalingHub {
    pub fn new() -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
        }
    }

    /// Register a client; returns the close signal for its write pump.
    fn register(
        &self,
        id: &str,
        role: PeerRole,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> watch::Receiver<bool> {
        let (closed_tx, closed_rx) = watch::channel(false);
        self.clients.write().unwrap().insert(
            id.to_string(),
            SignalingClient {
                role,
                tx,
                closed_tx,
            },
        );
        closed_rx
    }

    fn remove(&self, id: &str) {
        if let Some(client) = self.clients.write().unwrap().remove(id) {
            let _ = client.closed_tx.send(true);
            info!("[ws-signaling] client disconnected: {} ({})", id, client.role);
        }
    }

    pub fn count(&self) -> usize {
        self.clients.read().unwrap().len()
    }

    /// Relay an envelope to every client except the sender, with the
    /// sender's id stamped on. A client with a full buffer misses the
    /// envelope.
    fn broadcast_from(&self, sender_id: &str, mut envelope: SignalEnvelope) {
        envelope.set_sender(sender_id);
        let Ok(json) = serde_json::to_vec(&envelope) else {
            return;
        };

        let clients = self.clients.read().unwrap();
        for (id, client) in clients.iter() {
            if id == sender_id {
                continue;
            }
            if client.tx.try_send(json.clone()).is_err() {
                warn!("[ws-signaling] send buffer full for {}", id);
            }
        }
    }

    /// Drop every client, waking their write pumps.
    pub fn close_all(&self) {
        let drained: Vec<SignalingClient> = {
            let mut clients = self.clients.write().unwrap();
            clients.drain().map(|(_, c)| c).collect()
        };
        for client in &drained {
            let _ = client.closed_tx.send(true);
        }
    }
}

/// Create the bounded outbound buffer for one socket client.
pub(crate) fn outbound_channel() -> (mpsc::Sender<Vec<u8>>, mpsc::Receiver<Vec<u8>>) {
    mpsc::channel(OUTBOUND_BUFFER)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_register_broadcast_remove() {
        let hub = SignalingHub::new();
        let (tx_a, mut rx_a) = outbound_channel();
        let (tx_b, mut rx_b) = outbound_channel();

        hub.register("aaaa", PeerRole::Controller, tx_a);
        hub.register("bbbb", PeerRole::Robot, tx_b);
        assert_eq!(hub.count(), 2);

        hub.broadcast_from(
            "aaaa",
            SignalEnvelope::Offer {
                peer_id: None,
                peer_type: None,
                sdp: "v=0".to_string(),
            },
        );

        // Sender does not hear its own envelope
        assert!(rx_a.try_recv().is_err());
        let delivered = rx_b.try_recv().unwrap();
        let parsed: SignalEnvelope = serde_json::from_slice(&delivered).unwrap();
        match parsed {
            SignalEnvelope::Offer { peer_id, sdp, .. } => {
                assert_eq!(peer_id.as_deref(), Some("aaaa"));
                assert_eq!(sdp, "v=0");
            }
            other => panic!("expected offer, got {:?}", other),
        }

        hub.remove("bbbb");
        assert_eq!(hub.count(), 1);
        hub.remove("bbbb");
        assert_eq!(hub.count(), 1);
    }

    #[test]
    fn test_hub_close_all_signals_clients() {
        let hub = SignalingHub::new();
        let (tx, _rx) = outbound_channel();
        let mut closed = hub.register("cccc", PeerRole::Controller, tx);

        hub.close_all();
        assert_eq!(hub.count(), 0);
        assert!(*closed.borrow_and_update());
    }
}
