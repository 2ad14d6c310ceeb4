//! Per-connection read/write pumps for the WebSocket endpoints.
//!
//! Each connection gets one reader and one writer task. The writer
//! drains the peer's bounded outbound buffer and emits a timestamped
//! protocol ping every `ping_interval`; the reader enforces the
//! keepalive deadline (`ping_interval + pong_timeout`) on every read.
//! Any inbound message refreshes the deadline. A breached deadline or a
//! failed write evicts the peer.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::KeepaliveConfig;
use crate::registry::{generate_peer_id, PeerRecord, PeerRole, PeerTransport, SendSink};
use crate::server::AppState;
use crate::twist::now_millis;

use super::messages::{DataEnvelope, SignalEnvelope};
use super::SignalingHub;

/// Serve a `/ws/data` connection: register the peer, emit the welcome
/// frame, then pump until close or eviction.
pub async fn run_data_socket(socket: WebSocket, role: PeerRole, state: AppState) {
    let (tx, rx) = super::outbound_channel();
    let record = match state.registry.create(
        role,
        PeerTransport::WebSocket,
        SendSink::socket(tx),
        None,
    ) {
        Ok(record) => record,
        Err(e) => {
            info!("[ws-data] rejecting connection: {}", e);
            return;
        }
    };
    record.promote();
    info!(
        "[ws-data] client connected: {} (type: {})",
        record.id, record.role
    );

    let welcome = DataEnvelope::Welcome {
        peer_id: record.id.clone(),
        peer_type: record.role.to_string(),
        timestamp: now_millis(),
    };
    if let Ok(json) = serde_json::to_vec(&welcome) {
        let _ = record.send(&json).await;
    }

    let (sender, receiver) = socket.split();
    let keepalive = state.config.keepalive.clone();
    let write_task = tokio::spawn(write_pump(
        sender,
        rx,
        record.subscribe_close(),
        keepalive.clone(),
        record.id.clone(),
    ));

    read_data_pump(receiver, &record, &state, &keepalive).await;

    state.registry.remove(&record.id);
    let _ = write_task.await;
    info!("[ws-data] client disconnected: {}", record.id);
}

/// Serve a `/ws/signaling` connection: register with the hub, emit the
/// welcome frame, then pump until close.
pub async fn run_signaling_socket(socket: WebSocket, role: PeerRole, state: AppState) {
    let id = generate_peer_id();
    let (tx, rx) = super::outbound_channel();
    let closed_rx = state.hub.register(&id, role, tx.clone());
    info!("[ws-signaling] client connected: {} (type: {})", id, role);

    let welcome = SignalEnvelope::Welcome {
        peer_id: id.clone(),
        peer_type: role.to_string(),
        timestamp: now_millis(),
    };
    if let Ok(json) = serde_json::to_vec(&welcome) {
        let _ = tx.try_send(json);
    }

    let (sender, receiver) = socket.split();
    let keepalive = state.config.keepalive.clone();
    let write_task = tokio::spawn(write_pump(
        sender,
        rx,
        closed_rx.clone(),
        keepalive.clone(),
        id.clone(),
    ));

    read_signaling_pump(receiver, &id, &tx, &state.hub, &keepalive, closed_rx).await;

    state.hub.remove(&id);
    let _ = write_task.await;
}

async fn read_data_pump(
    mut receiver: SplitStream<WebSocket>,
    record: &Arc<PeerRecord>,
    state: &AppState,
    keepalive: &KeepaliveConfig,
) {
    let deadline = keepalive.ping_interval + keepalive.pong_timeout;
    let mut close_rx = record.subscribe_close();

    loop {
        let result = tokio::select! {
            result = timeout(deadline, receiver.next()) => result,
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
                continue;
            }
        };
        let msg = match result {
            Err(_) => {
                warn!("[ws-data] keepalive deadline exceeded for {}", record.id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("[ws-data] read error from {}: {}", record.id, e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Binary(data) => state.router.route(record, &data).await,
            Message::Text(text) => handle_data_envelope(record, &text, state).await,
            // Any traffic counts as liveness; the deadline re-arms on
            // every read. Protocol pongs need no further handling.
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }
}

async fn handle_data_envelope(record: &Arc<PeerRecord>, text: &str, state: &AppState) {
    match serde_json::from_str::<DataEnvelope>(text) {
        Ok(DataEnvelope::Twist { data }) => state.router.route(record, &data).await,
        Ok(DataEnvelope::Ping { timestamp }) => {
            let pong = DataEnvelope::Pong {
                peer_id: record.id.clone(),
                timestamp: timestamp.unwrap_or_else(now_millis),
            };
            if let Ok(json) = serde_json::to_vec(&pong) {
                let _ = record.send(&json).await;
            }
        }
        Ok(DataEnvelope::Pong { .. }) | Ok(DataEnvelope::Welcome { .. }) => {}
        Err(e) => debug!("[ws-data] unhandled message from {}: {}", record.id, e),
    }
}

async fn read_signaling_pump(
    mut receiver: SplitStream<WebSocket>,
    id: &str,
    tx: &mpsc::Sender<Vec<u8>>,
    hub: &SignalingHub,
    keepalive: &KeepaliveConfig,
    mut close_rx: watch::Receiver<bool>,
) {
    let deadline = keepalive.ping_interval + keepalive.pong_timeout;

    loop {
        let result = tokio::select! {
            result = timeout(deadline, receiver.next()) => result,
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break;
                }
                continue;
            }
        };
        let msg = match result {
            Err(_) => {
                warn!("[ws-signaling] keepalive deadline exceeded for {}", id);
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                debug!("[ws-signaling] read error from {}: {}", id, e);
                break;
            }
            Ok(Some(Ok(msg))) => msg,
        };

        match msg {
            Message::Text(text) => match serde_json::from_str::<SignalEnvelope>(&text) {
                Ok(SignalEnvelope::Ping { timestamp }) => {
                    let pong = SignalEnvelope::Pong {
                        peer_id: id.to_string(),
                        timestamp: timestamp.unwrap_or_else(now_millis),
                    };
                    if let Ok(json) = serde_json::to_vec(&pong) {
                        let _ = tx.try_send(json);
                    }
                }
                Ok(SignalEnvelope::Pong { .. }) | Ok(SignalEnvelope::Welcome { .. }) => {}
                Ok(envelope) => {
                    debug!("[ws-signaling] {} from {}", envelope.msg_type(), id);
                    hub.broadcast_from(id, envelope);
                }
                Err(e) => debug!("[ws-signaling] unhandled message from {}: {}", id, e),
            },
            Message::Binary(_) => {
                debug!("[ws-signaling] ignoring binary message from {}", id)
            }
            Message::Ping(_) | Message::Pong(_) => {}
            Message::Close(_) => break,
        }
    }
}

/// Shared write pump: drains the outbound buffer, emits keepalive
/// pings, and exits on the close signal. Every write carries the write
/// timeout; a timed-out or failed write abandons the connection.
async fn write_pump(
    mut sender: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Vec<u8>>,
    mut closed_rx: watch::Receiver<bool>,
    keepalive: KeepaliveConfig,
    id: String,
) {
    let mut ticker = tokio::time::interval(keepalive.ping_interval);
    // the first interval tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            maybe = rx.recv() => {
                let Some(frame) = maybe else {
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                };
                // JSON envelopes go as text frames, everything else as binary
                let msg = if frame.first() == Some(&b'{') {
                    match String::from_utf8(frame) {
                        Ok(text) => Message::Text(text),
                        Err(e) => Message::Binary(e.into_bytes()),
                    }
                } else {
                    Message::Binary(frame)
                };
                match timeout(keepalive.write_timeout, sender.send(msg)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("[ws] write error to {}: {}", id, e);
                        break;
                    }
                    Err(_) => {
                        warn!("[ws] write timeout to {}", id);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let payload = now_millis().to_le_bytes().to_vec();
                match timeout(keepalive.write_timeout, sender.send(Message::Ping(payload))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        debug!("[ws] ping error to {}: {}", id, e);
                        break;
                    }
                    Err(_) => {
                        warn!("[ws] ping timeout to {}", id);
                        break;
                    }
                }
            }
            changed = closed_rx.changed() => {
                if changed.is_err() || *closed_rx.borrow() {
                    let _ = timeout(keepalive.write_timeout, sender.send(Message::Close(None))).await;
                    break;
                }
            }
        }
    }
}
