//! RTCPeerConnection construction and event wiring.

use std::sync::Arc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{RelayError, Result};
use crate::registry::{PeerRecord, PeerRegistry};
use crate::router::Router;

/// Create a peer connection configured with the given STUN server.
/// An empty STUN URL yields host candidates only.
pub async fn new_peer_connection(stun_server: &str) -> Result<Arc<RTCPeerConnection>> {
    let mut media = MediaEngine::default();
    media
        .register_default_codecs()
        .map_err(|e| RelayError::SignalingInternal(e.to_string()))?;

    let mut interceptors = Registry::new();
    interceptors = register_default_interceptors(interceptors, &mut media)
        .map_err(|e| RelayError::SignalingInternal(e.to_string()))?;

    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(interceptors)
        .build();

    let ice_servers = if stun_server.is_empty() {
        Vec::new()
    } else {
        vec![RTCIceServer {
            urls: vec![stun_server.to_string()],
            ..Default::default()
        }]
    };

    let config = RTCConfiguration {
        ice_servers,
        ..Default::default()
    };

    let pc = api
        .new_peer_connection(config)
        .await
        .map_err(|e| RelayError::SignalingInternal(e.to_string()))?;

    Ok(Arc::new(pc))
}

/// Wire a peer connection's events to the registry and router:
/// Failed/Closed evicts the record, incoming data channels fill the
/// record's send sink and feed inbound frames to the router.
pub fn wire_peer(
    pc: &Arc<RTCPeerConnection>,
    record: Arc<PeerRecord>,
    registry: Arc<PeerRegistry>,
    router: Arc<Router>,
) {
    let state_id = record.id.clone();
    let state_registry = registry.clone();
    pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
        let id = state_id.clone();
        let registry = state_registry.clone();
        Box::pin(async move {
            info!("[peer {}] connection state: {}", id, state);
            if matches!(
                state,
                RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
            ) {
                registry.remove(&id);
            }
        })
    }));

    let ice_id = record.id.clone();
    pc.on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
        let id = ice_id.clone();
        Box::pin(async move {
            debug!("[peer {}] ICE state: {}", id, state);
        })
    }));

    let dc_record = record;
    let dc_router = router;
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let record = dc_record.clone();
        let router = dc_router.clone();
        Box::pin(async move {
            info!(
                "[peer {}] data channel received: {}",
                record.id,
                dc.label()
            );
            record.attach_channel(dc.clone());
            setup_data_channel(&dc, record, router);
        })
    }));
}

fn setup_data_channel(dc: &Arc<RTCDataChannel>, record: Arc<PeerRecord>, router: Arc<Router>) {
    let open_id = record.id.clone();
    let open_label = dc.label().to_string();
    dc.on_open(Box::new(move || {
        info!("[peer {}] data channel '{}' opened", open_id, open_label);
        Box::pin(async {})
    }));

    let close_id = record.id.clone();
    dc.on_close(Box::new(move || {
        let id = close_id.clone();
        Box::pin(async move {
            info!("[peer {}] data channel closed", id);
        })
    }));

    let error_id = record.id.clone();
    dc.on_error(Box::new(move |err| {
        let id = error_id.clone();
        Box::pin(async move {
            warn!("[peer {}] data channel error: {}", id, err);
        })
    }));

    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let record = record.clone();
        let router = router.clone();
        Box::pin(async move {
            router.route(&record, &msg.data).await;
        })
    }));
}
