//! Offer/answer admission flow for datagram-transport peers.

use std::sync::Arc;
use tracing::info;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::error::{RelayError, Result};
use crate::registry::{PeerRegistry, PeerRole, PeerTransport, SendSink};
use crate::router::Router;

use super::peer;

/// Admit a peer from an SDP offer. Returns the answer SDP and the
/// assigned peer id.
///
/// The answer is produced gather-then-answer: ICE gathering completes
/// before this returns, so the SDP is self-contained and clients need
/// not trickle. Candidates arriving later still land via `ice_append`.
/// Any failure before the answer removes the nascent record.
pub async fn admit_offer(
    registry: &Arc<PeerRegistry>,
    router: &Arc<Router>,
    stun_server: &str,
    sdp: String,
    role: PeerRole,
) -> Result<(String, String)> {
    let pc = peer::new_peer_connection(stun_server).await?;

    let record = match registry.create(
        role,
        PeerTransport::WebRtc,
        SendSink::data_channel(),
        Some(pc.clone()),
    ) {
        Ok(record) => record,
        Err(e) => {
            let _ = pc.close().await;
            return Err(e);
        }
    };
    peer::wire_peer(&pc, record.clone(), registry.clone(), router.clone());

    let offer = match RTCSessionDescription::offer(sdp) {
        Ok(offer) => offer,
        Err(e) => {
            registry.remove(&record.id);
            return Err(RelayError::BadSdp(e.to_string()));
        }
    };
    if let Err(e) = pc.set_remote_description(offer).await {
        registry.remove(&record.id);
        return Err(RelayError::BadSdp(e.to_string()));
    }

    let answer = match pc.create_answer(None).await {
        Ok(answer) => answer,
        Err(e) => {
            registry.remove(&record.id);
            return Err(RelayError::SignalingInternal(e.to_string()));
        }
    };
    if let Err(e) = pc.set_local_description(answer).await {
        registry.remove(&record.id);
        return Err(RelayError::SignalingInternal(e.to_string()));
    }

    let mut gather_complete = pc.gathering_complete_promise().await;
    let _ = gather_complete.recv().await;

    let local = match pc.local_description().await {
        Some(local) => local,
        None => {
            registry.remove(&record.id);
            return Err(RelayError::SignalingInternal(
                "no local description after gathering".to_string(),
            ));
        }
    };

    record.promote();
    info!(
        "[signaling] offer processed for peer {} (type: {})",
        record.id, record.role
    );
    Ok((local.sdp, record.id.clone()))
}

/// Append a trickled ICE candidate to an admitted peer.
pub async fn ice_append(
    registry: &Arc<PeerRegistry>,
    id: &str,
    candidate: String,
    sdp_mid: Option<String>,
    sdp_mline_index: Option<u16>,
) -> Result<()> {
    let record = registry
        .get(id)
        .ok_or_else(|| RelayError::PeerNotFound(id.to_string()))?;
    let pc = record
        .connection()
        .ok_or_else(|| RelayError::PeerNotFound(id.to_string()))?;

    let init = RTCIceCandidateInit {
        candidate,
        sdp_mid,
        sdp_mline_index,
        username_fragment: None,
    };
    pc.add_ice_candidate(init)
        .await
        .map_err(|e| RelayError::BadSdp(e.to_string()))?;

    Ok(())
}
