//! End-to-end WebRTC admission tests.
//!
//! A real client-side RTCPeerConnection negotiates against POST /offer
//! over loopback (host candidates only, no STUN) and exchanges frames
//! with a WebSocket peer across the relay.

use anyhow::Result;
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use twist_relay::config::Config;
use twist_relay::server::{self, AppState};
use twist_relay::{TwistMessage, Vector3};

async fn spawn_server() -> (String, AppState) {
    // Empty STUN server: loopback host candidates are all these tests need
    let config = Config {
        stun_server: String::new(),
        ..Default::default()
    };
    let state = AppState::new(config);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let app_state = state.clone();
    tokio::spawn(async move {
        axum::serve(listener, server::app(app_state)).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    (addr, state)
}

async fn client_peer_connection() -> Result<Arc<RTCPeerConnection>> {
    let mut media = MediaEngine::default();
    media.register_default_codecs()?;
    let mut interceptors = Registry::new();
    interceptors = register_default_interceptors(interceptors, &mut media)?;

    let api = APIBuilder::new()
        .with_media_engine(media)
        .with_interceptor_registry(interceptors)
        .build();

    let pc = api
        .new_peer_connection(RTCConfiguration::default())
        .await?;
    Ok(Arc::new(pc))
}

/// Offer against the relay and apply the returned answer. The local
/// offer is gathered to completion first so no trickle is required.
async fn admit_controller(addr: &str, pc: &Arc<RTCPeerConnection>) -> Result<String> {
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    let _ = gather_complete.recv().await;
    let local = pc.local_description().await.expect("no local description");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/offer", addr))
        .json(&json!({"sdp": local.sdp, "type": "offer", "peerType": "web"}))
        .send()
        .await?;
    assert_eq!(response.status(), 200);

    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["type"], "answer");
    let peer_id = body["peerID"].as_str().expect("missing peerID").to_string();
    assert_eq!(peer_id.len(), 8);

    let answer = RTCSessionDescription::answer(body["sdp"].as_str().unwrap().to_string())?;
    pc.set_remote_description(answer).await?;

    Ok(peer_id)
}

#[tokio::test]
async fn test_webrtc_controller_to_websocket_robot() -> Result<()> {
    let (addr, _state) = spawn_server().await;

    // Robot on the socket transport
    let (mut robot, _) = connect_async(format!("ws://{}/ws/data?type=python", addr)).await?;
    let welcome = tokio::time::timeout(Duration::from_secs(2), robot.next())
        .await
        .expect("welcome timeout")
        .unwrap()?;
    assert!(welcome.to_text()?.contains("welcome"));

    // Controller on the datagram transport
    let pc = client_peer_connection().await?;
    let dc = pc
        .create_data_channel(
            "twist",
            Some(RTCDataChannelInit {
                ordered: Some(true),
                ..Default::default()
            }),
        )
        .await?;

    let (open_tx, mut open_rx) = mpsc::channel::<()>(1);
    dc.on_open(Box::new(move || {
        let _ = open_tx.try_send(());
        Box::pin(async {})
    }));

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Vec<u8>>(8);
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let tx = inbound_tx.clone();
        let data = msg.data.to_vec();
        Box::pin(async move {
            let _ = tx.send(data).await;
        })
    }));

    let _peer_id = admit_controller(&addr, &pc).await?;

    // The admitted peer shows up on /status before the channel opens
    let status: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
        .await?
        .json()
        .await?;
    assert_eq!(status["status"], "running");
    assert_eq!(status["peerCount"], 1);
    assert_eq!(status["webPeers"], 1);
    assert_eq!(status["pyPeers"], 0);

    tokio::time::timeout(Duration::from_secs(15), open_rx.recv())
        .await
        .expect("data channel never opened");

    // Controller -> robot, byte-for-byte
    let frame = TwistMessage {
        linear: Vector3 {
            y: 0.8,
            ..Default::default()
        },
        angular: Vector3 {
            z: -0.4,
            ..Default::default()
        },
        timestamp: 42,
    }
    .encode();
    dc.send(&bytes::Bytes::from(frame.clone())).await?;

    let delivered = loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), robot.next())
            .await
            .expect("frame never reached robot")
            .unwrap()?;
        match msg {
            Message::Binary(data) => break data,
            _ => continue,
        }
    };
    assert_eq!(delivered, frame);

    // Robot -> controller across transports
    let reply = TwistMessage {
        linear: Vector3 {
            x: -1.0,
            ..Default::default()
        },
        timestamp: 43,
        ..Default::default()
    }
    .encode();
    robot.send(Message::Binary(reply.clone())).await?;

    let received = tokio::time::timeout(Duration::from_secs(5), inbound_rx.recv())
        .await
        .expect("reply never reached controller")
        .expect("inbound channel closed");
    assert_eq!(received, reply);

    tokio::time::sleep(Duration::from_millis(100)).await;
    let stats: serde_json::Value = reqwest::get(format!("http://{}/stats", addr))
        .await?
        .json()
        .await?;
    assert_eq!(stats["received"], 2);
    assert_eq!(stats["forwarded"], 2);
    assert_eq!(stats["errors"], 0);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_ice_append_for_admitted_peer() -> Result<()> {
    let (addr, _state) = spawn_server().await;

    let pc = client_peer_connection().await?;
    let _dc = pc.create_data_channel("twist", None).await?;
    let peer_id = admit_controller(&addr, &pc).await?;

    let client = reqwest::Client::new();

    // A well-formed host candidate is accepted after ANSWERED
    let response = client
        .post(format!("http://{}/ice", addr))
        .json(&json!({
            "peerID": peer_id,
            "candidate": "candidate:3013953624 1 udp 2122260223 127.0.0.1 47591 typ host generation 0",
            "sdpMid": "0",
            "sdpMLine": 0
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["status"], "ok");

    // Unknown id is a 404
    let response = client
        .post(format!("http://{}/ice", addr))
        .json(&json!({
            "peerID": "00000000",
            "candidate": "candidate:1 1 udp 1 127.0.0.1 1 typ host"
        }))
        .send()
        .await?;
    assert_eq!(response.status(), 404);

    pc.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_unusable_sdp_is_rejected() -> Result<()> {
    let (addr, _state) = spawn_server().await;

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/offer", addr))
        .json(&json!({"sdp": "garbage", "type": "offer", "peerType": "web"}))
        .send()
        .await?;
    assert_eq!(response.status(), 400);
    let body: serde_json::Value = response.json().await?;
    assert_eq!(body["error"], "Invalid SDP offer");

    // A failed admission leaves nothing behind
    let status: serde_json::Value = reqwest::get(format!("http://{}/status", addr))
        .await?
        .json()
        .await?;
    assert_eq!(status["peerCount"], 0);

    Ok(())
}

#[tokio::test]
async fn test_offers_rejected_after_shutdown() -> Result<()> {
    let (addr, state) = spawn_server().await;
    state.registry.close_all();

    let pc = client_peer_connection().await?;
    let _dc = pc.create_data_channel("twist", None).await?;
    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;
    let mut gather_complete = pc.gathering_complete_promise().await;
    let _ = gather_complete.recv().await;
    let local = pc.local_description().await.expect("no local description");

    let client = reqwest::Client::new();
    let response = client
        .post(format!("http://{}/offer", addr))
        .json(&json!({"sdp": local.sdp, "type": "offer", "peerType": "web"}))
        .send()
        .await?;
    assert_eq!(response.status(), 503);

    pc.close().await?;
    Ok(())
}
