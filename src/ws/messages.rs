//! JSON envelopes for the WebSocket endpoints.
//!
//! Both endpoints speak tagged JSON objects; the data endpoint also
//! accepts raw binary twist frames. Unknown tags fail to parse and are
//! logged and dropped by the socket pumps.

use serde::{Deserialize, Serialize};

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

/// Envelopes on the `/ws/signaling` endpoint.
///
/// Offer, answer and ICE envelopes are broadcast to every other
/// signaling client with `peer_id` rewritten to the sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalEnvelope {
    Welcome {
        peer_id: String,
        peer_type: String,
        timestamp: u64,
    },
    Offer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_type: Option<String>,
        sdp: String,
    },
    Answer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_type: Option<String>,
        sdp: String,
    },
    Ice {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_id: Option<String>,
        candidate: serde_json::Value,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    Pong {
        peer_id: String,
        timestamp: u64,
    },
}

impl SignalEnvelope {
    pub fn msg_type(&self) -> &'static str {
        match self {
            SignalEnvelope::Welcome { .. } => "welcome",
            SignalEnvelope::Offer { .. } => "offer",
            SignalEnvelope::Answer { .. } => "answer",
            SignalEnvelope::Ice { .. } => "ice",
            SignalEnvelope::Ping { .. } => "ping",
            SignalEnvelope::Pong { .. } => "pong",
        }
    }

    /// Stamp the sender's id onto a broadcastable envelope.
    pub fn set_sender(&mut self, id: &str) {
        match self {
            SignalEnvelope::Offer { peer_id, .. }
            | SignalEnvelope::Answer { peer_id, .. }
            | SignalEnvelope::Ice { peer_id, .. } => *peer_id = Some(id.to_string()),
            _ => {}
        }
    }
}

/// Envelopes on the `/ws/data` endpoint. The `twist` envelope is an
/// alternate carrier for the binary frame (base64 inside JSON).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DataEnvelope {
    Welcome {
        peer_id: String,
        peer_type: String,
        timestamp: u64,
    },
    Twist {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
    Pong {
        peer_id: String,
        timestamp: u64,
    },
}
