//! Error types for twist-relay

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("invalid twist message size: expected 48 or 56 bytes, got {0}")]
    FrameInvalidSize(usize),

    #[error("peer not found: {0}")]
    PeerNotFound(String),

    #[error("peer {0} transport not ready")]
    PeerNotReady(String),

    #[error("send buffer full for {0}")]
    SendBufferFull(String),

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("invalid SDP: {0}")]
    BadSdp(String),

    #[error("signaling failed: {0}")]
    SignalingInternal(String),

    #[error("keepalive deadline exceeded")]
    KeepaliveTimeout,

    #[error("registry closed")]
    RegistryClosed,
}

pub type Result<T> = std::result::Result<T, RelayError>;
