//! Process-wide peer registry.
//!
//! Tracks every admitted peer across both transports, indexed by id,
//! role, and transport kind. Records own their send sinks; nothing in a
//! record points back at the registry or the router, so lookups always
//! go id -> record through the indexes here.

use bytes::Bytes;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tracing::debug;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::RTCPeerConnection;

use crate::error::{RelayError, Result};

/// Outbound buffer capacity for socket-transport peers, in frames.
pub const OUTBOUND_BUFFER: usize = 256;

/// Role of a connected peer. Controllers originate velocity commands,
/// robots consume them; forwarding is strictly cross-role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRole {
    Controller,
    Robot,
}

impl PeerRole {
    /// The role whose peers receive frames originated by this role.
    pub fn opposite(self) -> Self {
        match self {
            PeerRole::Controller => PeerRole::Robot,
            PeerRole::Robot => PeerRole::Controller,
        }
    }

    /// Parse a wire name. Unrecognized values default to controller,
    /// matching what clients historically sent.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "python" | "robot" => PeerRole::Robot,
            _ => PeerRole::Controller,
        }
    }
}

impl std::fmt::Display for PeerRole {
    /// Wire names: controllers are "web", robots are "python".
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerRole::Controller => write!(f, "web"),
            PeerRole::Robot => write!(f, "python"),
        }
    }
}

/// Transport a peer is connected over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerTransport {
    WebRtc,
    WebSocket,
}

impl std::fmt::Display for PeerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerTransport::WebRtc => write!(f, "webrtc"),
            PeerTransport::WebSocket => write!(f, "websocket"),
        }
    }
}

/// Lifecycle state of a peer. Transitions are monotonic:
/// admitting -> live -> closed, each taken at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Admitting,
    Live,
    Closed,
}

/// Generate a short peer id (8 hex characters). Collisions are handled
/// by the registry, which regenerates under its write lock.
pub fn generate_peer_id() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| char::from_digit(rng.gen_range(0..16), 16).unwrap())
        .collect()
}

/// Where outbound frames for a peer go.
///
/// The router depends only on this capability; concrete transports
/// provide it at record construction time.
pub enum SendSink {
    /// WebRTC data channel. The slot is empty until the negotiated
    /// channel arrives; sends fail fast until then.
    DataChannel(Mutex<Option<Arc<RTCDataChannel>>>),
    /// Bounded outbound buffer drained by the peer's socket writer.
    Socket(mpsc::Sender<Vec<u8>>),
}

impl std::fmt::Debug for SendSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SendSink::DataChannel(_) => f.write_str("SendSink::DataChannel"),
            SendSink::Socket(_) => f.write_str("SendSink::Socket"),
        }
    }
}

impl SendSink {
    pub fn data_channel() -> Self {
        SendSink::DataChannel(Mutex::new(None))
    }

    pub fn socket(tx: mpsc::Sender<Vec<u8>>) -> Self {
        SendSink::Socket(tx)
    }

    async fn send(&self, id: &str, data: &[u8]) -> Result<()> {
        match self {
            SendSink::DataChannel(slot) => {
                let dc = slot.lock().unwrap().clone();
                let Some(dc) = dc else {
                    return Err(RelayError::PeerNotReady(id.to_string()));
                };
                if dc.ready_state() != RTCDataChannelState::Open {
                    return Err(RelayError::PeerNotReady(id.to_string()));
                }
                dc.send(&Bytes::copy_from_slice(data))
                    .await
                    .map(|_| ())
                    .map_err(|e| RelayError::Transport(e.to_string()))
            }
            SendSink::Socket(tx) => match tx.try_send(data.to_vec()) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    Err(RelayError::SendBufferFull(id.to_string()))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Err(RelayError::PeerNotReady(id.to_string()))
                }
            },
        }
    }
}

/// A registered peer. Immutable identity (id, role, transport) plus the
/// send sink and lifecycle state.
#[derive(Debug)]
pub struct PeerRecord {
    pub id: String,
    pub role: PeerRole,
    pub transport: PeerTransport,
    state: Mutex<PeerState>,
    sink: SendSink,
    /// WebRTC transport handle, closed when the record is removed.
    connection: Option<Arc<RTCPeerConnection>>,
    closed_tx: watch::Sender<bool>,
}

impl PeerRecord {
    fn new(
        id: String,
        role: PeerRole,
        transport: PeerTransport,
        sink: SendSink,
        connection: Option<Arc<RTCPeerConnection>>,
    ) -> Self {
        let (closed_tx, _) = watch::channel(false);
        Self {
            id,
            role,
            transport,
            state: Mutex::new(PeerState::Admitting),
            sink,
            connection,
            closed_tx,
        }
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().unwrap()
    }

    pub fn is_live(&self) -> bool {
        self.state() == PeerState::Live
    }

    /// admitting -> live. Idempotent; a closed record stays closed.
    pub fn promote(&self) {
        let mut state = self.state.lock().unwrap();
        if *state == PeerState::Admitting {
            *state = PeerState::Live;
        }
    }

    /// Send one frame through this peer's sink. Fails fast when the
    /// transport is not ready; never blocks on a slow peer.
    pub async fn send(&self, data: &[u8]) -> Result<()> {
        if !self.is_live() {
            return Err(RelayError::PeerNotReady(self.id.clone()));
        }
        self.sink.send(&self.id, data).await
    }

    /// The WebRTC transport handle, if this is a datagram-transport peer.
    pub fn connection(&self) -> Option<Arc<RTCPeerConnection>> {
        self.connection.clone()
    }

    /// Attach the negotiated data channel to a WebRTC record's sink.
    pub fn attach_channel(&self, dc: Arc<RTCDataChannel>) {
        if let SendSink::DataChannel(slot) = &self.sink {
            *slot.lock().unwrap() = Some(dc);
        }
    }

    /// Observe closure; resolves once the record transitions to closed.
    pub fn subscribe_close(&self) -> watch::Receiver<bool> {
        self.closed_tx.subscribe()
    }

    /// Transition to closed. First caller wins: wakes any writer
    /// waiting on the close signal and releases the transport handle.
    fn mark_closed(&self) -> bool {
        let first = {
            let mut state = self.state.lock().unwrap();
            if *state == PeerState::Closed {
                false
            } else {
                *state = PeerState::Closed;
                true
            }
        };
        if first {
            let _ = self.closed_tx.send(true);
            if let Some(pc) = &self.connection {
                let pc = pc.clone();
                tokio::spawn(async move {
                    let _ = pc.close().await;
                });
            }
        }
        first
    }
}

struct Inner {
    peers: HashMap<String, Arc<PeerRecord>>,
    by_role: HashMap<PeerRole, HashSet<String>>,
    by_transport: HashMap<PeerTransport, HashSet<String>>,
    closed: bool,
}

/// Thread-safe registry of all connected peers.
///
/// Index mutations take the write lock; lookups and enumerations take
/// the read lock, snapshot owned records, and iterate outside it. The
/// lock is never held across a send.
pub struct PeerRegistry {
    inner: RwLock<Inner>,
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                peers: HashMap::new(),
                by_role: HashMap::new(),
                by_transport: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Allocate a fresh id and insert an admitting record. Fails once
    /// shutdown has begun.
    pub fn create(
        &self,
        role: PeerRole,
        transport: PeerTransport,
        sink: SendSink,
        connection: Option<Arc<RTCPeerConnection>>,
    ) -> Result<Arc<PeerRecord>> {
        let mut inner = self.inner.write().unwrap();
        if inner.closed {
            return Err(RelayError::RegistryClosed);
        }

        let mut id = generate_peer_id();
        while inner.peers.contains_key(&id) {
            id = generate_peer_id();
        }

        let record = Arc::new(PeerRecord::new(
            id.clone(),
            role,
            transport,
            sink,
            connection,
        ));
        inner.peers.insert(id.clone(), record.clone());
        inner.by_role.entry(role).or_default().insert(id.clone());
        inner.by_transport.entry(transport).or_default().insert(id);

        debug!(
            "registered peer {} (role: {}, transport: {})",
            record.id, record.role, record.transport
        );
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<Arc<PeerRecord>> {
        self.inner.read().unwrap().peers.get(id).cloned()
    }

    /// Snapshot of all records with the given role (admitting and live).
    pub fn by_role(&self, role: PeerRole) -> Vec<Arc<PeerRecord>> {
        let inner = self.inner.read().unwrap();
        inner
            .by_role
            .get(&role)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.peers.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove and close a peer. Exactly-once: returns true for the
    /// caller that performed the removal, false if already absent.
    pub fn remove(&self, id: &str) -> bool {
        let record = {
            let mut inner = self.inner.write().unwrap();
            let Some(record) = inner.peers.remove(id) else {
                return false;
            };
            if let Some(set) = inner.by_role.get_mut(&record.role) {
                set.remove(id);
            }
            if let Some(set) = inner.by_transport.get_mut(&record.transport) {
                set.remove(id);
            }
            record
        };
        record.mark_closed();
        debug!("removed peer {}", id);
        true
    }

    pub fn count(&self) -> usize {
        self.inner.read().unwrap().peers.len()
    }

    pub fn count_by_role(&self, role: PeerRole) -> usize {
        self.inner
            .read()
            .unwrap()
            .by_role
            .get(&role)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    pub fn count_by_transport(&self, transport: PeerTransport) -> usize {
        self.inner
            .read()
            .unwrap()
            .by_transport
            .get(&transport)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Count of peers matching both role and transport.
    pub fn count_matching(&self, role: PeerRole, transport: PeerTransport) -> usize {
        let inner = self.inner.read().unwrap();
        inner
            .by_role
            .get(&role)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        inner
                            .peers
                            .get(*id)
                            .map(|r| r.transport == transport)
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    /// Drain every record to closed and reject further admissions.
    pub fn close_all(&self) {
        let drained: Vec<Arc<PeerRecord>> = {
            let mut inner = self.inner.write().unwrap();
            inner.closed = true;
            inner.by_role.clear();
            inner.by_transport.clear();
            inner.peers.drain().map(|(_, record)| record).collect()
        };
        for record in &drained {
            record.mark_closed();
        }
        debug!("registry closed, {} peers drained", drained.len());
    }
}
