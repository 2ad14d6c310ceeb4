//! Cross-role frame routing.
//!
//! One router instance serves both transports: every inbound frame,
//! whether it arrived over a data channel or a WebSocket, goes through
//! `Router::route` with its registry record as origin.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::registry::{PeerRecord, PeerRegistry};
use crate::twist::{now_millis, TwistMessage};

/// Message routing counters. Monotonic, updated with relaxed atomics.
#[derive(Default)]
pub struct RouterStats {
    received: AtomicU64,
    forwarded: AtomicU64,
    decode_errors: AtomicU64,
}

/// Point-in-time view of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub received: u64,
    pub forwarded: u64,
    pub decode_errors: u64,
}

impl RouterStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
        }
    }
}

/// Fans frames out to every live peer of the opposite role.
pub struct Router {
    registry: Arc<PeerRegistry>,
    stats: RouterStats,
}

impl Router {
    pub fn new(registry: Arc<PeerRegistry>) -> Self {
        Self {
            registry,
            stats: RouterStats::default(),
        }
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Route one inbound frame. The frame is forwarded opaquely; the
    /// decode is observational only, so malformed frames are counted
    /// and still delivered. Targets are snapshotted once; a target that
    /// closes between snapshot and send is a per-send failure, never a
    /// reason to stall the rest of the fan-out.
    pub async fn route(&self, origin: &PeerRecord, data: &[u8]) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        match TwistMessage::decode(data) {
            Ok(twist) => {
                if !twist.is_zero() {
                    debug!(
                        "twist from {} (role: {}): lin.y={:.2}, ang.z={:.2}, latency={}ms",
                        origin.id,
                        origin.role,
                        twist.linear.y,
                        twist.angular.z,
                        twist.latency_ms(now_millis()),
                    );
                }
            }
            Err(_) => {
                self.stats.decode_errors.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "non-twist message from {} ({} bytes)",
                    origin.id,
                    data.len()
                );
            }
        }

        let targets = self.registry.by_role(origin.role.opposite());

        let mut sent = 0u64;
        for target in &targets {
            if target.id == origin.id || !target.is_live() {
                continue;
            }
            match target.send(data).await {
                Ok(()) => sent += 1,
                Err(RelayError::SendBufferFull(id)) => {
                    warn!("send buffer full for {}", id);
                }
                Err(e) => {
                    debug!("send to {} failed: {}", target.id, e);
                }
            }
        }

        if sent > 0 {
            self.stats.forwarded.fetch_add(sent, Ordering::Relaxed);
            debug!("forwarded to {} {} peer(s)", sent, origin.role.opposite());
        }
    }
}
