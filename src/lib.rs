pub mod config;
pub mod error;
pub mod registry;
pub mod router;
pub mod server;
pub mod twist;
pub mod webrtc;
pub mod ws;

pub use config::{Config, KeepaliveConfig};
pub use error::RelayError;
pub use registry::{PeerRecord, PeerRegistry, PeerRole, PeerState, PeerTransport, SendSink};
pub use router::{Router, StatsSnapshot};
pub use server::AppState;
pub use twist::{TwistMessage, Vector3};
