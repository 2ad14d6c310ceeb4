use std::time::Duration;

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

/// Default STUN server for NAT traversal.
pub const DEFAULT_STUN_SERVER: &str = "stun:stun.l.google.com:19302";

/// Server configuration, loaded from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port
    pub port: u16,
    /// STUN server URL handed to new peer connections. Empty disables
    /// ICE servers entirely (loopback-only deployments and tests).
    pub stun_server: String,
    /// WebSocket keepalive timing
    pub keepalive: KeepaliveConfig,
}

/// Keepalive timing for socket-transport peers.
///
/// A probe goes out every `ping_interval`; a peer that produces no
/// inbound traffic for `ping_interval + pong_timeout` is evicted.
#[derive(Debug, Clone)]
pub struct KeepaliveConfig {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for KeepaliveConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            stun_server: DEFAULT_STUN_SERVER.to_string(),
            keepalive: KeepaliveConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.stun_server, "stun:stun.l.google.com:19302");
        assert_eq!(config.keepalive.ping_interval, Duration::from_secs(30));
        assert_eq!(config.keepalive.pong_timeout, Duration::from_secs(10));
        assert_eq!(config.keepalive.write_timeout, Duration::from_secs(10));
    }
}
