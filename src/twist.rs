//! Binary encoding/decoding for velocity (Twist) messages.
//!
//! Binary format (56 bytes, little-endian):
//! - Bytes 0-7:   linear.x  (f64)
//! - Bytes 8-15:  linear.y  (f64)
//! - Bytes 16-23: linear.z  (f64)
//! - Bytes 24-31: angular.x (f64)
//! - Bytes 32-39: angular.y (f64)
//! - Bytes 40-47: angular.z (f64)
//! - Bytes 48-55: timestamp (u64, milliseconds since epoch)
//!
//! A legacy 48-byte form without the timestamp is accepted on decode.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{RelayError, Result};

/// Size of a twist message with timestamp.
pub const TWIST_MESSAGE_SIZE: usize = 56;

/// Legacy size without timestamp.
pub const TWIST_MESSAGE_SIZE_LEGACY: usize = 48;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A 3D vector, used for both linear and angular velocity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// A velocity command: linear and angular velocity plus an optional
/// millisecond timestamp for latency measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TwistMessage {
    pub linear: Vector3,
    pub angular: Vector3,
    pub timestamp: u64,
}

impl TwistMessage {
    /// Zero velocities stamped with the current time (a stop command).
    pub fn new() -> Self {
        Self {
            timestamp: now_millis(),
            ..Default::default()
        }
    }

    /// Encode to the 56-byte wire form. A zero timestamp is replaced
    /// with the current wall-clock time; any other value is preserved
    /// bit-for-bit.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; TWIST_MESSAGE_SIZE];

        buf[0..8].copy_from_slice(&self.linear.x.to_bits().to_le_bytes());
        buf[8..16].copy_from_slice(&self.linear.y.to_bits().to_le_bytes());
        buf[16..24].copy_from_slice(&self.linear.z.to_bits().to_le_bytes());
        buf[24..32].copy_from_slice(&self.angular.x.to_bits().to_le_bytes());
        buf[32..40].copy_from_slice(&self.angular.y.to_bits().to_le_bytes());
        buf[40..48].copy_from_slice(&self.angular.z.to_bits().to_le_bytes());

        let ts = if self.timestamp == 0 {
            now_millis()
        } else {
            self.timestamp
        };
        buf[48..56].copy_from_slice(&ts.to_le_bytes());

        buf
    }

    /// Decode from either the 56-byte or legacy 48-byte wire form.
    /// The legacy form decodes with timestamp = 0.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() != TWIST_MESSAGE_SIZE && data.len() != TWIST_MESSAGE_SIZE_LEGACY {
            return Err(RelayError::FrameInvalidSize(data.len()));
        }

        let f = |range: std::ops::Range<usize>| {
            f64::from_bits(u64::from_le_bytes(data[range].try_into().unwrap()))
        };

        let mut twist = TwistMessage {
            linear: Vector3 {
                x: f(0..8),
                y: f(8..16),
                z: f(16..24),
            },
            angular: Vector3 {
                x: f(24..32),
                y: f(32..40),
                z: f(40..48),
            },
            timestamp: 0,
        };

        if data.len() == TWIST_MESSAGE_SIZE {
            twist.timestamp = u64::from_le_bytes(data[48..56].try_into().unwrap());
        }

        Ok(twist)
    }

    /// True if all six velocity components carry the +0.0 bit pattern.
    pub fn is_zero(&self) -> bool {
        self.linear.x.to_bits() == 0
            && self.linear.y.to_bits() == 0
            && self.linear.z.to_bits() == 0
            && self.angular.x.to_bits() == 0
            && self.angular.y.to_bits() == 0
            && self.angular.z.to_bits() == 0
    }

    /// Latency from the message timestamp to `now_ms`, in milliseconds.
    /// Returns 0 for untimestamped messages; may be negative if clocks
    /// disagree.
    pub fn latency_ms(&self, now_ms: u64) -> i64 {
        if self.timestamp == 0 {
            return 0;
        }
        now_ms as i64 - self.timestamp as i64
    }
}

impl std::fmt::Display for TwistMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Twist{{linear: [{:.3}, {:.3}, {:.3}], angular: [{:.3}, {:.3}, {:.3}], latency: {}ms}}",
            self.linear.x,
            self.linear.y,
            self.linear.z,
            self.angular.x,
            self.angular.y,
            self.angular.z,
            self.latency_ms(now_millis()),
        )
    }
}
