//! # trafsim-packet
//!
//! Frame encoding and decoding for the TrafSim sensor network.
//!
//! This crate provides the on-air frame types and codec, plus the persistent
//! sensor-log CSV format shared by the sensor nodes (producer side) and the
//! traffic control plane (consumer side).
//!
//! ## Frame Structure
//!
//! Frames are fixed-width little-endian records, optionally zero-padded up to
//! the node's configured packet size (padding carries no information; it only
//! models the transmitted payload length):
//!
//! - Status frame: kind (1 byte) + source node id (4 bytes)
//! - Report frame: kind (1 byte) + source node id (4 bytes)
//!   + timestamp in microseconds (8 bytes) + vehicle count (4 bytes)
//!   + emergency flag (1 byte, `0x00` or `0x01`)
//!
//! ## Example
//!
//! ```rust
//! use trafsim_packet::{Frame, Measurement};
//!
//! let frame = Frame::Report(Measurement {
//!     source: 4,
//!     timestamp_us: 1_500_000,
//!     vehicle_count: 7,
//!     emergency: false,
//! });
//! let encoded = frame.encode(512);
//! let decoded = Frame::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod sensorlog;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while decoding a frame.
#[derive(Debug, Error)]
pub enum PacketError {
    /// Frame shorter than its fixed-width encoding.
    #[error("frame truncated: {len} bytes, need at least {need}")]
    Truncated {
        /// Bytes available.
        len: usize,
        /// Bytes required for this frame kind.
        need: usize,
    },

    /// Unrecognized frame kind byte.
    #[error("unknown frame kind: 0x{0:02x}")]
    UnknownKind(u8),

    /// Emergency flag byte was neither 0 nor 1.
    #[error("invalid emergency flag byte: 0x{0:02x}")]
    InvalidEmergencyFlag(u8),
}

// ============================================================================
// Constants
// ============================================================================

/// Fixed-width length of an encoded status frame.
pub const STATUS_WIRE_LEN: usize = 5;

/// Fixed-width length of an encoded report frame.
pub const REPORT_WIRE_LEN: usize = 18;

const KIND_STATUS: u8 = 0x00;
const KIND_REPORT: u8 = 0x01;

// ============================================================================
// Measurement
// ============================================================================

/// A single traffic measurement produced by a leaf sensor.
///
/// Immutable once created; consumed by relays, the collector, and the
/// persistent sensor log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measurement {
    /// Id of the node that produced the measurement.
    pub source: u32,
    /// Simulation time of the sample, in microseconds.
    pub timestamp_us: u64,
    /// Number of vehicles detected in this cycle.
    pub vehicle_count: u32,
    /// Emergency pre-emption flag.
    pub emergency: bool,
}

impl Measurement {
    /// Sample time in seconds.
    pub fn timestamp_secs(&self) -> f64 {
        self.timestamp_us as f64 / 1_000_000.0
    }
}

// ============================================================================
// Frame
// ============================================================================

/// On-air frame exchanged between sensor nodes.
///
/// Leaves transmit `Report` frames carrying a measurement; relays transmit
/// payload-less `Status` frames on their own uplink cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    /// Uplink keep-alive from a relay node.
    Status {
        /// Id of the transmitting node.
        source: u32,
    },
    /// A leaf sensor measurement.
    Report(Measurement),
}

impl Frame {
    /// Id of the node that originated this frame.
    pub fn source(&self) -> u32 {
        match self {
            Frame::Status { source } => *source,
            Frame::Report(m) => m.source,
        }
    }

    /// Lowercase label for logging.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Frame::Status { .. } => "status",
            Frame::Report(_) => "report",
        }
    }

    /// Fixed-width length of this frame's encoding, before padding.
    pub fn wire_len(&self) -> usize {
        match self {
            Frame::Status { .. } => STATUS_WIRE_LEN,
            Frame::Report(_) => REPORT_WIRE_LEN,
        }
    }

    /// Encode the frame, zero-padding the buffer up to `pad_to` bytes.
    ///
    /// Padding bytes model the configured packet size on the air; they carry
    /// no information and are ignored by [`Frame::decode`].
    pub fn encode(&self, pad_to: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(pad_to.max(self.wire_len()));
        match self {
            Frame::Status { source } => {
                buf.push(KIND_STATUS);
                buf.extend_from_slice(&source.to_le_bytes());
            }
            Frame::Report(m) => {
                buf.push(KIND_REPORT);
                buf.extend_from_slice(&m.source.to_le_bytes());
                buf.extend_from_slice(&m.timestamp_us.to_le_bytes());
                buf.extend_from_slice(&m.vehicle_count.to_le_bytes());
                buf.push(m.emergency as u8);
            }
        }
        if buf.len() < pad_to {
            buf.resize(pad_to, 0);
        }
        buf
    }

    /// Decode a frame from bytes. Trailing padding is ignored.
    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let kind = *data.first().ok_or(PacketError::Truncated { len: 0, need: 1 })?;
        match kind {
            KIND_STATUS => {
                if data.len() < STATUS_WIRE_LEN {
                    return Err(PacketError::Truncated {
                        len: data.len(),
                        need: STATUS_WIRE_LEN,
                    });
                }
                let source = u32::from_le_bytes(data[1..5].try_into().unwrap());
                Ok(Frame::Status { source })
            }
            KIND_REPORT => {
                if data.len() < REPORT_WIRE_LEN {
                    return Err(PacketError::Truncated {
                        len: data.len(),
                        need: REPORT_WIRE_LEN,
                    });
                }
                let source = u32::from_le_bytes(data[1..5].try_into().unwrap());
                let timestamp_us = u64::from_le_bytes(data[5..13].try_into().unwrap());
                let vehicle_count = u32::from_le_bytes(data[13..17].try_into().unwrap());
                let emergency = match data[17] {
                    0 => false,
                    1 => true,
                    other => return Err(PacketError::InvalidEmergencyFlag(other)),
                };
                Ok(Frame::Report(Measurement {
                    source,
                    timestamp_us,
                    vehicle_count,
                    emergency,
                }))
            }
            other => Err(PacketError::UnknownKind(other)),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_frame_fixed_width() {
        let frame = Frame::Report(Measurement {
            source: 4,
            timestamp_us: 6_596_000,
            vehicle_count: 9,
            emergency: true,
        });
        let encoded = frame.encode(0);
        assert_eq!(encoded.len(), REPORT_WIRE_LEN);
        // The emergency flag is exactly one byte at the end of the record.
        assert_eq!(encoded[REPORT_WIRE_LEN - 1], 1);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_report_frame_padding_ignored() {
        let frame = Frame::Report(Measurement {
            source: 7,
            timestamp_us: 1_000_000,
            vehicle_count: 3,
            emergency: false,
        });
        let encoded = frame.encode(512);
        assert_eq!(encoded.len(), 512);
        assert!(encoded[REPORT_WIRE_LEN..].iter().all(|&b| b == 0));
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn test_status_frame() {
        let frame = Frame::Status { source: 2 };
        let encoded = frame.encode(1024);
        assert_eq!(encoded.len(), 1024);
        assert_eq!(Frame::decode(&encoded).unwrap(), frame);
        assert_eq!(frame.kind_label(), "status");
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = Frame::Report(Measurement {
            source: 1,
            timestamp_us: 0,
            vehicle_count: 0,
            emergency: false,
        });
        let encoded = frame.encode(0);
        let err = Frame::decode(&encoded[..REPORT_WIRE_LEN - 1]).unwrap_err();
        assert!(matches!(err, PacketError::Truncated { .. }));
        assert!(matches!(
            Frame::decode(&[]).unwrap_err(),
            PacketError::Truncated { .. }
        ));
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let err = Frame::decode(&[0xff, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, PacketError::UnknownKind(0xff)));
    }

    #[test]
    fn test_invalid_emergency_byte_rejected() {
        let frame = Frame::Report(Measurement {
            source: 1,
            timestamp_us: 0,
            vehicle_count: 0,
            emergency: false,
        });
        let mut encoded = frame.encode(0);
        encoded[REPORT_WIRE_LEN - 1] = 7;
        let err = Frame::decode(&encoded).unwrap_err();
        assert!(matches!(err, PacketError::InvalidEmergencyFlag(7)));
    }
}
