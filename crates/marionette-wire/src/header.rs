//! Fixed header for the snapshot wire format
//!
//! Fixed header is 10 bytes:
//! - Byte 0: Version
//! - Byte 1: Detail level
//! - Bytes 2-9: Source timestamp, seconds (f64, LE)

use bytes::BufMut;
use marionette_core::{DetailLevel, MalformedReason, MarionetteResult, MotionTime};

/// Fixed header size in bytes
pub const WIRE_HEADER_SIZE: usize = 10;

/// Current wire protocol version
pub const WIRE_VERSION: u8 = 1;

/// Largest accepted source timestamp, seconds
pub const MAX_TIMESTAMP_SECS: f64 = 1e12;

/// Fixed header structure
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WireHeader {
    /// Wire protocol version
    pub version: u8,
    /// Subset of the skeleton that follows
    pub detail_level: DetailLevel,
    /// Capture time on the authoring peer
    pub timestamp: MotionTime,
}

impl WireHeader {
    pub fn new(detail_level: DetailLevel, timestamp: MotionTime) -> Self {
        WireHeader {
            version: WIRE_VERSION,
            detail_level,
            timestamp,
        }
    }

    /// Parse header from bytes
    pub fn parse(buf: &[u8]) -> MarionetteResult<Self> {
        if buf.len() < WIRE_HEADER_SIZE {
            return Err(MalformedReason::Truncated {
                expected: WIRE_HEADER_SIZE,
                actual: buf.len(),
            }
            .into());
        }

        // Byte 0: Version
        let version = buf[0];
        if version != WIRE_VERSION {
            return Err(MalformedReason::UnknownVersion(version).into());
        }

        // Byte 1: Detail level
        let detail_level =
            DetailLevel::from_byte(buf[1]).ok_or(MalformedReason::UnknownDetailLevel(buf[1]))?;

        // Bytes 2-9: Timestamp
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&buf[2..WIRE_HEADER_SIZE]);
        let secs = f64::from_le_bytes(raw);
        if !secs.is_finite() {
            return Err(MalformedReason::NonFinite("timestamp").into());
        }
        if !(0.0..=MAX_TIMESTAMP_SECS).contains(&secs) {
            return Err(MalformedReason::TimestampOutOfRange.into());
        }

        Ok(WireHeader {
            version,
            detail_level,
            timestamp: MotionTime::from_secs_f64(secs),
        })
    }

    /// Serialize header into a buffer
    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.detail_level.to_byte());
        buf.put_f64_le(self.timestamp.as_secs_f64());
    }

    /// Serialize header to a new Vec
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WIRE_HEADER_SIZE);
        self.serialize(&mut buf);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marionette_core::MarionetteError;

    #[test]
    fn test_header_roundtrip() {
        let header = WireHeader::new(DetailLevel::FullBoneFace, MotionTime::from_micros(1_234_567));

        let bytes = header.to_bytes();
        assert_eq!(bytes.len(), WIRE_HEADER_SIZE);

        let parsed = WireHeader::parse(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_header_too_short() {
        let result = WireHeader::parse(&[WIRE_VERSION, 0, 0]);
        assert!(matches!(
            result,
            Err(MarionetteError::MalformedPacket(MalformedReason::Truncated { .. }))
        ));
    }

    #[test]
    fn test_unknown_version_rejected() {
        let mut bytes = WireHeader::new(DetailLevel::FullBone, MotionTime::ZERO).to_bytes();
        bytes[0] = WIRE_VERSION + 1;

        assert!(matches!(
            WireHeader::parse(&bytes),
            Err(MarionetteError::MalformedPacket(MalformedReason::UnknownVersion(_)))
        ));
    }

    #[test]
    fn test_unknown_detail_level_rejected() {
        let mut bytes = WireHeader::new(DetailLevel::FullBone, MotionTime::ZERO).to_bytes();
        bytes[1] = 0x33;

        assert!(matches!(
            WireHeader::parse(&bytes),
            Err(MarionetteError::MalformedPacket(MalformedReason::UnknownDetailLevel(0x33)))
        ));
    }

    #[test]
    fn test_nan_timestamp_rejected() {
        let mut bytes = vec![WIRE_VERSION, 0];
        bytes.extend_from_slice(&f64::NAN.to_le_bytes());

        assert!(WireHeader::parse(&bytes).is_err());
    }

    #[test]
    fn test_out_of_range_timestamp_rejected() {
        for secs in [-1e300, -0.5, MAX_TIMESTAMP_SECS * 2.0, 1e300] {
            let mut bytes = vec![WIRE_VERSION, 0];
            bytes.extend_from_slice(&f64::to_le_bytes(secs));

            assert_eq!(
                WireHeader::parse(&bytes),
                Err(MarionetteError::MalformedPacket(
                    MalformedReason::TimestampOutOfRange
                )),
                "{}",
                secs
            );
        }
    }
}
