//! command.rs
//! Control command record and its fixed 24-byte wire codec.
//!
//! Layout (little endian, no padding, no version field):
//! [sequence: u32][throttle: f32][steer: f32][brake: f32][sent_at_ns: u64]
//!
//! Every socket in the crate goes through `encode`/`decode`; nothing else knows the layout.

use thiserror::Error;

pub const COMMAND_SIZE: usize = 24;

/// Receive buffers are larger than one command so oversized datagrams are
/// seen at their real length instead of being truncated to a valid one.
pub const RECV_BUFFER_SIZE: usize = 64;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    #[error("command datagram must be {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },
}

/// One actuation command as produced by the external command source.
#[derive(Debug, Clone, Copy, Default)]
pub struct Command {
    pub sequence: u32,
    pub throttle: f32,
    pub steer: f32,
    pub brake: f32,
    /// Producer's monotonic clock at send time.
    pub sent_at_ns: u64,
}

// Bitwise field comparison: a NaN actuation value must still equal itself, or
// the forwarder would re-send an unchanged command forever.
impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.sequence == other.sequence
            && self.throttle.to_bits() == other.throttle.to_bits()
            && self.steer.to_bits() == other.steer.to_bits()
            && self.brake.to_bits() == other.brake.to_bits()
            && self.sent_at_ns == other.sent_at_ns
    }
}

impl Eq for Command {}

impl Command {
    pub fn new(sequence: u32, throttle: f32, steer: f32, brake: f32, sent_at_ns: u64) -> Self {
        Self { sequence, throttle, steer, brake, sent_at_ns }
    }

    #[inline]
    pub fn encode(&self) -> [u8; COMMAND_SIZE] {
        let mut out = [0u8; COMMAND_SIZE];
        out[0..4].copy_from_slice(&self.sequence.to_le_bytes());
        out[4..8].copy_from_slice(&self.throttle.to_le_bytes());
        out[8..12].copy_from_slice(&self.steer.to_le_bytes());
        out[12..16].copy_from_slice(&self.brake.to_le_bytes());
        out[16..24].copy_from_slice(&self.sent_at_ns.to_le_bytes());
        out
    }

    /// Decode a whole datagram. Anything but exactly 24 bytes is rejected; no partial parse.
    #[inline]
    pub fn decode(buf: &[u8]) -> Result<Self, CodecError> {
        let raw: &[u8; COMMAND_SIZE] = buf.try_into().map_err(|_| CodecError::Length {
            expected: COMMAND_SIZE,
            actual: buf.len(),
        })?;

        Ok(Self {
            sequence: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            throttle: f32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            steer: f32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]),
            brake: f32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]),
            sent_at_ns: u64::from_le_bytes([
                raw[16], raw[17], raw[18], raw[19], raw[20], raw[21], raw[22], raw[23],
            ]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_little_endian_and_packed() {
        let cmd = Command::new(0x0403_0201, 1.0, -1.0, 0.5, 0x0807_0605_0403_0201);
        let bytes = cmd.encode();

        assert_eq!(&bytes[0..4], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[4..8], &1.0f32.to_le_bytes());
        assert_eq!(&bytes[8..12], &(-1.0f32).to_le_bytes());
        assert_eq!(&bytes[12..16], &0.5f32.to_le_bytes());
        assert_eq!(&bytes[16..24], &[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn decode_matches_encoded_fields() {
        let cmd = Command::new(u32::MAX, 0.6, -0.25, 0.0, 123_456_789);
        let decoded = Command::decode(&cmd.encode()).expect("decode");
        assert_eq!(decoded, cmd);
        assert_eq!(decoded.sequence, u32::MAX);
        assert_eq!(decoded.throttle, 0.6);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let bytes = Command::default().encode();
        assert_eq!(
            Command::decode(&bytes[..23]),
            Err(CodecError::Length { expected: 24, actual: 23 })
        );

        let mut long = bytes.to_vec();
        long.push(0);
        assert_eq!(
            Command::decode(&long),
            Err(CodecError::Length { expected: 24, actual: 25 })
        );
        assert!(Command::decode(&[]).is_err());
    }

    #[test]
    fn equality_is_by_value_and_reflexive_for_nan() {
        let a = Command::new(7, f32::NAN, 0.0, 0.0, 1);
        let b = Command::decode(&a.encode()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, Command::new(7, f32::NAN, 0.0, 0.0, 2));
    }
}
