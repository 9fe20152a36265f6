use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::LinkError;
use crate::header::{FrameHeader, HEADER_LENGTH};
use crate::message::Opcode;

/// Largest payload a single frame may carry.
pub const MAX_PAYLOAD_SIZE: usize = 64 * 1024;

/// Largest encoded frame.
pub const MAX_FRAME_SIZE: usize = HEADER_LENGTH + MAX_PAYLOAD_SIZE;

/// One protocol frame: header plus payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
}

impl Frame {
    /// Build a frame around a raw payload.
    pub fn new(opcode: Opcode, payload: impl Into<Bytes>) -> Result<Self, LinkError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(LinkError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        let header = FrameHeader::new(opcode as u16, checksum(&payload), payload.len() as u32);
        Ok(Self { header, payload })
    }

    /// A frame with no payload.
    pub fn empty(opcode: Opcode) -> Self {
        Self {
            header: FrameHeader::new(opcode as u16, 0, 0),
            payload: Bytes::new(),
        }
    }

    /// Build a frame whose payload is `body` in bincode.
    pub fn encode<T: Serialize>(opcode: Opcode, body: &T) -> Result<Self, LinkError> {
        let payload = bincode::serialize(body)?;
        Self::new(opcode, payload)
    }

    /// Decode the bincode payload.
    pub fn decode_body<T: DeserializeOwned>(&self) -> Result<T, LinkError> {
        Ok(bincode::deserialize(&self.payload)?)
    }

    pub(crate) fn from_parts(header: FrameHeader, payload: Bytes) -> Self {
        Self { header, payload }
    }

    pub fn header(&self) -> &FrameHeader {
        &self.header
    }

    pub fn opcode(&self) -> Result<Opcode, LinkError> {
        Opcode::try_from(self.header.opcode())
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn payload_bytes(&self) -> Bytes {
        self.payload.clone()
    }

    /// Checks the header checksum against the payload.
    pub fn validate(&self) -> bool {
        self.header.checksum() == checksum(&self.payload)
            && self.header.payload_length() as usize == self.payload.len()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LENGTH + self.payload.len());
        bytes.extend_from_slice(&self.header.to_bytes());
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

/// First four bytes of the payload's blake3 hash; zero for an empty payload.
pub(crate) fn checksum(payload: &[u8]) -> u32 {
    if payload.is_empty() {
        return 0;
    }
    let hash = blake3::hash(payload);
    let b = hash.as_bytes();
    u32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_checksum_validates() {
        let frame = Frame::new(Opcode::AppendFile, vec![1u8, 2, 3]).unwrap();
        assert!(frame.validate());
        assert_ne!(frame.header().checksum(), 0);
        assert_eq!(frame.to_bytes().len(), HEADER_LENGTH + 3);
    }

    #[test]
    fn tampered_payload_fails_validation() {
        let frame = Frame::new(Opcode::AppendFile, vec![1u8, 2, 3]).unwrap();
        let tampered = Frame::from_parts(*frame.header(), Bytes::from_static(&[1, 2, 4]));
        assert!(!tampered.validate());
    }

    #[test]
    fn empty_frame_has_zero_checksum() {
        let frame = Frame::empty(Opcode::Ping);
        assert_eq!(frame.header().checksum(), 0);
        assert!(frame.validate());
        assert_eq!(frame.opcode().unwrap(), Opcode::Ping);
    }

    #[test]
    fn oversized_payload_rejected() {
        let err = Frame::new(Opcode::AppendFile, vec![0u8; MAX_PAYLOAD_SIZE + 1]).unwrap_err();
        assert!(matches!(err, LinkError::PayloadTooLarge { .. }));
    }
}
