use crate::error::LinkError;

/// Magic sequence at the start of every frame.
pub const MAGIC: [u8; 4] = *b"DSPL";

/// Encoded header size: magic, opcode, checksum, payload length.
pub const HEADER_LENGTH: usize = 14;

pub type FrameHeaderBytes = [u8; HEADER_LENGTH];

/// Fixed-size header preceding each frame payload (little-endian).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    opcode: u16,
    checksum: u32,
    payload_length: u32,
}

impl FrameHeader {
    pub fn new(opcode: u16, checksum: u32, payload_length: u32) -> Self {
        Self {
            opcode,
            checksum,
            payload_length,
        }
    }

    pub fn to_bytes(&self) -> FrameHeaderBytes {
        let mut bytes: FrameHeaderBytes = [0; HEADER_LENGTH];
        bytes[0..4].copy_from_slice(&MAGIC);
        bytes[4..6].copy_from_slice(&self.opcode.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.checksum.to_le_bytes());
        bytes[10..14].copy_from_slice(&self.payload_length.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &FrameHeaderBytes) -> Result<Self, LinkError> {
        if bytes[0..4] != MAGIC {
            return Err(LinkError::InvalidMagic);
        }
        Ok(Self {
            opcode: u16::from_le_bytes([bytes[4], bytes[5]]),
            checksum: u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]),
            payload_length: u32::from_le_bytes([bytes[10], bytes[11], bytes[12], bytes[13]]),
        })
    }

    pub fn opcode(&self) -> u16 {
        self.opcode
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn payload_length(&self) -> u32 {
        self.payload_length
    }
}
