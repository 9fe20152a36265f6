//! Real-time control payloads: MIDI, presets, status.

use serde::{Deserialize, Serialize};

use crate::error::LinkError;
use crate::flags::ConnectionFlags;

/// One 3-byte MIDI message. Bytes go on the wire exactly as given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiMessage(pub [u8; 3]);

impl MidiMessage {
    pub fn new(m0: u8, m1: u8, m2: u8) -> Self {
        Self([m0, m1, m2])
    }

    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }

    pub fn from_payload(payload: &[u8]) -> Result<Self, LinkError> {
        match payload {
            [m0, m1, m2] => Ok(Self::new(*m0, *m1, *m2)),
            _ => Err(LinkError::ProtocolViolation("MIDI payload must be 3 bytes")),
        }
    }
}

/// Selects a stored preset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresetRecall {
    pub index: u16,
}

/// Status snapshot the target sends in reply to `Ping`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DeviceStatus {
    /// Raw connection flags; see [`ConnectionFlags`].
    pub flags: u32,
    pub storage_present: bool,
    pub dsp_load_percent: u8,
}

impl DeviceStatus {
    pub fn connection_flags(&self) -> ConnectionFlags {
        ConnectionFlags::from_bits_retain(self.flags)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn midi_payload_is_exact() {
        let msg = MidiMessage::new(0x90, 0x3C, 0x7F);
        assert_eq!(msg.bytes(), [0x90, 0x3C, 0x7F]);
        assert_eq!(MidiMessage::from_payload(&[0x90, 0x3C, 0x7F]).unwrap(), msg);
        assert!(MidiMessage::from_payload(&[0x90, 0x3C]).is_err());
    }

    #[test]
    fn status_flags_keep_unknown_bits() {
        let status = DeviceStatus {
            flags: 0x0100_0001,
            storage_present: true,
            dsp_load_percent: 12,
        };
        assert!(status.connection_flags().contains(ConnectionFlags::DSP_RUNNING));
        assert_eq!(status.connection_flags().bits(), 0x0100_0001);
    }
}
