//! Frame codec for the serial byte stream.
//!
//! A serial line can deliver boot chatter, partial frames and flipped
//! bits without the link itself failing, so the decoder resynchronises
//! on the next magic and drops corrupt frames instead of erroring out.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::header::{FrameHeader, FrameHeaderBytes, HEADER_LENGTH, MAGIC};
use crate::packet::{Frame, MAX_PAYLOAD_SIZE};

#[derive(Debug, Default)]
pub struct LinkCodec {
    dropped: u64,
}

impl LinkCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames discarded so far (bad checksum or impossible length).
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

fn find_magic(src: &[u8]) -> Option<usize> {
    src.windows(MAGIC.len()).position(|w| w == MAGIC)
}

impl Decoder for LinkCodec {
    type Item = Frame;
    type Error = LinkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match find_magic(src) {
                Some(0) => {}
                Some(skip) => {
                    debug!(skip, "discarding bytes before frame magic");
                    src.advance(skip);
                }
                None => {
                    // Keep a tail that could still grow into a magic.
                    let keep = src.len().min(MAGIC.len() - 1);
                    let skip = src.len() - keep;
                    if skip > 0 {
                        debug!(skip, "discarding bytes without frame magic");
                        src.advance(skip);
                    }
                    return Ok(None);
                }
            }

            if src.len() < HEADER_LENGTH {
                return Ok(None);
            }

            let mut header_bytes: FrameHeaderBytes = [0; HEADER_LENGTH];
            header_bytes.copy_from_slice(&src[..HEADER_LENGTH]);
            let header = FrameHeader::from_bytes(&header_bytes)?;
            let payload_length = header.payload_length() as usize;

            if payload_length > MAX_PAYLOAD_SIZE {
                warn!(
                    payload_length,
                    "frame header announces an oversized payload; resyncing"
                );
                self.dropped += 1;
                src.advance(MAGIC.len());
                continue;
            }

            if src.len() < HEADER_LENGTH + payload_length {
                src.reserve(HEADER_LENGTH + payload_length - src.len());
                return Ok(None);
            }

            src.advance(HEADER_LENGTH);
            let payload = src.split_to(payload_length).freeze();
            let frame = Frame::from_parts(header, payload);

            if !frame.validate() {
                warn!(opcode = header.opcode(), "dropping frame with bad checksum");
                self.dropped += 1;
                continue;
            }

            return Ok(Some(frame));
        }
    }
}

impl Encoder<Frame> for LinkCodec {
    type Error = LinkError;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.reserve(HEADER_LENGTH + item.payload().len());
        dst.extend_from_slice(&item.header().to_bytes());
        dst.extend_from_slice(item.payload());
        Ok(())
    }
}
