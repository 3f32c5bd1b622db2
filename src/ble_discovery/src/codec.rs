use std::cmp::min;
use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;
use crate::document::Document;
use crate::errors::{DecodeError, EncodeError};
use crate::uuid_encoder::to_uuid;
use crate::DATA_CHARACTERISTIC_PREFIX;

const MORE_FOLLOWS: u8 = 0x01;
const LAST_FRAME: u8 = 0x00;

/// One chunk of a serialized document. On the wire the flag is a single leading header byte,
/// so the payload itself is never scanned for a terminator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramedPacket {
    pub more: bool,
    pub payload: Bytes
}

impl FramedPacket {
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(self.payload.len() + 1);
        buffer.put_u8(if self.more { MORE_FOLLOWS } else { LAST_FRAME });
        buffer.put_slice(&self.payload);

        return buffer.freeze();
    }

    pub fn from_bytes(frame: &[u8]) -> Result<Self, DecodeError> {
        let Some((&header, payload)) = frame.split_first() else {
            return Err(DecodeError::EmptyFrame);
        };

        let more = match header {
            MORE_FOLLOWS => true,
            LAST_FRAME => false,
            header => return Err(DecodeError::InvalidFrameHeader { header })
        };

        return Ok(Self {
            more,
            payload: Bytes::copy_from_slice(payload)
        });
    }
}

/// Characteristic UUID under which packet `index` is published.
pub fn packet_uuid(index: usize) -> Uuid {
    return to_uuid(format!("{DATA_CHARACTERISTIC_PREFIX}{index}"));
}

pub fn encode(document: &Document, packet_size: usize) -> Result<Vec<FramedPacket>, EncodeError> {
    if packet_size == 0 {
        return Err(EncodeError::InvalidPacketSize { packet_size });
    }

    let text = serde_json::to_vec(document)
        .map_err(|error| EncodeError::Serialization { error: error.to_string() })?;
    let text = Bytes::from(text);

    let count = text.len().div_ceil(packet_size).max(1);

    let packets = (0..count)
        .map(|index| {
            let start = index * packet_size;
            let end = min(start + packet_size, text.len());

            FramedPacket {
                more: index + 1 < count,
                payload: text.slice(start..end)
            }
        })
        .collect();

    return Ok(packets);
}

pub fn decode<I, F>(frames: I) -> Result<Document, DecodeError> where I: IntoIterator<Item = F>, F: AsRef<[u8]> {
    let mut reassembler = Reassembler::new();

    for frame in frames {
        if reassembler.push(frame.as_ref())? {
            break;
        }
    }

    return reassembler.finish();
}

/// Incremental decoder for a reader that fetches one packet at a time.
#[derive(Debug, Default)]
pub struct Reassembler {
    buffer: BytesMut,
    frames: usize,
    complete: bool
}

impl Reassembler {
    pub fn new() -> Self {
        return Self::default();
    }

    /// Returns `true` once the final frame has been pushed.
    pub fn push(&mut self, frame: &[u8]) -> Result<bool, DecodeError> {
        if self.complete {
            return Err(DecodeError::FrameAfterEnd);
        }

        let packet = FramedPacket::from_bytes(frame)?;
        self.buffer.put_slice(&packet.payload);
        self.frames += 1;
        self.complete = !packet.more;

        return Ok(self.complete);
    }

    pub fn frames(&self) -> usize {
        return self.frames;
    }

    pub fn is_complete(&self) -> bool {
        return self.complete;
    }

    pub fn finish(self) -> Result<Document, DecodeError> {
        if !self.complete {
            return Err(DecodeError::Incomplete { frames: self.frames });
        }

        return serde_json::from_slice::<Document>(&self.buffer).map_err(|error| DecodeError::InvalidDocument {
            raw: String::from_utf8_lossy(&self.buffer).into_owned(),
            error: error.to_string()
        });
    }
}
