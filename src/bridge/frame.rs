//! Guest wire frame.
//!
//! ```text
//! offset 0   protocol_tag  u8
//! offset 1   length        u16 big-endian, payload bytes that follow
//! offset 3   timestamp     u64 big-endian, nanoseconds
//! offset 11  payload       exactly `length` bytes
//! ```

use crate::error::FrameError;
use crate::SPSC::{Message, ProtocolTag};

pub const FRAME_HEADER_LEN: usize = 11;
/// The largest payload the u16 length field can describe.
pub const MAX_FRAME_PAYLOAD: usize = u16::MAX as usize;

/// Validate and decode one frame. Every check runs before any allocation of
/// the payload; a frame either decodes completely or not at all.
pub fn decode_frame(raw: &[u8], max_payload: usize) -> Result<Message, FrameError> {
    if raw.len() < FRAME_HEADER_LEN {
        return Err(FrameError::Truncated {
            len: raw.len(),
            needed: FRAME_HEADER_LEN,
        });
    }

    let tag = ProtocolTag::try_from(raw[0]).map_err(FrameError::UnknownProtocol)?;

    let declared = u16::from_be_bytes([raw[1], raw[2]]) as usize;
    if declared > max_payload {
        return Err(FrameError::Oversize {
            declared,
            max: max_payload,
        });
    }

    let actual = raw.len() - FRAME_HEADER_LEN;
    if declared != actual {
        return Err(FrameError::LengthMismatch { declared, actual });
    }

    let mut timestamp = [0u8; 8];
    timestamp.copy_from_slice(&raw[3..FRAME_HEADER_LEN]);

    Ok(Message::with_timestamp(
        tag,
        u64::from_be_bytes(timestamp),
        &raw[FRAME_HEADER_LEN..],
    ))
}

/// Serialize a message into a frame.
pub fn encode_frame(message: &Message) -> Result<Vec<u8>, FrameError> {
    if message.len() > MAX_FRAME_PAYLOAD {
        return Err(FrameError::Oversize {
            declared: message.len(),
            max: MAX_FRAME_PAYLOAD,
        });
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + message.len());
    frame.push(message.protocol_tag().as_u8());
    frame.extend_from_slice(&(message.len() as u16).to_be_bytes());
    frame.extend_from_slice(&message.timestamp().to_be_bytes());
    frame.extend_from_slice(message.payload());
    Ok(frame)
}
