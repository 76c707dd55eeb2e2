//! Framing: type byte + length (4 bytes BE, counts itself) + payload.

use crate::protocol::MessageType;

const TYPE_SIZE: usize = 1;
const LEN_SIZE: usize = 4;
/// Smallest possible frame: type byte and length word with an empty payload.
pub const MIN_FRAME_LEN: usize = TYPE_SIZE + LEN_SIZE;

/// A decoded message borrowing its payload from the buffer it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message<'a> {
    pub ty: MessageType,
    /// Declared length: payload size + 4.
    pub length: u32,
    pub payload: &'a [u8],
}

impl<'a> Message<'a> {
    /// Bytes this message occupies on the wire.
    pub fn encoded_len(&self) -> usize {
        TYPE_SIZE + self.length as usize
    }

    pub fn into_owned(self) -> OwnedMessage {
        OwnedMessage {
            ty: self.ty,
            payload: self.payload.to_vec(),
        }
    }
}

/// A message detached from the shared buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMessage {
    pub ty: MessageType,
    pub payload: Vec<u8>,
}

impl OwnedMessage {
    pub fn encode(&self) -> Result<Vec<u8>, EncodeError> {
        encode(self.ty, &self.payload)
    }
}

/// Error decoding a frame or a control word read from shared memory.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedMessage {
    #[error("need at least 5 bytes, have {0}")]
    Truncated(usize),
    #[error("declared length {0} is smaller than the length field itself")]
    LengthUnderflow(u32),
    #[error("declared payload of {declared} bytes exceeds the {available} available")]
    Overrun { declared: usize, available: usize },
    #[error("unknown message type {0:#04x}")]
    UnknownType(u8),
    #[error("unknown operation state {0}")]
    UnknownOperation(u32),
    #[error("unknown buffer status {0}")]
    UnknownStatus(u32),
}

/// Error encoding a message (destination too small or length field overflow).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    #[error("need {needed} bytes, destination has {available}")]
    NoRoom { needed: usize, available: usize },
    #[error("payload of {0} bytes does not fit the u32 length field")]
    TooLarge(usize),
}

/// Frame size for a payload of `len` bytes. The length word counts itself.
fn frame_len(len: usize) -> Result<usize, EncodeError> {
    if len > u32::MAX as usize - LEN_SIZE {
        return Err(EncodeError::TooLarge(len));
    }
    Ok(MIN_FRAME_LEN + len)
}

/// Encode a message into a fresh frame.
pub fn encode(ty: MessageType, payload: &[u8]) -> Result<Vec<u8>, EncodeError> {
    let mut out = vec![0u8; frame_len(payload.len())?];
    encode_into(&mut out, ty, payload)?;
    Ok(out)
}

/// Encode a message at the front of `dst`. Returns the number of bytes written.
/// Nothing is written when `dst` is too short.
pub fn encode_into(dst: &mut [u8], ty: MessageType, payload: &[u8]) -> Result<usize, EncodeError> {
    let needed = frame_len(payload.len())?;
    if dst.len() < needed {
        return Err(EncodeError::NoRoom {
            needed,
            available: dst.len(),
        });
    }
    let len = (payload.len() + LEN_SIZE) as u32;
    dst[0] = ty.as_byte();
    dst[TYPE_SIZE..MIN_FRAME_LEN].copy_from_slice(&len.to_be_bytes());
    dst[MIN_FRAME_LEN..needed].copy_from_slice(payload);
    Ok(needed)
}

/// Decode one message from the front of `bytes`.
pub fn decode(bytes: &[u8]) -> Result<Message<'_>, MalformedMessage> {
    if bytes.len() < MIN_FRAME_LEN {
        return Err(MalformedMessage::Truncated(bytes.len()));
    }
    let ty = MessageType::try_from(bytes[0])?;
    let length = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
    if (length as usize) < LEN_SIZE {
        return Err(MalformedMessage::LengthUnderflow(length));
    }
    let declared = length as usize - LEN_SIZE;
    let available = bytes.len() - MIN_FRAME_LEN;
    if declared > available {
        return Err(MalformedMessage::Overrun {
            declared,
            available,
        });
    }
    Ok(Message {
        ty,
        length,
        payload: &bytes[MIN_FRAME_LEN..MIN_FRAME_LEN + declared],
    })
}

/// Iterate over consecutive messages packed in one buffer.
///
/// Stops when fewer than [`MIN_FRAME_LEN`] bytes remain or the rest is zero padding.
/// A malformed frame is yielded once as `Err` and ends the iteration.
pub fn messages(bytes: &[u8]) -> Messages<'_> {
    Messages { rest: bytes }
}

pub struct Messages<'a> {
    rest: &'a [u8],
}

impl<'a> Messages<'a> {
    /// Bytes not yet consumed.
    pub fn remainder(&self) -> &'a [u8] {
        self.rest
    }
}

impl<'a> Iterator for Messages<'a> {
    type Item = Result<Message<'a>, MalformedMessage>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.len() < MIN_FRAME_LEN || self.rest.iter().all(|&b| b == 0) {
            return None;
        }
        match decode(self.rest) {
            Ok(msg) => {
                self.rest = &self.rest[msg.encoded_len()..];
                Some(Ok(msg))
            }
            Err(e) => {
                self.rest = &[];
                Some(Err(e))
            }
        }
    }
}

/// Decode every message in `bytes` into owned values.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<OwnedMessage>, MalformedMessage> {
    messages(bytes).map(|m| m.map(Message::into_owned)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, RngCore};

    #[test]
    fn roundtrip_random_payloads() {
        let mut rng = rand::thread_rng();
        for _ in 0..16 {
            let len = rng.gen_range(0..4096);
            let mut payload = vec![0u8; len];
            rng.fill_bytes(&mut payload);
            let frame = encode(MessageType::DataRow, &payload).unwrap();
            let msg = decode(&frame).unwrap();
            assert_eq!(msg.ty, MessageType::DataRow);
            assert_eq!(msg.payload, &payload[..]);
            assert_eq!(msg.length as usize, len + 4);
            assert_eq!(msg.encoded_len(), frame.len());
        }
    }

    #[test]
    fn wire_layout_is_exact() {
        let frame = encode(MessageType::Response, b"OK").unwrap();
        assert_eq!(frame, vec![b'R', 0, 0, 0, 6, b'O', b'K']);
    }

    #[test]
    fn empty_payload() {
        let frame = encode(MessageType::Terminate, &[]).unwrap();
        assert_eq!(frame.len(), MIN_FRAME_LEN);
        let msg = decode(&frame).unwrap();
        assert!(msg.payload.is_empty());
        assert_eq!(msg.length, 4);
    }

    #[test]
    fn too_short_is_malformed() {
        assert_eq!(decode(&[]), Err(MalformedMessage::Truncated(0)));
        assert_eq!(
            decode(&[b'R', 0, 0, 0]),
            Err(MalformedMessage::Truncated(4))
        );
    }

    #[test]
    fn length_below_four_is_malformed() {
        assert_eq!(
            decode(&[b'R', 0, 0, 0, 3]),
            Err(MalformedMessage::LengthUnderflow(3))
        );
    }

    #[test]
    fn declared_length_past_end_is_malformed() {
        let frame = encode(MessageType::DataRow, b"abcdef").unwrap();
        assert_eq!(
            decode(&frame[..frame.len() - 1]),
            Err(MalformedMessage::Overrun {
                declared: 6,
                available: 5
            })
        );
    }

    #[test]
    fn unknown_tag_is_malformed() {
        assert_eq!(
            decode(&[b'?', 0, 0, 0, 4]),
            Err(MalformedMessage::UnknownType(b'?'))
        );
    }

    #[test]
    fn encode_into_short_destination_writes_nothing() {
        let mut dst = [0xAAu8; 6];
        assert_eq!(
            encode_into(&mut dst, MessageType::DataRow, b"xy"),
            Err(EncodeError::NoRoom {
                needed: 7,
                available: 6
            })
        );
        assert_eq!(dst, [0xAA; 6]);
    }

    #[test]
    fn length_field_bounds_payload_size() {
        let max = u32::MAX as usize - 4;
        assert_eq!(frame_len(max), Ok(max + MIN_FRAME_LEN));
        assert_eq!(frame_len(max + 1), Err(EncodeError::TooLarge(max + 1)));
    }

    #[test]
    fn payload_over_one_mib_encodes() {
        let payload = vec![b'a'; 1_500_000];
        let frame = encode(MessageType::Query, &payload).unwrap();
        let msg = decode(&frame).unwrap();
        assert_eq!(msg.length as usize, payload.len() + 4);
        assert_eq!(msg.payload.len(), payload.len());
    }

    #[test]
    fn multiple_messages_then_padding() {
        let mut buf = Vec::new();
        buf.extend(encode(MessageType::DataRow, b"Row 1").unwrap());
        buf.extend(encode(MessageType::DataRow, b"Row 2").unwrap());
        buf.extend(encode(MessageType::CommandComplete, b"SELECT 2").unwrap());
        buf.extend([0u8; 16]);
        let msgs = decode_all(&buf).unwrap();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[1].payload, b"Row 2");
        assert_eq!(msgs[2].ty, MessageType::CommandComplete);
    }

    #[test]
    fn trailing_partial_bytes_stop_scan() {
        let mut buf = encode(MessageType::DataRow, b"a").unwrap();
        buf.extend([b'D', 0, 0]);
        let mut it = messages(&buf);
        assert!(it.next().unwrap().is_ok());
        assert!(it.next().is_none());
        assert_eq!(it.remainder(), &[b'D', 0, 0]);
    }

    #[test]
    fn malformed_frame_ends_scan() {
        let mut buf = encode(MessageType::DataRow, b"a").unwrap();
        buf.extend([b'D', 0, 0, 0, 1, 9, 9]);
        let items: Vec<_> = messages(&buf).collect();
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert_eq!(items[1], Err(MalformedMessage::LengthUnderflow(1)));
        assert!(decode_all(&buf).is_err());
    }
}
