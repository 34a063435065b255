//! AWS EventStream binary frame decoding.
//!
//! Frame layout: total length (4), header length (4), prelude CRC32 (4),
//! headers, payload, message CRC32 (4). The prelude CRC covers the first
//! eight bytes; the message CRC covers everything before itself. Both are
//! validated. Header values are typed; dispatch happens on the
//! `:message-type` / `:event-type` / `:exception-type` string headers.

use bytes::{Buf, Bytes, BytesMut};

/// Upper bound on a single frame; anything larger is a corrupt length field.
const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;
/// Prelude (12) plus trailing CRC (4).
const MIN_FRAME_LEN: u32 = 16;

#[derive(Debug, thiserror::Error)]
pub(crate) enum FrameError {
    #[error("prelude checksum mismatch")]
    PreludeChecksum,
    #[error("message checksum mismatch")]
    MessageChecksum,
    #[error("frame length {0} out of range")]
    Length(u32),
    #[error("malformed frame header block")]
    InvalidHeader,
}

/// One decoded frame.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

impl Frame {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(key, value)| {
            if key == name {
                match value {
                    HeaderValue::String(text) => Some(text.as_str()),
                    _ => None,
                }
            } else {
                None
            }
        })
    }

    pub fn message_type(&self) -> Option<&str> {
        self.header_str(":message-type")
    }

    pub fn event_type(&self) -> Option<&str> {
        self.header_str(":event-type")
    }

    pub fn exception_type(&self) -> Option<&str> {
        self.header_str(":exception-type")
    }
}

/// Typed header values, discriminated by a one-byte type code.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Bytes(Vec<u8>),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

/// Incremental decoder over a reassembly buffer. Feed network chunks in,
/// pull complete frames out; partial frames stay buffered.
#[derive(Default)]
pub(crate) struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            // Reusable reassembly buffer sized for typical model payloads.
            buf: BytesMut::with_capacity(1024 * 1024),
        }
    }

    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Decode the next complete frame, or `None` when more bytes are needed.
    pub fn next_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < 12 {
            return Ok(None);
        }

        let total_len = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        let header_len = u32::from_be_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]);
        let prelude_crc = u32::from_be_bytes([self.buf[8], self.buf[9], self.buf[10], self.buf[11]]);

        if crc32fast::hash(&self.buf[..8]) != prelude_crc {
            return Err(FrameError::PreludeChecksum);
        }

        if !(MIN_FRAME_LEN..=MAX_FRAME_LEN).contains(&total_len)
            || header_len > total_len - MIN_FRAME_LEN
        {
            return Err(FrameError::Length(total_len));
        }

        let total_len = total_len as usize;
        if self.buf.len() < total_len {
            return Ok(None);
        }

        let message_crc = u32::from_be_bytes([
            self.buf[total_len - 4],
            self.buf[total_len - 3],
            self.buf[total_len - 2],
            self.buf[total_len - 1],
        ]);
        if crc32fast::hash(&self.buf[..total_len - 4]) != message_crc {
            return Err(FrameError::MessageChecksum);
        }

        let frame = self.buf.split_to(total_len).freeze();
        let headers_end = 12 + header_len as usize;
        let headers = parse_headers(&frame[12..headers_end])?;
        let payload = frame.slice(headers_end..total_len - 4);

        Ok(Some(Frame { headers, payload }))
    }
}

fn parse_headers(mut block: &[u8]) -> Result<Vec<(String, HeaderValue)>, FrameError> {
    let mut headers = Vec::new();

    while !block.is_empty() {
        if block.len() < 2 {
            return Err(FrameError::InvalidHeader);
        }

        let name_len = block.get_u8() as usize;
        if block.len() < name_len + 1 {
            return Err(FrameError::InvalidHeader);
        }

        let name = std::str::from_utf8(&block[..name_len])
            .map_err(|_| FrameError::InvalidHeader)?
            .to_string();
        block.advance(name_len);

        let value_type = block.get_u8();
        let value = match value_type {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                ensure(!block.is_empty())?;
                HeaderValue::Byte(block.get_i8())
            }
            3 => {
                ensure(block.len() >= 2)?;
                HeaderValue::Int16(block.get_i16())
            }
            4 => {
                ensure(block.len() >= 4)?;
                HeaderValue::Int32(block.get_i32())
            }
            5 => {
                ensure(block.len() >= 8)?;
                HeaderValue::Int64(block.get_i64())
            }
            6 => {
                ensure(block.len() >= 2)?;
                let len = block.get_u16() as usize;
                ensure(block.len() >= len)?;
                let bytes = block[..len].to_vec();
                block.advance(len);
                HeaderValue::Bytes(bytes)
            }
            7 => {
                ensure(block.len() >= 2)?;
                let len = block.get_u16() as usize;
                ensure(block.len() >= len)?;
                let text = std::str::from_utf8(&block[..len])
                    .map_err(|_| FrameError::InvalidHeader)?
                    .to_string();
                block.advance(len);
                HeaderValue::String(text)
            }
            8 => {
                ensure(block.len() >= 8)?;
                HeaderValue::Timestamp(block.get_i64())
            }
            9 => {
                ensure(block.len() >= 16)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(&block[..16]);
                block.advance(16);
                HeaderValue::Uuid(uuid)
            }
            _ => return Err(FrameError::InvalidHeader),
        };

        headers.push((name, value));
    }

    Ok(headers)
}

fn ensure(condition: bool) -> Result<(), FrameError> {
    if condition { Ok(()) } else { Err(FrameError::InvalidHeader) }
}

/// Frame encoder used by tests to fabricate upstream traffic.
#[cfg(test)]
pub(crate) fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
    let mut header_block = Vec::new();
    for (name, value) in headers {
        header_block.push(name.len() as u8);
        header_block.extend_from_slice(name.as_bytes());
        header_block.push(7u8);
        header_block.extend_from_slice(&(value.len() as u16).to_be_bytes());
        header_block.extend_from_slice(value.as_bytes());
    }

    let total_len = 12 + header_block.len() + payload.len() + 4;
    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(&(total_len as u32).to_be_bytes());
    frame.extend_from_slice(&(header_block.len() as u32).to_be_bytes());
    frame.extend_from_slice(&crc32fast::hash(&frame[..8]).to_be_bytes());
    frame.extend_from_slice(&header_block);
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&crc32fast::hash(&frame).to_be_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_a_complete_event_frame() {
        let bytes = encode_frame(
            &[(":message-type", "event"), (":event-type", "contentBlockDelta")],
            br#"{"delta":{"text":"hi"}}"#,
        );

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.message_type(), Some("event"));
        assert_eq!(frame.event_type(), Some("contentBlockDelta"));
        assert_eq!(&frame.payload[..], br#"{"delta":{"text":"hi"}}"#);

        assert!(decoder.next_frame().unwrap().is_none());
    }

    #[test]
    fn partial_frames_wait_for_more_bytes() {
        let bytes = encode_frame(&[(":message-type", "event")], b"{}");

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes[..10]);
        assert!(decoder.next_frame().unwrap().is_none());

        decoder.extend(&bytes[10..]);
        assert!(decoder.next_frame().unwrap().is_some());
    }

    #[test]
    fn split_delivery_across_many_chunks_reassembles() {
        let first = encode_frame(&[(":message-type", "event"), (":event-type", "messageStart")], b"{}");
        let second = encode_frame(
            &[(":message-type", "event"), (":event-type", "messageStop")],
            br#"{"stopReason":"end_turn"}"#,
        );

        let mut all = first.clone();
        all.extend_from_slice(&second);

        let mut decoder = FrameDecoder::new();
        for byte in &all {
            decoder.extend(std::slice::from_ref(byte));
        }

        let one = decoder.next_frame().unwrap().unwrap();
        let two = decoder.next_frame().unwrap().unwrap();
        assert_eq!(one.event_type(), Some("messageStart"));
        assert_eq!(two.event_type(), Some("messageStop"));
    }

    #[test]
    fn corrupted_prelude_crc_is_rejected() {
        let mut bytes = encode_frame(&[(":message-type", "event")], b"{}");
        bytes[8] ^= 0xff;

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert!(matches!(decoder.next_frame(), Err(FrameError::PreludeChecksum)));
    }

    #[test]
    fn corrupted_payload_fails_the_message_crc() {
        let mut bytes = encode_frame(&[(":message-type", "event")], br#"{"x":1}"#);
        let len = bytes.len();
        bytes[len - 6] ^= 0xff;

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);
        assert!(matches!(decoder.next_frame(), Err(FrameError::MessageChecksum)));
    }

    #[test]
    fn exception_headers_are_exposed() {
        let bytes = encode_frame(
            &[(":message-type", "exception"), (":exception-type", "throttlingException")],
            br#"{"message":"slow down"}"#,
        );

        let mut decoder = FrameDecoder::new();
        decoder.extend(&bytes);

        let frame = decoder.next_frame().unwrap().unwrap();
        assert_eq!(frame.message_type(), Some("exception"));
        assert_eq!(frame.exception_type(), Some("throttlingException"));
    }
}
