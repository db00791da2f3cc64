use std::collections::HashMap;

use bytes::{Buf, BytesMut};
use thiserror::Error;

const PRELUDE_LEN: usize = 12;
const FRAME_CRC_LEN: usize = 4;
const MIN_FRAME_LEN: usize = PRELUDE_LEN + FRAME_CRC_LEN;

/// A decoded event-stream frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    /// Value of the `:event-type` header, if present.
    pub event_type: Option<String>,
    /// Value of the `:message-type` header, if present (`event` or `exception`).
    pub message_type: Option<String>,
    /// JSON-parsed payload.
    pub payload: serde_json::Value,
}

/// Errors surfaced while decoding frames.
///
/// All variants are non-retryable: a corrupt or malformed frame indicates a
/// transport-level bug upstream, not a transient condition.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The prelude CRC did not match the computed CRC of `total_len`/`header_len`.
    #[error("prelude CRC mismatch")]
    PreludeCrcMismatch,
    /// The frame CRC did not match the computed CRC of the frame body.
    #[error("frame CRC mismatch")]
    FrameCrcMismatch,
    /// `header_len` or `total_len` described a frame geometry that can't fit
    /// (e.g. `header_len > total_len`).
    #[error("invalid frame geometry")]
    InvalidGeometry,
    /// A header's declared length ran past the end of the header block.
    #[error("truncated header")]
    TruncatedHeader,
    /// An unrecognized header value type tag.
    #[error("unknown header type {0}")]
    UnknownHeaderType(u8),
    /// The payload bytes were not valid JSON.
    #[error("invalid payload JSON: {0}")]
    InvalidPayload(String),
}

/// Streaming decoder for AWS binary event-stream frames.
///
/// Feed arbitrary byte chunks via [`push`](Self::push); it accumulates an
/// internal buffer and returns every frame that became complete, preserving
/// any partial frame for the next call.
#[derive(Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    /// Create an empty decoder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and decode as many complete frames as possible.
    ///
    /// On the first error, decoding stops and the error is returned alongside
    /// whatever frames were already decoded from this push — the caller
    /// should treat a parse error as fatal for the stream.
    pub fn push(&mut self, chunk: &[u8]) -> (Vec<Frame>, Option<FramingError>) {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        loop {
            match self.try_decode_one() {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => return (frames, None),
                Err(err) => return (frames, Some(err)),
            }
        }
    }

    fn try_decode_one(&mut self) -> Result<Option<Frame>, FramingError> {
        if self.buf.len() < PRELUDE_LEN {
            return Ok(None);
        }

        let total_len = u32::from_be_bytes(self.buf[0..4].try_into().unwrap()) as usize;
        let header_len = u32::from_be_bytes(self.buf[4..8].try_into().unwrap()) as usize;
        let prelude_crc = u32::from_be_bytes(self.buf[8..12].try_into().unwrap());

        if total_len < MIN_FRAME_LEN || header_len > total_len.saturating_sub(MIN_FRAME_LEN) {
            return Err(FramingError::InvalidGeometry);
        }

        if self.buf.len() < total_len {
            // Incomplete frame; wait for more bytes.
            return Ok(None);
        }

        let computed_prelude_crc = crc32fast::hash(&self.buf[0..8]);
        if computed_prelude_crc != prelude_crc {
            return Err(FramingError::PreludeCrcMismatch);
        }

        let frame_crc_offset = total_len - FRAME_CRC_LEN;
        let expected_frame_crc =
            u32::from_be_bytes(self.buf[frame_crc_offset..total_len].try_into().unwrap());
        let computed_frame_crc = crc32fast::hash(&self.buf[0..frame_crc_offset]);
        if computed_frame_crc != expected_frame_crc {
            return Err(FramingError::FrameCrcMismatch);
        }

        let headers_start = PRELUDE_LEN;
        let headers_end = headers_start + header_len;
        let headers = parse_headers(&self.buf[headers_start..headers_end])?;

        let payload_start = headers_end;
        let payload_end = frame_crc_offset;
        let payload: serde_json::Value = if payload_end > payload_start {
            serde_json::from_slice(&self.buf[payload_start..payload_end])
                .map_err(|e| FramingError::InvalidPayload(e.to_string()))?
        } else {
            serde_json::Value::Null
        };

        let frame = Frame {
            event_type: headers.get(":event-type").cloned(),
            message_type: headers.get(":message-type").cloned(),
            payload,
        };

        self.buf.advance(total_len);
        Ok(Some(frame))
    }
}

/// Parse the header block into a name → string-value map.
///
/// Non-string header values are skipped over for correct offset accounting
/// but not returned — the framer only cares about `:event-type` /
/// `:message-type`, which AWS always encodes as strings.
fn parse_headers(mut buf: &[u8]) -> Result<HashMap<String, String>, FramingError> {
    let mut headers = HashMap::new();

    while !buf.is_empty() {
        let name_len = *buf.first().ok_or(FramingError::TruncatedHeader)? as usize;
        buf = &buf[1..];
        if buf.len() < name_len + 1 {
            return Err(FramingError::TruncatedHeader);
        }
        let name = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| FramingError::TruncatedHeader)?
            .to_owned();
        buf = &buf[name_len..];

        let value_type = buf[0];
        buf = &buf[1..];

        let value = match value_type {
            0 | 1 => None, // bool true/false, no payload bytes
            2 => {
                // byte
                check_len(buf, 1)?;
                buf = &buf[1..];
                None
            }
            3 => {
                // short
                check_len(buf, 2)?;
                buf = &buf[2..];
                None
            }
            4 => {
                // integer
                check_len(buf, 4)?;
                buf = &buf[4..];
                None
            }
            5 | 8 => {
                // long, timestamp
                check_len(buf, 8)?;
                buf = &buf[8..];
                None
            }
            6 => {
                // byte array: u16 len + bytes
                let len = read_u16_len(buf)?;
                buf = &buf[2..];
                check_len(buf, len)?;
                buf = &buf[len..];
                None
            }
            7 => {
                // string: u16 len + utf8 bytes
                let len = read_u16_len(buf)?;
                buf = &buf[2..];
                check_len(buf, len)?;
                let s = std::str::from_utf8(&buf[..len])
                    .map_err(|_| FramingError::TruncatedHeader)?
                    .to_owned();
                buf = &buf[len..];
                Some(s)
            }
            9 => {
                // uuid: 16 raw bytes
                check_len(buf, 16)?;
                buf = &buf[16..];
                None
            }
            other => return Err(FramingError::UnknownHeaderType(other)),
        };

        if let Some(v) = value {
            let _ = headers.insert(name, v);
        }
    }

    Ok(headers)
}

fn check_len(buf: &[u8], needed: usize) -> Result<(), FramingError> {
    if buf.len() < needed {
        Err(FramingError::TruncatedHeader)
    } else {
        Ok(())
    }
}

fn read_u16_len(buf: &[u8]) -> Result<usize, FramingError> {
    check_len(buf, 2)?;
    Ok(u16::from_be_bytes([buf[0], buf[1]]) as usize)
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame construction helper (test-only) and tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a valid frame from a set of string headers and a JSON payload,
    /// mirroring what an AWS event-stream encoder would emit.
    fn encode_frame(headers: &[(&str, &str)], payload: &[u8]) -> Vec<u8> {
        let mut header_bytes = Vec::new();
        for (name, value) in headers {
            header_bytes.push(u8::try_from(name.len()).unwrap());
            header_bytes.extend_from_slice(name.as_bytes());
            header_bytes.push(7); // string type
            header_bytes.extend_from_slice(&(value.len() as u16).to_be_bytes());
            header_bytes.extend_from_slice(value.as_bytes());
        }

        let header_len = header_bytes.len();
        let total_len = PRELUDE_LEN + header_len + payload.len() + FRAME_CRC_LEN;

        let mut frame = Vec::with_capacity(total_len);
        frame.extend_from_slice(&(total_len as u32).to_be_bytes());
        frame.extend_from_slice(&(header_len as u32).to_be_bytes());
        let prelude_crc = crc32fast::hash(&frame[0..8]);
        frame.extend_from_slice(&prelude_crc.to_be_bytes());
        frame.extend_from_slice(&header_bytes);
        frame.extend_from_slice(payload);
        let frame_crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&frame_crc.to_be_bytes());
        frame
    }

    #[test]
    fn decodes_single_whole_chunk_frame() {
        let bytes = encode_frame(
            &[(":event-type", "assistantResponseEvent"), (":message-type", "event")],
            br#"{"content":"hello"}"#,
        );
        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&bytes);
        assert!(err.is_none());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].event_type.as_deref(), Some("assistantResponseEvent"));
        assert_eq!(frames[0].message_type.as_deref(), Some("event"));
        assert_eq!(frames[0].payload["content"], "hello");
    }

    #[test]
    fn decodes_byte_at_a_time() {
        let bytes = encode_frame(&[(":event-type", "messageMetadataEvent")], br#"{"x":1}"#);
        let mut decoder = FrameDecoder::new();
        let mut all_frames = Vec::new();
        for byte in &bytes {
            let (frames, err) = decoder.push(std::slice::from_ref(byte));
            assert!(err.is_none());
            all_frames.extend(frames);
        }
        assert_eq!(all_frames.len(), 1);
        assert_eq!(all_frames[0].event_type.as_deref(), Some("messageMetadataEvent"));
    }

    #[test]
    fn decodes_multiple_frames_in_one_chunk() {
        let f1 = encode_frame(&[(":event-type", "a")], b"{}");
        let f2 = encode_frame(&[(":event-type", "b")], b"{}");
        let mut combined = f1;
        combined.extend_from_slice(&f2);

        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&combined);
        assert!(err.is_none());
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].event_type.as_deref(), Some("a"));
        assert_eq!(frames[1].event_type.as_deref(), Some("b"));
    }

    #[test]
    fn keeps_partial_frame_across_pushes() {
        let bytes = encode_frame(&[(":event-type", "a")], br#"{"v":42}"#);
        let (first, rest) = bytes.split_at(bytes.len() / 2);

        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(first);
        assert!(frames.is_empty());
        assert!(err.is_none());

        let (frames, err) = decoder.push(rest);
        assert!(err.is_none());
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload["v"], 42);
    }

    #[test]
    fn rejects_prelude_crc_mismatch() {
        let mut bytes = encode_frame(&[(":event-type", "a")], b"{}");
        bytes[8] ^= 0xFF; // corrupt prelude CRC
        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&bytes);
        assert!(frames.is_empty());
        assert_eq!(err, Some(FramingError::PreludeCrcMismatch));
    }

    #[test]
    fn rejects_frame_crc_mismatch() {
        let mut bytes = encode_frame(&[(":event-type", "a")], br#"{"ok":true}"#);
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF; // corrupt frame CRC
        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&bytes);
        assert!(frames.is_empty());
        assert_eq!(err, Some(FramingError::FrameCrcMismatch));
    }

    #[test]
    fn rejects_invalid_payload_json() {
        let bytes = encode_frame(&[(":event-type", "a")], b"not json");
        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&bytes);
        assert!(frames.is_empty());
        assert!(matches!(err, Some(FramingError::InvalidPayload(_))));
    }

    #[test]
    fn empty_payload_decodes_as_null() {
        let bytes = encode_frame(&[(":event-type", "a")], b"");
        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&bytes);
        assert!(err.is_none());
        assert_eq!(frames[0].payload, serde_json::Value::Null);
    }

    #[test]
    fn no_event_type_header_is_none() {
        let bytes = encode_frame(&[], b"{}");
        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&bytes);
        assert!(err.is_none());
        assert_eq!(frames[0].event_type, None);
    }

    #[test]
    fn rejects_invalid_geometry() {
        // header_len larger than total_len can accommodate
        let mut bytes = vec![0u8; PRELUDE_LEN + FRAME_CRC_LEN];
        bytes[0..4].copy_from_slice(&(PRELUDE_LEN as u32 + FRAME_CRC_LEN as u32).to_be_bytes());
        bytes[4..8].copy_from_slice(&1_000_000u32.to_be_bytes());
        let prelude_crc = crc32fast::hash(&bytes[0..8]);
        bytes[8..12].copy_from_slice(&prelude_crc.to_be_bytes());

        let mut decoder = FrameDecoder::new();
        let (frames, err) = decoder.push(&bytes);
        assert!(frames.is_empty());
        assert_eq!(err, Some(FramingError::InvalidGeometry));
    }

    proptest::proptest! {
        #[test]
        fn never_panics_on_arbitrary_bytes(data in proptest::collection::vec(proptest::num::u8::ANY, 0..512)) {
            let mut decoder = FrameDecoder::new();
            let _ = decoder.push(&data);
        }

        #[test]
        fn roundtrips_arbitrary_json_payloads(key in "[a-z]{1,8}", val in proptest::num::i64::ANY) {
            let payload = serde_json::json!({ key.clone(): val });
            let bytes = encode_frame(&[(":event-type", "e")], payload.to_string().as_bytes());
            let mut decoder = FrameDecoder::new();
            let (frames, err) = decoder.push(&bytes);
            prop_assert!(err.is_none());
            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(&frames[0].payload[&key], &serde_json::json!(val));
        }
    }
}
