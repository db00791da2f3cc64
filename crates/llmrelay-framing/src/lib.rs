//! # llmrelay-framing
//!
//! Decoder for AWS's binary event-stream framing, used by Amazon Q
//! CodeWhisperer's streaming `GenerateAssistantResponse` responses.
//!
//! Each frame is:
//!
//! ```text
//! [prelude: total_len u32 BE, header_len u32 BE, prelude_crc u32 BE]
//! [headers: header_len bytes]
//! [payload: total_len - header_len - 16 bytes]
//! [frame_crc u32 BE]
//! ```
//!
//! Headers are a sequence of `[name_len u8, name bytes, type u8, value]`; the
//! payload is JSON. [`FrameDecoder`] is fed arbitrary byte chunks and emits
//! one decoded [`Frame`] per complete frame, preserving chunk boundaries
//! across calls — it never blocks on an incomplete frame, returning what it
//! can and keeping the remainder buffered for the next push.

#![deny(unsafe_code)]

mod decoder;

pub use decoder::{Frame, FrameDecoder, FramingError};
