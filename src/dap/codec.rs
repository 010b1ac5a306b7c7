//! Content-Length framing for debug adapter streams.
//!
//! Every message is `Content-Length: <n>\r\n\r\n<n bytes of UTF-8 JSON>`.
//! [`DapCodec`] plugs into [`tokio_util::codec::FramedRead`] (inbound) and
//! [`tokio_util::codec::FramedWrite`] (outbound).
//!
//! Malformed frames never fail the decoder: they come back as
//! [`InboundFrame::Malformed`] with the offending bytes already discarded, so
//! one bad message cannot end the stream. A trailing partial message stays in
//! the buffer until the rest of it arrives.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::dap::protocol::ProtocolMessage;
use crate::AppError;

/// Largest header block accepted before the separator must appear.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// Largest payload accepted: 64 MiB. Larger payloads are skipped.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024 * 1024;

const SEPARATOR: &[u8] = b"\r\n\r\n";
const CONTENT_LENGTH: &str = "content-length";

/// One decoded unit from the inbound stream.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// A complete, well-formed protocol message.
    Message(ProtocolMessage),
    /// Bytes that could not be parsed; they have been dropped.
    Malformed(String),
}

/// Codec for the Content-Length framed debug adapter protocol.
#[derive(Debug, Default)]
pub struct DapCodec {
    /// Bytes of an oversized payload still to be thrown away.
    skip_remaining: usize,
}

impl DapCodec {
    /// Create a codec with empty state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for DapCodec {
    type Item = InboundFrame;
    type Error = AppError;

    /// Extract the next frame from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` holds no complete message yet.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.skip_remaining > 0 {
            let n = self.skip_remaining.min(src.len());
            src.advance(n);
            self.skip_remaining -= n;
            if self.skip_remaining > 0 {
                return Ok(None);
            }
        }

        let Some(header_end) = find_separator(src) else {
            if src.len() > MAX_HEADER_BYTES {
                let dropped = src.len();
                src.clear();
                return Ok(Some(InboundFrame::Malformed(format!(
                    "no header terminator within {dropped} bytes"
                ))));
            }
            return Ok(None);
        };

        let body_start = header_end + SEPARATOR.len();
        let length = match parse_content_length(&src[..header_end]) {
            Ok(length) => length,
            Err(reason) => {
                src.advance(body_start);
                return Ok(Some(InboundFrame::Malformed(reason)));
            }
        };

        if length > MAX_PAYLOAD_BYTES {
            src.advance(body_start);
            let n = length.min(src.len());
            src.advance(n);
            self.skip_remaining = length - n;
            return Ok(Some(InboundFrame::Malformed(format!(
                "payload of {length} bytes exceeds {MAX_PAYLOAD_BYTES}"
            ))));
        }

        if src.len() < body_start + length {
            src.reserve(body_start + length - src.len());
            return Ok(None);
        }

        src.advance(body_start);
        let payload = src.split_to(length);
        match serde_json::from_slice::<ProtocolMessage>(&payload) {
            Ok(message) => Ok(Some(InboundFrame::Message(message))),
            Err(err) => Ok(Some(InboundFrame::Malformed(format!(
                "invalid payload: {err}"
            )))),
        }
    }
}

impl Encoder<ProtocolMessage> for DapCodec {
    type Error = AppError;

    /// Encode `item` as a header plus a length-exact JSON payload.
    fn encode(&mut self, item: ProtocolMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let payload = serde_json::to_vec(&item)
            .map_err(|e| AppError::Dap(format!("failed to serialise outbound message: {e}")))?;
        let header = format!("Content-Length: {}\r\n\r\n", payload.len());
        dst.reserve(header.len() + payload.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&payload);
        Ok(())
    }
}

fn find_separator(buf: &[u8]) -> Option<usize> {
    buf.windows(SEPARATOR.len()).position(|w| w == SEPARATOR)
}

fn parse_content_length(header: &[u8]) -> Result<usize, String> {
    let text = std::str::from_utf8(header).map_err(|_| "header is not utf-8".to_owned())?;
    let mut length = None;
    for line in text.split("\r\n") {
        if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case(CONTENT_LENGTH) {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|e| format!("invalid Content-Length value: {e}"))?;
                length = Some(parsed);
            }
        }
    }
    length.ok_or_else(|| "missing Content-Length header".to_owned())
}
