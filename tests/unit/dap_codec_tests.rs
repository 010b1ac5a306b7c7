//! Unit tests for Content-Length framing.
//!
//! Covers:
//! - several complete messages plus a partial one in a single chunk
//! - completion of the retained partial message by a later chunk
//! - malformed payloads and headers are reported and skipped
//! - outbound encoding writes an exact byte count

use bytes::BytesMut;
use serde_json::json;
use tokio_util::codec::{Decoder, Encoder};

use noir_workbench::dap::codec::{DapCodec, InboundFrame};
use noir_workbench::dap::protocol::{EventMessage, ProtocolMessage, ResponseMessage};

fn stopped(seq: i64, line: i64) -> ProtocolMessage {
    ProtocolMessage::Event(EventMessage {
        seq,
        event: "stopped".into(),
        body: json!({ "reason": "step", "threadId": 1, "line": line }),
    })
}

fn response(seq: i64, request_seq: i64) -> ProtocolMessage {
    ProtocolMessage::Response(ResponseMessage {
        seq,
        request_seq,
        success: true,
        command: "next".into(),
        message: None,
        body: serde_json::Value::Null,
    })
}

fn encode(message: ProtocolMessage) -> Vec<u8> {
    let mut codec = DapCodec::new();
    let mut buf = BytesMut::new();
    codec.encode(message, &mut buf).expect("encode");
    buf.to_vec()
}

fn framed(payload: &str) -> Vec<u8> {
    format!("Content-Length: {}\r\n\r\n{payload}", payload.len()).into_bytes()
}

fn drain(codec: &mut DapCodec, buf: &mut BytesMut) -> Vec<InboundFrame> {
    let mut frames = Vec::new();
    while let Some(frame) = codec.decode(buf).expect("decode never fails") {
        frames.push(frame);
    }
    frames
}

// ── Reassembly ──────────────────────────────────────────────────────────────

/// Three complete messages followed by half of a fourth yield exactly three
/// frames; the partial bytes stay in the buffer untouched.
#[test]
fn complete_messages_dispatch_and_partial_is_retained() {
    let messages = vec![stopped(1, 3), response(2, 1), stopped(3, 4)];
    let mut chunk = Vec::new();
    for m in &messages {
        chunk.extend(encode(m.clone()));
    }
    let fourth = encode(response(4, 2));
    let split = fourth.len() / 2;
    chunk.extend(&fourth[..split]);

    let mut codec = DapCodec::new();
    let mut buf = BytesMut::from(&chunk[..]);
    let frames = drain(&mut codec, &mut buf);

    assert_eq!(
        frames,
        messages
            .into_iter()
            .map(InboundFrame::Message)
            .collect::<Vec<_>>()
    );
    assert_eq!(buf.len(), split, "partial message must be retained as-is");
    assert_eq!(&buf[..], &fourth[..split]);
}

/// The retained partial message is dispatched exactly once when the rest of
/// its bytes arrive.
#[test]
fn partial_message_completes_exactly_once() {
    let whole = encode(response(9, 5));
    let (head, tail) = whole.split_at(10);

    let mut codec = DapCodec::new();
    let mut buf = BytesMut::from(head);
    assert!(drain(&mut codec, &mut buf).is_empty());

    buf.extend_from_slice(tail);
    let frames = drain(&mut codec, &mut buf);
    assert_eq!(frames, vec![InboundFrame::Message(response(9, 5))]);
    assert!(buf.is_empty());
    assert!(drain(&mut codec, &mut buf).is_empty());
}

/// A header split in the middle of the separator is still recognised.
#[test]
fn split_header_is_reassembled() {
    let whole = encode(stopped(1, 7));
    let cut = whole
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("separator")
        + 2;

    let mut codec = DapCodec::new();
    let mut buf = BytesMut::from(&whole[..cut]);
    assert!(drain(&mut codec, &mut buf).is_empty());

    buf.extend_from_slice(&whole[cut..]);
    assert_eq!(drain(&mut codec, &mut buf), vec![InboundFrame::Message(stopped(1, 7))]);
}

/// Multi-byte UTF-8 payloads are measured in bytes, not characters.
#[test]
fn content_length_counts_bytes() {
    let payload = r#"{"type":"event","seq":1,"event":"output","body":{"output":"σ ✓"}}"#;
    let mut codec = DapCodec::new();
    let mut buf = BytesMut::from(&framed(payload)[..]);

    let frames = drain(&mut codec, &mut buf);
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], InboundFrame::Message(ProtocolMessage::Event(_))));
    assert!(buf.is_empty());
}

// ── Malformed input ─────────────────────────────────────────────────────────

/// A payload that is not a protocol message is reported and discarded; the
/// next message in the same chunk is still decoded.
#[test]
fn malformed_payload_is_skipped() {
    let mut chunk = framed(r#"{"type":"bogus"}"#);
    chunk.extend(encode(stopped(2, 3)));

    let mut codec = DapCodec::new();
    let mut buf = BytesMut::from(&chunk[..]);
    let frames = drain(&mut codec, &mut buf);

    assert_eq!(frames.len(), 2);
    assert!(matches!(frames[0], InboundFrame::Malformed(_)));
    assert_eq!(frames[1], InboundFrame::Message(stopped(2, 3)));
}

/// A header without `Content-Length` is reported; decoding continues after it.
#[test]
fn missing_content_length_is_reported() {
    let mut chunk = b"X-Other: 1\r\n\r\n".to_vec();
    chunk.extend(encode(response(1, 1)));

    let mut codec = DapCodec::new();
    let mut buf = BytesMut::from(&chunk[..]);
    let frames = drain(&mut codec, &mut buf);

    match &frames[0] {
        InboundFrame::Malformed(reason) => assert!(reason.contains("Content-Length")),
        other => panic!("expected malformed frame, got {other:?}"),
    }
    assert_eq!(frames[1], InboundFrame::Message(response(1, 1)));
}

/// Header names are matched case-insensitively.
#[test]
fn header_name_is_case_insensitive() {
    let payload = r#"{"type":"event","seq":4,"event":"initialized"}"#;
    let raw = format!("content-length: {}\r\n\r\n{payload}", payload.len());

    let mut codec = DapCodec::new();
    let mut buf = BytesMut::from(raw.as_bytes());
    let frames = drain(&mut codec, &mut buf);
    assert_eq!(frames.len(), 1);
    assert!(matches!(frames[0], InboundFrame::Message(_)));
}

// ── Encoding ────────────────────────────────────────────────────────────────

/// The declared length equals the byte length of the JSON payload.
#[test]
fn encoded_header_declares_exact_length() {
    let bytes = encode(stopped(1, 3));
    let text = String::from_utf8(bytes).expect("utf8");
    let (header, payload) = text.split_once("\r\n\r\n").expect("separator");
    let declared: usize = header
        .trim_start_matches("Content-Length: ")
        .parse()
        .expect("length");
    assert_eq!(declared, payload.len());
}
