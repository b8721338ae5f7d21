//! Envelope encoding and decoding.
//!
//! # Wire Formats
//!
//! **Framed** (default). Versioned and length-prefixed, so payloads may hold
//! any text:
//!
//! ```text
//! [version u8][destination i32 BE][message id i64 BE][payload len u32 BE][payload UTF-8]
//! ```
//!
//! **Legacy**. The human-readable form older nodes put on the wire:
//!
//! ```text
//! {destination messageId payload}
//! ```
//!
//! Decoding legacy text skips anything before the first `{`, cuts at the
//! first `}` after it, and splits the inside at the first two spaces. A
//! payload containing `}` is therefore truncated at that character; peers
//! that need arbitrary payloads must use the framed format.
//!
//! Framed payloads are limited to `u32::MAX` bytes by the length field;
//! [`encode`] refuses larger ones rather than writing a wrapped length.
//!
//! [`decode`] accepts either: a leading [`FRAME_VERSION`] byte selects the
//! framed decoder, anything else is parsed as legacy text.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use corelib::{DecodeError, EncodeError, Envelope, MessageId, NodeId};
use serde::{Deserialize, Serialize};

use crate::protocol::FRAME_VERSION;

/// Fixed bytes before the payload in a framed envelope.
pub const FRAME_HEADER_LEN: usize = 1 + 4 + 8 + 4;

const LEGACY_OPEN: char = '{';
const LEGACY_CLOSE: char = '}';

/// Which encoding a node emits. Decoding always accepts both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireFormat {
    #[default]
    Framed,
    Legacy,
}

/// Encode `envelope` in the given format.
pub fn encode(envelope: &Envelope, format: WireFormat) -> Result<Bytes, EncodeError> {
    match format {
        WireFormat::Framed => encode_framed(envelope),
        WireFormat::Legacy => Ok(Bytes::from(encode_legacy(envelope))),
    }
}

/// Decode an envelope in either format.
pub fn decode(raw: &[u8]) -> Result<Envelope, DecodeError> {
    match raw.first() {
        None => Err(DecodeError::MalformedEnvelope("empty message".into())),
        Some(&FRAME_VERSION) => decode_framed(raw),
        Some(_) => {
            let text = std::str::from_utf8(raw)
                .map_err(|e| DecodeError::MalformedEnvelope(format!("not UTF-8 text: {e}")))?;
            decode_legacy(text)
        }
    }
}

pub fn encode_framed(envelope: &Envelope) -> Result<Bytes, EncodeError> {
    let payload = envelope.payload().as_bytes();
    let len = payload_len_field(payload.len())?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u8(FRAME_VERSION);
    buf.put_i32(envelope.destination().0);
    buf.put_i64(envelope.message_id().0);
    buf.put_u32(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

fn payload_len_field(len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::PayloadTooLarge { len, max: u32::MAX })
}

pub fn decode_framed(raw: &[u8]) -> Result<Envelope, DecodeError> {
    let mut buf = raw;
    if buf.remaining() < FRAME_HEADER_LEN {
        return Err(DecodeError::MalformedEnvelope(format!(
            "frame header needs {FRAME_HEADER_LEN} bytes, got {}",
            buf.remaining()
        )));
    }

    let version = buf.get_u8();
    if version != FRAME_VERSION {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let destination = NodeId(buf.get_i32());
    let message_id = MessageId(buf.get_i64());
    let len = buf.get_u32() as usize;

    if buf.remaining() != len {
        return Err(DecodeError::MalformedEnvelope(format!(
            "payload length {len} does not match {} remaining bytes",
            buf.remaining()
        )));
    }

    let payload = std::str::from_utf8(buf)
        .map_err(|e| DecodeError::MalformedEnvelope(format!("payload is not UTF-8: {e}")))?;

    Ok(Envelope::new(destination, message_id, payload))
}

pub fn encode_legacy(envelope: &Envelope) -> String {
    format!(
        "{LEGACY_OPEN}{} {} {}{LEGACY_CLOSE}",
        envelope.destination(),
        envelope.message_id(),
        envelope.payload()
    )
}

pub fn decode_legacy(raw: &str) -> Result<Envelope, DecodeError> {
    let malformed = |reason: &str| DecodeError::MalformedEnvelope(reason.to_string());

    let (_, body) = raw
        .split_once(LEGACY_OPEN)
        .ok_or_else(|| malformed("missing opening `{`"))?;
    let (inner, _) = body
        .split_once(LEGACY_CLOSE)
        .ok_or_else(|| malformed("missing closing `}`"))?;

    let mut fields = inner.splitn(3, ' ');
    let destination = fields.next().unwrap_or_default();
    let message_id = fields
        .next()
        .ok_or_else(|| malformed("missing message id"))?;
    let payload = fields.next().unwrap_or_default();

    let destination: i32 = destination
        .parse()
        .map_err(|_| malformed("destination is not an integer"))?;
    let message_id: i64 = message_id
        .parse()
        .map_err(|_| malformed("message id is not an integer"))?;

    Ok(Envelope::new(
        NodeId(destination),
        MessageId(message_id),
        payload,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(payload: &str) -> Envelope {
        Envelope::new(NodeId(2), MessageId(1000), payload)
    }

    #[test]
    fn test_legacy_text_layout() {
        assert_eq!(encode_legacy(&envelope("hello world")), "{2 1000 hello world}");
        assert_eq!(encode_legacy(&envelope("")), "{2 1000 }");
    }

    #[test]
    fn test_legacy_decode_tolerates_outer_framing() {
        // Older senders printed a pointer to the struct, leaving a leading `&`
        let decoded = decode_legacy("&{3 3001 two  spaces }").unwrap();
        assert_eq!(decoded.destination(), NodeId(3));
        assert_eq!(decoded.message_id(), MessageId(3001));
        assert_eq!(decoded.payload(), "two  spaces ");
    }

    #[test]
    fn test_legacy_decode_without_payload_field() {
        let decoded = decode_legacy("{4 17}").unwrap();
        assert_eq!(decoded.payload(), "");
        assert_eq!(decoded.message_id(), MessageId(17));
    }

    #[test]
    fn test_legacy_payload_truncated_at_close() {
        let decoded = decode_legacy(&encode_legacy(&envelope("a}b"))).unwrap();
        assert_eq!(decoded.payload(), "a");
    }

    #[test]
    fn test_legacy_rejects_bad_numbers() {
        for raw in ["{x 1 p}", "{1 y p}", "{1}", "1 2 p}", "{1 2 p"] {
            assert!(
                matches!(decode_legacy(raw), Err(DecodeError::MalformedEnvelope(_))),
                "{raw:?} should not decode"
            );
        }
    }

    #[test]
    fn test_framed_keeps_closing_brace() {
        let original = envelope("a}b {c}");
        assert_eq!(decode_framed(&encode_framed(&original).unwrap()).unwrap(), original);
    }

    #[test]
    fn test_framed_rejects_truncation_and_trailing_bytes() {
        let frame = encode_framed(&envelope("payload")).unwrap();

        let short = &frame[..frame.len() - 1];
        assert!(matches!(decode_framed(short), Err(DecodeError::MalformedEnvelope(_))));

        let mut long = frame.to_vec();
        long.push(0);
        assert!(matches!(decode_framed(&long), Err(DecodeError::MalformedEnvelope(_))));

        assert!(matches!(
            decode_framed(&frame[..3]),
            Err(DecodeError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_framed_rejects_unknown_version() {
        let mut frame = encode_framed(&envelope("x")).unwrap().to_vec();
        frame[0] = 9;
        assert_eq!(decode_framed(&frame), Err(DecodeError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_framed_rejects_invalid_utf8() {
        let mut frame = encode_framed(&envelope("ab")).unwrap().to_vec();
        let last = frame.len() - 1;
        frame[last] = 0xFF;
        assert!(matches!(decode_framed(&frame), Err(DecodeError::MalformedEnvelope(_))));
    }

    #[test]
    fn test_decode_detects_format() {
        let original = envelope("hello");
        let framed = encode(&original, WireFormat::Framed).unwrap();
        let legacy = encode(&original, WireFormat::Legacy).unwrap();
        assert_eq!(decode(&framed).unwrap(), original);
        assert_eq!(decode(&legacy).unwrap(), original);
        assert!(decode(b"").is_err());
        assert!(decode(&[0xC3, 0x28]).is_err());
    }

    #[test]
    fn test_payload_length_field_limit() {
        assert_eq!(payload_len_field(0), Ok(0));
        assert_eq!(payload_len_field(u32::MAX as usize), Ok(u32::MAX));
    }

    #[cfg(target_pointer_width = "64")]
    #[test]
    fn test_payload_length_beyond_u32_rejected() {
        let len = u32::MAX as usize + 1;
        assert_eq!(
            payload_len_field(len),
            Err(EncodeError::PayloadTooLarge { len, max: u32::MAX })
        );
    }
}
