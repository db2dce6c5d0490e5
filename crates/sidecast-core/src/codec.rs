//! Frame encoding: header line + payload + separator, as described in
//! spec section 6 (the `.gor` file format).

use bytes::{Bytes, BytesMut};
use memchr::memmem;

use crate::error::CodecError;
use crate::message::{Message, MessageId, MessageKind};

/// `\r\n` + three multi-byte glyphs + `\r\n`. Treated as an opaque byte
/// string; never parsed as UTF-8 on the hot path.
pub const SEPARATOR: &[u8] = "\r\n\u{1F435}\u{1F648}\u{1F649}\r\n".as_bytes();

/// Encode a [`Message`] as `header line + payload + separator`.
pub fn encode(msg: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(msg.payload.len() + SEPARATOR.len() + 64);

    buf.extend_from_slice(msg.kind.as_byte().to_string().as_bytes());
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(msg.id.to_string().as_bytes());
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(msg.timestamp.to_string().as_bytes());
    if let Some(latency) = msg.latency {
        buf.extend_from_slice(b" ");
        buf.extend_from_slice(latency.to_string().as_bytes());
    }
    buf.extend_from_slice(b"\n");
    buf.extend_from_slice(&msg.payload);
    buf.extend_from_slice(SEPARATOR);

    buf.freeze()
}

/// Decode a single frame from the front of `stream`, returning the
/// [`Message`] and the number of bytes consumed (header + payload +
/// separator), or `None` if `stream` does not contain a complete frame yet.
pub fn try_decode(stream: &[u8]) -> Result<Option<(Message, usize)>, CodecError> {
    let Some(header_end) = memchr::memchr(b'\n', stream) else {
        return Ok(None);
    };
    let Some(sep_start) = memmem::find(&stream[header_end + 1..], SEPARATOR) else {
        return Ok(None);
    };
    let sep_start = header_end + 1 + sep_start;

    let header_line = std::str::from_utf8(&stream[..header_end])
        .map_err(|_| CodecError::MalformedHeader("not valid utf-8".to_string()))?;
    let msg = parse_header(header_line, &stream[header_end + 1..sep_start])?;

    Ok(Some((msg, sep_start + SEPARATOR.len())))
}

fn parse_header(header_line: &str, payload: &[u8]) -> Result<Message, CodecError> {
    let mut parts = header_line.split(' ');
    let kind_str = parts
        .next()
        .ok_or_else(|| CodecError::MalformedHeader(header_line.to_string()))?;
    let id_str = parts
        .next()
        .ok_or_else(|| CodecError::MalformedHeader(header_line.to_string()))?;
    let ts_str = parts
        .next()
        .ok_or_else(|| CodecError::MalformedHeader(header_line.to_string()))?;
    let latency_str = parts.next();

    let kind_byte = kind_str
        .bytes()
        .next()
        .ok_or_else(|| CodecError::MalformedHeader(header_line.to_string()))?;
    let kind = MessageKind::from_byte(kind_byte).ok_or(CodecError::InvalidKind(kind_byte))?;

    let id: MessageId = id_str
        .parse()
        .map_err(|_| CodecError::MalformedHeader(header_line.to_string()))?;

    let timestamp: i64 = ts_str
        .parse()
        .map_err(|_| CodecError::InvalidTimestamp(ts_str.to_string()))?;

    let latency = latency_str
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| CodecError::InvalidTimestamp(s.to_string()))
        })
        .transpose()?;

    Ok(Message {
        kind,
        id,
        timestamp,
        latency,
        payload: Bytes::copy_from_slice(payload),
    })
}

/// Decode exactly one frame, erroring if the buffer doesn't contain a
/// complete frame. Convenience for callers that already know the buffer
/// holds a whole frame (e.g. file readers that buffered to EOF).
pub fn decode(stream: &[u8]) -> Result<Message, CodecError> {
    match try_decode(stream)? {
        Some((msg, _consumed)) => Ok(msg),
        None => Err(CodecError::Truncated),
    }
}
