//! Streaming frame decoder and the escaping helpers used by the encoder.

use crate::message::Message;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::io;
use std::num::ParseIntError;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub const START_BYTE: u8 = b'<';
pub const END_BYTE: u8 = b'>';
pub const ESCAPE_BYTE: u8 = b'\\';
pub const VALUE_DELIMITER: u8 = b':';
pub const PAIR_DELIMITER: u8 = b';';
pub const HEAD_END_BYTE: u8 = b'|';

/// Bytes skipped while searching for a frame start (NUL bytes are free).
pub const LIMIT_START: usize = 128;
/// Bytes allowed in a header name or content key.
pub const LIMIT_HEADER: usize = 64;
/// Bytes allowed in an integer header value.
pub const LIMIT_INT: usize = 20;
/// Bytes allowed in a content value.
pub const LIMIT_STRING: usize = 128;

/// Reasons a decode attempt fails.
///
/// Every variant except [`DecodeError::Closed`] and [`DecodeError::Io`]
/// describes a protocol violation; the caller may simply try again, the next
/// attempt resynchronizes on the following `<`.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("no frame start within {0} bytes")]
    StartLimitExceeded(usize),
    #[error("header name longer than {0} bytes")]
    HeaderLimitExceeded(usize),
    #[error("integer value longer than {0} bytes")]
    IntegerLimitExceeded(usize),
    #[error("string value longer than {0} bytes")]
    StringLimitExceeded(usize),
    #[error("expected header `{expected}`, found `{found}`")]
    UnexpectedHeader {
        expected: &'static str,
        found: String,
    },
    #[error("expected byte {expected:?}, found {found:?}")]
    UnexpectedByte { expected: char, found: char },
    #[error("unescaped control byte {0:?}")]
    UnexpectedControl(char),
    #[error("frame start inside an unfinished frame")]
    UnexpectedStart,
    #[error("escape before non-control byte {0:#04x}")]
    InvalidEscape(u8),
    #[error("invalid integer `{value}`")]
    InvalidInteger {
        value: String,
        #[source]
        source: ParseIntError,
    },
    #[error("field is not valid UTF-8")]
    InvalidUtf8(#[from] FromUtf8Error),
    #[error("byte stream closed")]
    Closed,
    #[error(transparent)]
    Io(io::Error),
}

impl DecodeError {
    /// True when the underlying reader is exhausted and no further frame can
    /// ever be decoded from it.
    pub fn is_closed(&self) -> bool {
        matches!(self, DecodeError::Closed)
    }

    fn from_io(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => DecodeError::Closed,
            _ => DecodeError::Io(error),
        }
    }
}

/// Returns true for bytes that are part of the frame syntax.
pub fn is_control(byte: u8) -> bool {
    matches!(
        byte,
        START_BYTE | END_BYTE | ESCAPE_BYTE | VALUE_DELIMITER | PAIR_DELIMITER | HEAD_END_BYTE
    )
}

/// Prefixes every control byte in `value` with a backslash.
pub fn escape(value: &str) -> Cow<'_, str> {
    if !value.bytes().any(is_control) {
        return Cow::Borrowed(value);
    }

    let mut escaped = String::with_capacity(value.len() + 4);
    for ch in value.chars() {
        if ch.is_ascii() && is_control(ch as u8) {
            escaped.push(ESCAPE_BYTE as char);
        }
        escaped.push(ch);
    }
    Cow::Owned(escaped)
}

/// Decodes one frame from `reader`.
///
/// Each step consumes exactly the bytes it matched. A `<` met inside an
/// unfinished frame is left in the reader so the next call starts on it.
/// The returned message has `source` set to 0; stamping it is up to the
/// caller.
pub async fn decode<R>(reader: &mut R) -> Result<Message, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    wait_for_start(reader).await?;

    expect_header(reader, "id").await?;
    let id = read_int(reader).await?;

    expect_header(reader, "rid").await?;
    let rid = read_int(reader).await?;

    expect_header(reader, "type").await?;
    let kind = read_int(reader).await?;

    expect_byte(reader, HEAD_END_BYTE).await?;

    let mut content = BTreeMap::new();
    loop {
        if peek_byte(reader).await? == END_BYTE {
            reader.consume(1);
            break;
        }

        let key = read_escaped(
            reader,
            VALUE_DELIMITER,
            LIMIT_HEADER,
            DecodeError::HeaderLimitExceeded,
        )
        .await?;
        let value = read_escaped(
            reader,
            PAIR_DELIMITER,
            LIMIT_STRING,
            DecodeError::StringLimitExceeded,
        )
        .await?;

        content.insert(key, value);
    }

    Ok(Message {
        id,
        rid,
        kind,
        source: 0,
        content,
    })
}

async fn peek_byte<R>(reader: &mut R) -> Result<u8, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let buffer = reader.fill_buf().await.map_err(DecodeError::from_io)?;
    buffer.first().copied().ok_or(DecodeError::Closed)
}

/// Peeks the next byte and consumes it unless it opens a new frame.
async fn next_frame_byte<R>(reader: &mut R) -> Result<u8, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let byte = peek_byte(reader).await?;
    if byte == START_BYTE {
        return Err(DecodeError::UnexpectedStart);
    }
    reader.consume(1);
    Ok(byte)
}

async fn wait_for_start<R>(reader: &mut R) -> Result<(), DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut skipped = 0;
    loop {
        let byte = peek_byte(reader).await?;
        reader.consume(1);

        if byte == START_BYTE {
            return Ok(());
        }
        if byte == 0 {
            continue;
        }

        skipped += 1;
        if skipped >= LIMIT_START {
            return Err(DecodeError::StartLimitExceeded(LIMIT_START));
        }
    }
}

async fn expect_byte<R>(reader: &mut R, expected: u8) -> Result<(), DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let found = next_frame_byte(reader).await?;
    if found != expected {
        return Err(DecodeError::UnexpectedByte {
            expected: expected as char,
            found: found as char,
        });
    }
    Ok(())
}

/// Reads a fixed header name up to its `:`; escapes are not allowed here.
async fn expect_header<R>(reader: &mut R, expected: &'static str) -> Result<(), DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut name = Vec::with_capacity(expected.len());
    loop {
        let byte = next_frame_byte(reader).await?;
        if byte == VALUE_DELIMITER {
            break;
        }
        if is_control(byte) {
            return Err(DecodeError::UnexpectedControl(byte as char));
        }
        if name.len() == LIMIT_HEADER {
            return Err(DecodeError::HeaderLimitExceeded(LIMIT_HEADER));
        }
        name.push(byte);
    }

    if name != expected.as_bytes() {
        return Err(DecodeError::UnexpectedHeader {
            expected,
            found: String::from_utf8_lossy(&name).into_owned(),
        });
    }
    Ok(())
}

async fn read_int<R>(reader: &mut R) -> Result<i64, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut digits = Vec::with_capacity(LIMIT_INT);
    loop {
        let byte = next_frame_byte(reader).await?;
        if byte == PAIR_DELIMITER {
            break;
        }
        if digits.len() == LIMIT_INT {
            return Err(DecodeError::IntegerLimitExceeded(LIMIT_INT));
        }
        digits.push(byte);
    }

    let value = String::from_utf8(digits)?;
    match value.parse::<i64>() {
        Ok(number) => Ok(number),
        Err(source) => Err(DecodeError::InvalidInteger { value, source }),
    }
}

/// Reads an escaped string up to `terminator`. Escape bytes count toward
/// `limit`, the terminator does not.
async fn read_escaped<R>(
    reader: &mut R,
    terminator: u8,
    limit: usize,
    limit_error: fn(usize) -> DecodeError,
) -> Result<String, DecodeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buffer = Vec::new();
    let mut escaped = false;
    let mut used = 0;

    loop {
        let byte = if escaped {
            let byte = peek_byte(reader).await?;
            reader.consume(1);
            byte
        } else {
            next_frame_byte(reader).await?
        };

        if escaped {
            if !is_control(byte) {
                return Err(DecodeError::InvalidEscape(byte));
            }
            buffer.push(byte);
            escaped = false;
        } else if byte == terminator {
            return Ok(String::from_utf8(buffer)?);
        } else if byte == ESCAPE_BYTE {
            escaped = true;
        } else if is_control(byte) {
            return Err(DecodeError::UnexpectedControl(byte as char));
        } else {
            buffer.push(byte);
        }

        used += 1;
        if used > limit {
            return Err(limit_error(limit));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageType;
    use tokio::io::BufReader;

    async fn decode_all(mut input: &[u8]) -> (Vec<Message>, usize) {
        let mut messages = Vec::new();
        let mut failures = 0;
        loop {
            match decode(&mut input).await {
                Ok(message) => messages.push(message),
                Err(e) if e.is_closed() => break,
                Err(_) => failures += 1,
            }
        }
        (messages, failures)
    }

    #[tokio::test]
    async fn test_decode_simple_frame() {
        let mut input: &[u8] = b"<id:7;rid:3;type:1000;|name:Alice;>";
        let message = decode(&mut input).await.unwrap();

        assert_eq!(message.id, 7);
        assert_eq!(message.rid, 3);
        assert_eq!(message.kind, MessageType::Register.code());
        assert_eq!(message.get("name"), Some("Alice"));
        assert_eq!(message.source, 0);
        assert!(input.is_empty());
    }

    #[tokio::test]
    async fn test_decode_multiple_pairs_and_duplicates() {
        let mut input: &[u8] = b"<id:1;rid:0;type:3000;|playerID:4;x:120;y:9;x:130;>";
        let message = decode(&mut input).await.unwrap();

        assert_eq!(message.content.len(), 3);
        assert_eq!(message.get("playerID"), Some("4"));
        assert_eq!(message.get("x"), Some("130"));
    }

    #[tokio::test]
    async fn test_decode_empty_content() {
        let mut input: &[u8] = b"<id:1;rid:0;type:1100;|>";
        let message = decode(&mut input).await.unwrap();

        assert_eq!(message.kind, 1100);
        assert!(message.content.is_empty());
    }

    #[tokio::test]
    async fn test_decode_escaped_content() {
        let mut input: &[u8] = b"<id:1;rid:0;type:1000;|k\\:ey:a\\<b\\;c\\\\;>";
        let message = decode(&mut input).await.unwrap();

        assert_eq!(message.get("k:ey"), Some("a<b;c\\"));
    }

    #[tokio::test]
    async fn test_roundtrip_with_control_bytes() {
        let original = Message::new(MessageType::Register)
            .with_id(99)
            .with_rid(12)
            .with("name", "<evil;|name:>")
            .with("back\\slash", "x")
            .with("plain", "value");

        let frame = original.encode();
        let mut input = frame.as_bytes();
        let decoded = decode(&mut input).await.unwrap();

        assert_eq!(decoded.id, original.id);
        assert_eq!(decoded.rid, original.rid);
        assert_eq!(decoded.kind, original.kind);
        assert_eq!(decoded.content, original.content);
    }

    #[tokio::test]
    async fn test_skips_garbage_before_start() {
        let mut input: &[u8] = b"garbage\0\0>;<id:1;rid:0;type:1100;|>";
        assert!(decode(&mut input).await.is_ok());
    }

    #[tokio::test]
    async fn test_every_truncated_prefix_resynchronizes() {
        let first = b"<id:1;rid:0;type:1000;|name:Alice;team:red;>";
        let second = b"<id:2;rid:0;type:2300;|all:1;>";

        for cut in 0..first.len() {
            let mut stream = first[..cut].to_vec();
            stream.extend_from_slice(second);

            let (messages, _) = decode_all(&stream).await;
            assert_eq!(messages.len(), 1, "prefix length {}", cut);
            assert_eq!(messages[0].id, 2);
            assert_eq!(messages[0].kind, 2300);
        }
    }

    #[tokio::test]
    async fn test_start_limit_is_bounded() {
        let garbage = vec![b'a'; 200];
        let mut input: &[u8] = &garbage;

        let error = decode(&mut input).await.unwrap_err();
        assert!(matches!(error, DecodeError::StartLimitExceeded(LIMIT_START)));
        assert_eq!(input.len(), 200 - LIMIT_START);
    }

    #[tokio::test]
    async fn test_header_name_limit() {
        let frame = format!("<id:1;rid:0;type:1;|{}:v;>", "k".repeat(LIMIT_HEADER + 1));
        let mut input = frame.as_bytes();

        let error = decode(&mut input).await.unwrap_err();
        assert!(matches!(error, DecodeError::HeaderLimitExceeded(LIMIT_HEADER)));
    }

    #[tokio::test]
    async fn test_fixed_header_limit() {
        let frame = format!("<{}:1;rid:0;type:1;|>", "i".repeat(LIMIT_HEADER + 10));
        let mut input = frame.as_bytes();

        let error = decode(&mut input).await.unwrap_err();
        assert!(matches!(error, DecodeError::HeaderLimitExceeded(LIMIT_HEADER)));
    }

    #[tokio::test]
    async fn test_string_value_limit() {
        let exact = format!("<id:1;rid:0;type:1;|k:{};>", "v".repeat(LIMIT_STRING));
        let mut input = exact.as_bytes();
        assert!(decode(&mut input).await.is_ok());

        let long = format!("<id:1;rid:0;type:1;|k:{};>", "v".repeat(LIMIT_STRING + 1));
        let mut input = long.as_bytes();
        let error = decode(&mut input).await.unwrap_err();
        assert!(matches!(error, DecodeError::StringLimitExceeded(LIMIT_STRING)));
    }

    #[tokio::test]
    async fn test_integer_limit() {
        let frame = format!("<id:{};rid:0;type:1;|>", "1".repeat(LIMIT_INT + 1));
        let mut input = frame.as_bytes();

        let error = decode(&mut input).await.unwrap_err();
        assert!(matches!(error, DecodeError::IntegerLimitExceeded(LIMIT_INT)));
    }

    #[tokio::test]
    async fn test_invalid_integer() {
        let mut input: &[u8] = b"<id:abc;rid:0;type:1;|>";
        let error = decode(&mut input).await.unwrap_err();

        match error {
            DecodeError::InvalidInteger { value, .. } => assert_eq!(value, "abc"),
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_wrong_header_name() {
        let mut input: &[u8] = b"<ix:1;rid:0;type:1;|>";
        let error = decode(&mut input).await.unwrap_err();

        assert!(matches!(
            error,
            DecodeError::UnexpectedHeader { expected: "id", .. }
        ));
    }

    #[tokio::test]
    async fn test_missing_head_separator() {
        let mut input: &[u8] = b"<id:1;rid:0;type:1;name:x;>";
        let error = decode(&mut input).await.unwrap_err();

        assert!(matches!(
            error,
            DecodeError::UnexpectedByte { expected: '|', found: 'n' }
        ));
    }

    #[tokio::test]
    async fn test_unescaped_control_in_value() {
        let mut input: &[u8] = b"<id:1;rid:0;type:1;|name:a|b;>";
        let error = decode(&mut input).await.unwrap_err();

        assert!(matches!(error, DecodeError::UnexpectedControl('|')));
    }

    #[tokio::test]
    async fn test_invalid_escape() {
        let mut input: &[u8] = b"<id:1;rid:0;type:1;|name:\\a;>";
        let error = decode(&mut input).await.unwrap_err();

        assert!(matches!(error, DecodeError::InvalidEscape(b'a')));
    }

    #[tokio::test]
    async fn test_closed_reader() {
        let mut input: &[u8] = b"";
        let error = decode(&mut input).await.unwrap_err();
        assert!(error.is_closed());

        let mut input: &[u8] = b"<id:1;rid:";
        let error = decode(&mut input).await.unwrap_err();
        assert!(error.is_closed());
    }

    #[tokio::test]
    async fn test_decode_from_chunked_stream() {
        let mock = tokio_test::io::Builder::new()
            .read(b"xx<id:5;r")
            .read(b"id:0;type:2")
            .read(b"100;|gam")
            .read(b"eID:3;>")
            .build();
        let mut reader = BufReader::new(mock);

        let message = decode(&mut reader).await.unwrap();
        assert_eq!(message.id, 5);
        assert_eq!(message.kind, MessageType::JoinGame.code());
        assert_eq!(message.get("gameID"), Some("3"));
    }

    #[test]
    fn test_escape_passthrough() {
        assert!(matches!(escape("plain"), Cow::Borrowed("plain")));
        assert_eq!(escape("a:b"), "a\\:b");
        assert_eq!(escape("ünï<"), "ünï\\<");
    }
}
