//! Protocol codec
//!
//! Encoding and decoding functions for the wire protocol.
//!
//! ## Wire Format
//!
//! ### Request (Command) Format
//! ```text
//! *<argc>\r\n
//! $<len>\r\n<bytes>\r\n      (repeated argc times)
//! ```
//!
//! ### Reply Format
//! The first byte of each line is a type tag:
//! ```text
//! +OK\r\n                    status
//! -ERR message\r\n           error
//! :42\r\n                    integer
//! $5\r\nhello\r\n            bulk ($-1 is nil)
//! *2\r\n<reply><reply>       array (*-1 is nil)
//! ```

use std::io::{BufRead, ErrorKind, Write};

use bytes::Bytes;

use super::{Command, Reply};
use crate::error::{CourierError, Result};

/// Line terminator
pub const CRLF: &[u8] = b"\r\n";

/// Largest bulk payload accepted from the peer (512 MB)
pub const MAX_BULK_SIZE: i64 = 512 * 1024 * 1024;

/// Largest array length accepted from the peer
pub const MAX_ARRAY_LEN: i64 = 1024 * 1024 * 1024;

// =============================================================================
// Command Encoding
// =============================================================================

/// Encode a command to bytes
///
/// Format: `*<count>` header, then one length-prefixed bulk string per token.
/// A multi-word name contributes one token per word.
pub fn encode_command(command: &Command) -> Vec<u8> {
    let tokens = command.tokens();
    let payload_len: usize = tokens.iter().map(|t| t.len() + 16).sum();

    let mut message = Vec::with_capacity(16 + payload_len);
    message.push(b'*');
    message.extend_from_slice(tokens.len().to_string().as_bytes());
    message.extend_from_slice(CRLF);

    for token in &tokens {
        encode_bulk(&mut message, token);
    }

    message
}

fn encode_bulk(out: &mut Vec<u8>, payload: &[u8]) {
    out.push(b'$');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.extend_from_slice(CRLF);
    out.extend_from_slice(payload);
    out.extend_from_slice(CRLF);
}

// =============================================================================
// Reply Encoding
// =============================================================================

/// Encode a reply to bytes
///
/// Nil is written in its bulk form (`$-1`).
pub fn encode_reply(reply: &Reply) -> Vec<u8> {
    let mut message = Vec::new();
    encode_reply_into(&mut message, reply);
    message
}

fn encode_reply_into(out: &mut Vec<u8>, reply: &Reply) {
    match reply {
        Reply::Status(s) => {
            out.push(b'+');
            out.extend_from_slice(s.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::Error(e) => {
            out.push(b'-');
            out.extend_from_slice(e.as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::Integer(n) => {
            out.push(b':');
            out.extend_from_slice(n.to_string().as_bytes());
            out.extend_from_slice(CRLF);
        }
        Reply::Bulk(b) => encode_bulk(out, b),
        Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
        Reply::Array(items) => {
            out.push(b'*');
            out.extend_from_slice(items.len().to_string().as_bytes());
            out.extend_from_slice(CRLF);
            for item in items {
                encode_reply_into(out, item);
            }
        }
    }
}

// =============================================================================
// Reply Decoding
// =============================================================================

/// Read one reply from a buffered stream
///
/// Returns `Ok(None)` when the stream is closed before any byte of the reply
/// was read. Callers must treat that as a failed operation, not as a nil reply.
/// A stream closed in the middle of a reply is an `UnexpectedEof` I/O error.
pub fn read_reply<R: BufRead>(reader: &mut R) -> Result<Option<Reply>> {
    let line = match read_line(reader)? {
        Some(line) => line,
        None => return Ok(None),
    };

    let (tag, rest) = match line.split_first() {
        Some((tag, rest)) => (*tag, rest),
        None => return Err(CourierError::Protocol("empty reply line".to_string())),
    };

    let reply = match tag {
        b'+' => Reply::Status(String::from_utf8_lossy(rest).trim().to_string()),
        b'-' => Reply::Error(String::from_utf8_lossy(rest).trim().to_string()),
        b':' => Reply::Integer(parse_integer(rest)?),
        b'$' => read_bulk(reader, parse_integer(rest)?)?,
        b'*' => read_array(reader, parse_integer(rest)?)?,
        _ => {
            return Err(CourierError::Protocol(format!(
                "Unknown reply type: 0x{:02x}",
                tag
            )))
        }
    };

    Ok(Some(reply))
}

/// Read one CRLF-terminated line, without the terminator
fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with(CRLF) {
        return Err(CourierError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            "reply line not terminated by CRLF",
        )));
    }
    line.truncate(line.len() - CRLF.len());
    Ok(Some(line))
}

fn parse_integer(raw: &[u8]) -> Result<i64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            CourierError::Protocol(format!(
                "Invalid integer in reply: {:?}",
                String::from_utf8_lossy(raw)
            ))
        })
}

fn read_bulk<R: BufRead>(reader: &mut R, len: i64) -> Result<Reply> {
    if len == -1 {
        return Ok(Reply::Nil);
    }
    if !(0..=MAX_BULK_SIZE).contains(&len) {
        return Err(CourierError::Protocol(format!(
            "Invalid bulk length: {} (max {})",
            len, MAX_BULK_SIZE
        )));
    }

    let mut payload = vec![0u8; len as usize + CRLF.len()];
    reader.read_exact(&mut payload)?;
    if !payload.ends_with(CRLF) {
        return Err(CourierError::Protocol(
            "Bulk payload not terminated by CRLF".to_string(),
        ));
    }
    payload.truncate(len as usize);

    Ok(Reply::Bulk(Bytes::from(payload)))
}

fn read_array<R: BufRead>(reader: &mut R, count: i64) -> Result<Reply> {
    if count == -1 {
        return Ok(Reply::Nil);
    }
    if !(0..=MAX_ARRAY_LEN).contains(&count) {
        return Err(CourierError::Protocol(format!(
            "Invalid array length: {}",
            count
        )));
    }

    let mut items = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        match read_reply(reader)? {
            Some(item) => items.push(item),
            None => {
                return Err(CourierError::Io(std::io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "stream closed inside an array reply",
                )))
            }
        }
    }

    Ok(Reply::Array(items))
}

// =============================================================================
// Stream-based I/O helpers
// =============================================================================

/// Write a command to a stream
pub fn write_command<W: Write>(writer: &mut W, command: &Command) -> Result<()> {
    let bytes = encode_command(command);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Write a reply to a stream
pub fn write_reply<W: Write>(writer: &mut W, reply: &Reply) -> Result<()> {
    let bytes = encode_reply(reply);
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Read a command sent by a peer: an array of bulk strings
///
/// Returns `Ok(None)` on a clean close. Used by servers and test doubles.
pub fn read_command<R: BufRead>(reader: &mut R) -> Result<Option<Command>> {
    let items = match read_reply(reader)? {
        Some(Reply::Array(items)) => items,
        Some(other) => {
            return Err(CourierError::Protocol(format!(
                "Expected command array, got {}",
                other.kind()
            )))
        }
        None => return Ok(None),
    };

    let mut tokens = items.into_iter().map(|item| match item {
        Reply::Bulk(b) => Ok(b),
        other => Err(CourierError::Protocol(format!(
            "Expected bulk command token, got {}",
            other.kind()
        ))),
    });

    let name = match tokens.next() {
        Some(name) => String::from_utf8_lossy(&name?).into_owned(),
        None => return Err(CourierError::Protocol("Empty command array".to_string())),
    };

    let mut command = Command::new(name);
    for token in tokens {
        command = command.arg(&token?);
    }
    Ok(Some(command))
}
