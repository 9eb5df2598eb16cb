//! Reply definitions
//!
//! Represents one decoded reply token from the store.

use std::fmt;

use bytes::Bytes;

use crate::error::{CourierError, Result};

/// A decoded reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// `+` simple status line
    Status(String),

    /// `-` error line
    Error(String),

    /// `:` integer
    Integer(i64),

    /// `$` bulk payload
    Bulk(Bytes),

    /// `*` array of nested replies
    Array(Vec<Reply>),

    /// `$-1` or `*-1`
    Nil,
}

impl Reply {
    /// Short name of the reply kind, used in error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Reply::Status(_) => "status",
            Reply::Error(_) => "error",
            Reply::Integer(_) => "integer",
            Reply::Bulk(_) => "bulk",
            Reply::Array(_) => "array",
            Reply::Nil => "nil",
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Reply::Nil)
    }

    /// True for the `+OK` status
    pub fn is_ok(&self) -> bool {
        matches!(self, Reply::Status(s) if s == "OK")
    }

    /// Truthiness of a reply: nil, zero, empty payloads and errors are false
    pub fn is_truthy(&self) -> bool {
        match self {
            Reply::Status(s) => !s.is_empty(),
            Reply::Error(_) | Reply::Nil => false,
            Reply::Integer(n) => *n != 0,
            Reply::Bulk(b) => !b.is_empty(),
            Reply::Array(items) => !items.is_empty(),
        }
    }

    fn unexpected<T>(self, expected: &'static str) -> Result<T> {
        Err(CourierError::UnexpectedReply {
            expected,
            found: self.to_string(),
        })
    }

    /// Integer value
    pub fn into_integer(self) -> Result<i64> {
        match self {
            Reply::Integer(n) => Ok(n),
            Reply::Bulk(b) => {
                let parsed = std::str::from_utf8(&b).ok().and_then(|s| s.parse().ok());
                match parsed {
                    Some(n) => Ok(n),
                    None => Reply::Bulk(b).unexpected("integer"),
                }
            }
            other => other.unexpected("integer"),
        }
    }

    /// Bulk payload or status text as bytes, `None` for nil
    pub fn into_bytes(self) -> Result<Option<Bytes>> {
        match self {
            Reply::Bulk(b) => Ok(Some(b)),
            Reply::Status(s) => Ok(Some(Bytes::from(s))),
            Reply::Nil => Ok(None),
            other => other.unexpected("bulk"),
        }
    }

    /// Bulk payload or status text decoded as UTF-8, `None` for nil
    pub fn into_string(self) -> Result<Option<String>> {
        match self.into_bytes()? {
            Some(b) => String::from_utf8(b.to_vec())
                .map(Some)
                .map_err(|e| CourierError::Protocol(format!("invalid UTF-8 in reply: {}", e))),
            None => Ok(None),
        }
    }

    /// Nested replies, `None` for a nil array
    pub fn into_array(self) -> Result<Option<Vec<Reply>>> {
        match self {
            Reply::Array(items) => Ok(Some(items)),
            Reply::Nil => Ok(None),
            other => other.unexpected("array"),
        }
    }

    /// Array of bulk payloads; nil elements are skipped
    pub fn into_bytes_vec(self) -> Result<Vec<Bytes>> {
        let mut out = Vec::new();
        for item in self.into_array()?.unwrap_or_default() {
            if let Some(b) = item.into_bytes()? {
                out.push(b);
            }
        }
        Ok(out)
    }

    /// Expect the `+OK` status
    pub fn into_ok(self) -> Result<()> {
        if self.is_ok() {
            Ok(())
        } else {
            self.unexpected("OK")
        }
    }

    /// Borrow the payload of a bulk or status reply
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Reply::Bulk(b) => Some(b),
            Reply::Status(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Integer value of an integer reply
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Reply::Integer(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Status(s) => write!(f, "{}", s),
            Reply::Error(e) => write!(f, "(error) {}", e),
            Reply::Integer(n) => write!(f, "(integer) {}", n),
            Reply::Bulk(b) => write!(f, "\"{}\"", String::from_utf8_lossy(b)),
            Reply::Nil => write!(f, "(nil)"),
            Reply::Array(items) => {
                if items.is_empty() {
                    return write!(f, "(empty array)");
                }
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}) {}", i + 1, item)?;
                }
                Ok(())
            }
        }
    }
}
