//! Envelope definitions
//!
//! The unit of payload exchanged between connectors.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message exchanged through a queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Return address: where replies go
    pub src: String,

    /// Free-form tag describing the sender
    #[serde(default)]
    pub srctype: String,

    /// Queue the envelope was sent to
    pub dst: String,

    /// Send time, unix seconds
    pub time: f64,

    /// Payload
    #[serde(default)]
    pub val: Value,

    /// Function to invoke, for RPC requests
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub funcname: Option<String>,

    /// `val` describes an error instead of a result
    #[serde(default, skip_serializing_if = "is_false")]
    pub exception: bool,

    /// Staging queue holding this envelope until it is released.
    /// Only set on envelopes received in safe mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub srcack: Option<String>,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl Envelope {
    /// Build an envelope stamped with the current time
    pub fn new(src: impl Into<String>, srctype: impl Into<String>, dst: impl Into<String>, val: Value) -> Self {
        Self {
            src: src.into(),
            srctype: srctype.into(),
            dst: dst.into(),
            time: unix_time(),
            val,
            funcname: None,
            exception: false,
            srcack: None,
        }
    }

    pub fn with_funcname(mut self, funcname: impl Into<String>) -> Self {
        self.funcname = Some(funcname.into());
        self
    }

    pub fn with_exception(mut self, exception: bool) -> Self {
        self.exception = exception;
        self
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn srctype(&self) -> &str {
        &self.srctype
    }

    pub fn dst(&self) -> &str {
        &self.dst
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Payload with the single-`value` wrapper removed
    pub fn val(&self) -> &Value {
        unwrap_value(&self.val)
    }

    /// Payload exactly as received
    pub fn raw_val(&self) -> &Value {
        &self.val
    }

    pub fn funcname(&self) -> Option<&str> {
        self.funcname.as_deref()
    }

    pub fn is_exception(&self) -> bool {
        self.exception
    }

    pub fn srcack(&self) -> Option<&str> {
        self.srcack.as_deref()
    }

    /// Read any field by name, applying [`unwrap_value`]
    ///
    /// Fields of `val` are reachable with a `val.` prefix, e.g. `val.args`.
    pub fn get(&self, field: &str) -> Option<Value> {
        let value = match field {
            "src" => Value::from(self.src.clone()),
            "srctype" => Value::from(self.srctype.clone()),
            "dst" => Value::from(self.dst.clone()),
            "time" => Value::from(self.time),
            "val" => self.val.clone(),
            "funcname" => Value::from(self.funcname.clone()?),
            "exception" => Value::from(self.exception),
            "srcack" => Value::from(self.srcack.clone()?),
            other => {
                let inner = other.strip_prefix("val.")?;
                self.val.get(inner)?.clone()
            }
        };
        Some(unwrap_value(&value).clone())
    }
}

/// Collapse a map whose only key is `value` into that inner value
///
/// Any other value is returned unchanged.
pub fn unwrap_value(value: &Value) -> &Value {
    match value {
        Value::Object(map) if map.len() == 1 => map.get("value").unwrap_or(value),
        _ => value,
    }
}

/// Current time as fractional unix seconds
pub(crate) fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
