//! Envelope serializers
//!
//! The connector is agnostic to the envelope encoding; both ends of a queue
//! must agree on it.

use super::Envelope;
use crate::error::Result;

/// Converts envelopes to and from queue payload bytes
pub trait Serializer: Send + Sync {
    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>>;

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope>;
}

/// Compact JSON, the default encoding
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(envelope)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Indented JSON, easier to read when inspecting queues by hand
#[derive(Debug, Clone, Copy, Default)]
pub struct PrettyJsonSerializer;

impl Serializer for PrettyJsonSerializer {
    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(envelope)?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
