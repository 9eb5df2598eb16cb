//! Envelope signing
//!
//! A signed payload is `SHA-1(payload || secret) || payload`: the digest is
//! exactly [`DIGEST_SIZE`] raw bytes.

use sha1::{Digest, Sha1};

use crate::error::{CourierError, Result};

/// Length of the digest prefix
pub const DIGEST_SIZE: usize = 20;

fn digest(payload: &[u8], secret: &[u8]) -> [u8; DIGEST_SIZE] {
    let mut hasher = Sha1::new();
    hasher.update(payload);
    hasher.update(secret);
    let mut out = [0u8; DIGEST_SIZE];
    out.copy_from_slice(&hasher.finalize());
    out
}

/// Prefix `payload` with its digest
pub fn sign(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut signed = Vec::with_capacity(DIGEST_SIZE + payload.len());
    signed.extend_from_slice(&digest(payload, secret));
    signed.extend_from_slice(payload);
    signed
}

/// Check the digest prefix and return the payload behind it
pub fn verify<'a>(signed: &'a [u8], secret: &[u8]) -> Result<&'a [u8]> {
    if signed.len() < DIGEST_SIZE {
        return Err(CourierError::Signature);
    }
    let (expected, payload) = signed.split_at(DIGEST_SIZE);
    if digest(payload, secret)[..] != *expected {
        return Err(CourierError::Signature);
    }
    Ok(payload)
}
