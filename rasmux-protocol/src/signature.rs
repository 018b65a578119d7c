//! Composite scope signatures.
//!
//! A signature is the high scope (cluster) UUID followed by the low scope
//! (infobase) UUID. Endpoints remember the signature they were last
//! authorized for, which lets the pool route a request to an endpoint that
//! already carries the right credentials.

use crate::error::ProtocolError;
use std::fmt;
use uuid::Uuid;

const HALF: usize = 16;

/// High/low scope identity of a request or endpoint.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Signature([u8; 2 * HALF]);

impl Signature {
    /// The "no scope" signature.
    pub const NIL: Signature = Signature([0; 2 * HALF]);

    pub fn new(high: Uuid, low: Uuid) -> Self {
        let mut raw = [0u8; 2 * HALF];
        raw[..HALF].copy_from_slice(high.as_bytes());
        raw[HALF..].copy_from_slice(low.as_bytes());
        Self(raw)
    }

    /// Signature scoped to a cluster only.
    pub fn from_high(high: Uuid) -> Self {
        Self::new(high, Uuid::nil())
    }

    /// Builds a signature from 16 (high only) or 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let mut raw = [0u8; 2 * HALF];
        match bytes.len() {
            HALF | 32 => raw[..bytes.len()].copy_from_slice(bytes),
            other => return Err(ProtocolError::InvalidSignatureLength(other)),
        }
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; 2 * HALF] {
        &self.0
    }

    pub fn high(&self) -> Uuid {
        let mut raw = [0u8; HALF];
        raw.copy_from_slice(&self.0[..HALF]);
        Uuid::from_bytes(raw)
    }

    pub fn low(&self) -> Uuid {
        let mut raw = [0u8; HALF];
        raw.copy_from_slice(&self.0[HALF..]);
        Uuid::from_bytes(raw)
    }

    pub fn is_nil(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    pub fn is_high_nil(&self) -> bool {
        self.0[..HALF].iter().all(|&b| b == 0)
    }

    pub fn is_low_nil(&self) -> bool {
        self.0[HALF..].iter().all(|&b| b == 0)
    }

    /// True if the high half equals `high`.
    pub fn high_bound_eq(&self, high: &Uuid) -> bool {
        self.0[..HALF] == high.as_bytes()[..]
    }

    /// True if the low half equals `low`.
    pub fn low_bound_eq(&self, low: &Uuid) -> bool {
        self.0[HALF..] == low.as_bytes()[..]
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}/{})", self.high(), self.low())
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.high(), self.low())
    }
}
