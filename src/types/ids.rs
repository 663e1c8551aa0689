//! Newtype wrappers for record identifiers.
//!
//! An [`Identity`] is the deduplication key of a record. It is derived once by
//! the resolver and never recomputed afterwards, so it is kept opaque here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The stable identity of a logical record (e.g. a phone number).
///
/// Identities are compared byte-for-byte. Normalization happens in the
/// resolver; this type only carries the result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wraps an already-derived identity.
    ///
    /// Returns `None` for an empty string: an empty identity can never be
    /// stored.
    pub fn new(s: impl Into<String>) -> Option<Self> {
        let s = s.into();
        if s.is_empty() { None } else { Some(Identity(s)) }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Identity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
