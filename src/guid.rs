//! Collision-resistant identifier generation.
//!
//! Content blobs are keyed by generated identifiers rather than by node path,
//! so that two nodes can alias one blob or a copied node can be detached onto
//! an independent one.

use crate::error::FileDbError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A 128-bit random token, formatted as a hyphenated hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Guid(Uuid);

impl Guid {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Guid(Uuid::new_v4())
    }

    /// Parse an identifier from its hyphenated string form.
    pub fn parse(value: &str) -> Result<Self, FileDbError> {
        Uuid::parse_str(value)
            .map(Guid)
            .map_err(|_| FileDbError::InvalidIdentifier(value.to_string()))
    }

    /// Key bytes used when storing content blobs under this identifier.
    pub fn key(&self) -> Vec<u8> {
        self.to_string().into_bytes()
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_guids_are_distinct() {
        let a = Guid::generate();
        let b = Guid::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let guid = Guid::generate();
        let parsed = Guid::parse(&guid.to_string()).unwrap();
        assert_eq!(guid, parsed);
    }

    #[test]
    fn test_display_is_hyphenated_hex() {
        let text = Guid::generate().to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(text.matches('-').count(), 4);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Guid::parse("not-a-guid"),
            Err(FileDbError::InvalidIdentifier(_))
        ));
    }
}
