//! Note identifiers and the generators that mint them.
//!
//! A [`NoteId`] is an opaque string. Ids minted locally are UUIDv7 text
//! (time-ordered, globally unique), but ids arriving through replication are
//! accepted verbatim, so nothing here parses or validates the contents.
//! The `short()` form is for logs and human-facing output only, never a
//! lookup key.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Identifier of a single note (and of its persisted row).
#[derive(Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(String);

impl NoteId {
    /// Wrap an existing id string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 8 characters, for display only.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// Consume into the inner string.
    pub fn into_string(self) -> String {
        self.0
    }
}

impl From<&str> for NoteId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NoteId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for NoteId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NoteId({})", self.short())
    }
}

// ── Generators ──────────────────────────────────────────────────────────────

/// Source of fresh note ids.
///
/// Ids must be globally unique; no ordering is required of them.
pub trait IdGenerator: Send + Sync {
    fn new_id(&self) -> NoteId;
}

/// Default generator: UUIDv7 in hyphenated text form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidV7Ids;

impl IdGenerator for UuidV7Ids {
    fn new_id(&self) -> NoteId {
        NoteId(uuid::Uuid::now_v7().to_string())
    }
}

/// Deterministic generator yielding `{prefix}1`, `{prefix}2`, ...
///
/// Unique only within one generator instance. Meant for fixtures and tests.
#[derive(Debug)]
pub struct SequentialIds {
    prefix: String,
    next: AtomicU64,
}

impl SequentialIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }
}

impl Default for SequentialIds {
    fn default() -> Self {
        Self::new("n")
    }
}

impl IdGenerator for SequentialIds {
    fn new_id(&self) -> NoteId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        NoteId(format!("{}{}", self.prefix, n))
    }
}

impl<G: IdGenerator + ?Sized> IdGenerator for std::sync::Arc<G> {
    fn new_id(&self) -> NoteId {
        (**self).new_id()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_ids_are_unique() {
        let ids = UuidV7Ids;
        let seen: HashSet<NoteId> = (0..256).map(|_| ids.new_id()).collect();
        assert_eq!(seen.len(), 256);
    }

    #[test]
    fn test_uuid_id_is_parseable() {
        let id = UuidV7Ids.new_id();
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new("t");
        assert_eq!(ids.new_id().as_str(), "t1");
        assert_eq!(ids.new_id().as_str(), "t2");
        assert_eq!(ids.new_id().as_str(), "t3");
    }

    #[test]
    fn test_short_handles_short_and_multibyte_ids() {
        assert_eq!(NoteId::from("abc").short(), "abc");
        assert_eq!(NoteId::from("0123456789").short(), "01234567");
        assert_eq!(NoteId::from("会術会術会術会術会術").short(), "会術会術会術会術");
    }

    #[test]
    fn test_serde_transparent() {
        let id = NoteId::from("123xyz");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"123xyz\"");
        let back: NoteId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }
}
