// Core domain types shared across all scrawl crates.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable, opaque client identifier.
///
/// The lexicographic ordering of client ids is the tie-break order for
/// concurrent same-position inserts, so `Ord` here is load-bearing: the
/// server and every client must compare ids identically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Mint a fresh opaque id for clients that joined without one.
    pub fn mint() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// Document identifier (e.g. `"default"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocId(String);

impl DocId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A single edit, positioned against the document state it was authored on.
///
/// Positions are 0-indexed code-point offsets. `client_seq` is strictly
/// monotonic per client, starting at 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase", rename_all_fields = "camelCase")]
pub enum Operation {
    Insert { pos: u32, text: String, client_id: ClientId, client_seq: u64 },
    Delete { pos: u32, len: u32, client_id: ClientId, client_seq: u64 },
}

impl Operation {
    pub fn insert(pos: u32, text: impl Into<String>, client_id: ClientId, client_seq: u64) -> Self {
        Self::Insert { pos, text: text.into(), client_id, client_seq }
    }

    pub fn delete(pos: u32, len: u32, client_id: ClientId, client_seq: u64) -> Self {
        Self::Delete { pos, len, client_id, client_seq }
    }

    pub fn pos(&self) -> u32 {
        match self {
            Self::Insert { pos, .. } | Self::Delete { pos, .. } => *pos,
        }
    }

    /// Exclusive end of the affected range (equals `pos` for inserts).
    pub fn end(&self) -> u32 {
        match self {
            Self::Insert { pos, .. } => *pos,
            Self::Delete { pos, len, .. } => pos + len,
        }
    }

    pub fn client_id(&self) -> &ClientId {
        match self {
            Self::Insert { client_id, .. } | Self::Delete { client_id, .. } => client_id,
        }
    }

    pub fn client_seq(&self) -> u64 {
        match self {
            Self::Insert { client_seq, .. } | Self::Delete { client_seq, .. } => *client_seq,
        }
    }

    /// Zero-width ops are accepted but change nothing when applied.
    pub fn is_noop(&self) -> bool {
        match self {
            Self::Insert { text, .. } => text.is_empty(),
            Self::Delete { len, .. } => *len == 0,
        }
    }

    /// Net change to the document length, in code points.
    pub fn len_delta(&self) -> i64 {
        match self {
            Self::Insert { text, .. } => char_len(text) as i64,
            Self::Delete { len, .. } => -(*len as i64),
        }
    }
}

/// An [`Operation`] stamped with its position in the canonical log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerOperation {
    pub operation: Operation,
    pub server_seq: u64,
}

/// Roster entry advertised in `joined` frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub name: String,
    pub color: String,
}

/// Code-point length of a string slice.
pub fn char_len(text: &str) -> u32 {
    text.chars().count() as u32
}

const COLOR_PALETTE: [&str; 8] = [
    "#e06c75", "#61afef", "#98c379", "#e5c07b", "#c678dd", "#56b6c2", "#d19a66", "#abb2bf",
];

/// Deterministic color assignment: the n-th client to ever join a document
/// gets the n-th palette entry, wrapping around.
pub fn color_for(join_index: usize) -> &'static str {
    COLOR_PALETTE[join_index % COLOR_PALETTE.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn insert_wire_shape() {
        let op = Operation::insert(5, " world", ClientId::from("A"), 0);
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            json!({"type": "insert", "pos": 5, "text": " world", "clientId": "A", "clientSeq": 0})
        );
    }

    #[test]
    fn delete_wire_shape() {
        let op = Operation::delete(2, 3, ClientId::from("B"), 7);
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(
            value,
            json!({"type": "delete", "pos": 2, "len": 3, "clientId": "B", "clientSeq": 7})
        );
    }

    #[test]
    fn operation_roundtrip() {
        let op = Operation::insert(0, "héllo", ClientId::mint(), 42);
        let encoded = serde_json::to_string(&op).unwrap();
        let decoded: Operation = serde_json::from_str(&encoded).unwrap();
        assert_eq!(op, decoded);
    }

    #[test]
    fn client_id_ordering_is_lexicographic() {
        assert!(ClientId::from("A") < ClientId::from("B"));
        assert!(ClientId::from("a-10") < ClientId::from("a-9"));
    }

    #[test]
    fn char_len_counts_code_points() {
        assert_eq!(char_len("héllo"), 5);
        assert_eq!(char_len(""), 0);
    }

    #[test]
    fn len_delta_and_noop() {
        assert_eq!(Operation::insert(0, "ab", ClientId::from("A"), 0).len_delta(), 2);
        assert_eq!(Operation::delete(0, 2, ClientId::from("A"), 0).len_delta(), -2);
        assert!(Operation::insert(0, "", ClientId::from("A"), 0).is_noop());
        assert!(Operation::delete(9, 0, ClientId::from("A"), 0).is_noop());
    }

    #[test]
    fn palette_wraps_deterministically() {
        assert_eq!(color_for(0), color_for(8));
        assert_ne!(color_for(0), color_for(1));
    }
}
