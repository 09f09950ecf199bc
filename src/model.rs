//! # Data Model
//!
//! Core identifier types, the fixed-width pair codecs shared by the four
//! indexes, and the record view the fingerprinting pipeline consumes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Caller-supplied 48-bit entity identifier, opaque to the engine.
///
/// The constructor masks to 48 bits so every value round-trips through
/// the 6-byte payload codec.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct EntityId(u64);

impl EntityId {
    /// Largest representable entity id.
    pub const MAX: u64 = (1u64 << 48) - 1;

    /// Create an entity id, masking the value to 48 bits.
    pub fn new(value: u64) -> Self {
        Self(value & Self::MAX)
    }

    /// The raw 48-bit value.
    pub fn get(&self) -> u64 {
        self.0
    }

    /// 6-byte little-endian payload encoding.
    pub fn to_bytes(&self) -> [u8; 6] {
        let le = self.0.to_le_bytes();
        [le[0], le[1], le[2], le[3], le[4], le[5]]
    }

    /// Decode from the 6-byte little-endian payload encoding.
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut le = [0u8; 8];
        le[..6].copy_from_slice(&bytes);
        Self(u64::from_le_bytes(le))
    }

    /// 6-byte big-endian encoding; sorts numerically as a store key.
    pub fn to_key_bytes(&self) -> [u8; 6] {
        let be = self.0.to_be_bytes();
        [be[2], be[3], be[4], be[5], be[6], be[7]]
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// 64-bit fingerprint summarising a record under one deletion pattern.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    /// 8-byte little-endian payload encoding.
    pub fn to_bytes(&self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    /// Decode from the 8-byte little-endian payload encoding.
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_le_bytes(bytes))
    }

    /// 8-byte big-endian encoding; sorts numerically as a store key.
    pub fn to_key_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "H{:016x}", self.0)
    }
}

/// Canonical 32-bit cluster identifier, densely numbered from 1 within a
/// build. Not stable across rebuilds.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct MatchId(pub u32);

impl MatchId {
    /// 4-byte little-endian payload encoding.
    pub fn to_bytes(&self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    /// Decode from the 4-byte little-endian payload encoding.
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_le_bytes(bytes))
    }

    /// 4-byte big-endian encoding; sorts numerically as a store key.
    pub fn to_key_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for MatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// One (entity id, fingerprint) relation row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LookupPair {
    pub id: EntityId,
    pub hash: Fingerprint,
}

impl LookupPair {
    pub fn new(id: EntityId, hash: Fingerprint) -> Self {
        Self { id, hash }
    }

    /// 14-byte payload: 6-byte id then 8-byte hash, both little-endian.
    pub fn to_payload(&self) -> [u8; 14] {
        let mut payload = [0u8; 14];
        payload[..6].copy_from_slice(&self.id.to_bytes());
        payload[6..].copy_from_slice(&self.hash.to_bytes());
        payload
    }

    /// Decode the 14-byte payload encoding.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != 14 {
            return None;
        }
        let mut id = [0u8; 6];
        id.copy_from_slice(&payload[..6]);
        let mut hash = [0u8; 8];
        hash.copy_from_slice(&payload[6..]);
        Some(Self {
            id: EntityId::from_bytes(id),
            hash: Fingerprint::from_bytes(hash),
        })
    }
}

/// One (match id, entity id) cluster membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatchPair {
    pub match_id: MatchId,
    pub id: EntityId,
}

impl MatchPair {
    pub fn new(match_id: MatchId, id: EntityId) -> Self {
        Self { match_id, id }
    }

    /// 10-byte payload: 4-byte match id then 6-byte id, both little-endian.
    pub fn to_payload(&self) -> [u8; 10] {
        let mut payload = [0u8; 10];
        payload[..4].copy_from_slice(&self.match_id.to_bytes());
        payload[4..].copy_from_slice(&self.id.to_bytes());
        payload
    }

    /// Decode the 10-byte payload encoding.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() != 10 {
            return None;
        }
        let mut match_id = [0u8; 4];
        match_id.copy_from_slice(&payload[..4]);
        let mut id = [0u8; 6];
        id.copy_from_slice(&payload[4..]);
        Some(Self {
            match_id: MatchId::from_bytes(match_id),
            id: EntityId::from_bytes(id),
        })
    }
}

/// Projected view of one source row: field name to string value.
///
/// Built once per input record by a caller-supplied projector; the engine
/// never sees the source row shape. Absent fields read as empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordView {
    fields: BTreeMap<String, String>,
}

impl RecordView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field value, replacing any previous value.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(name.into(), value.into());
    }

    /// Builder-style `set`.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    /// Field value, or the empty string when absent or unreadable.
    pub fn get(&self, name: &str) -> &str {
        self.fields.get(name).map(String::as_str).unwrap_or("")
    }

    /// Number of populated fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// One input row: the caller's entity id plus its projected view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputRecord {
    pub id: EntityId,
    pub view: RecordView,
}

impl InputRecord {
    pub fn new(id: EntityId, view: RecordView) -> Self {
        Self { id, view }
    }
}
