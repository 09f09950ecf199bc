//! # Index Writer
//!
//! Publishes the four inverted indexes. Each is a sorted store keyed on
//! its leading column with the full pair as a fixed-width little-endian
//! payload:
//!
//! - `Hash2ID`: fingerprint -> (id, fingerprint)
//! - `ID2Hash`: id -> (id, fingerprint)
//! - `Match2ID`: match id -> (match id, id)
//! - `ID2Match`: id -> (match id, id)
//!
//! Store keys are big-endian so lexicographic order is numeric order;
//! the trailing column is appended to the key so one leading key can
//! carry many rows. Writes are overwrites and rows are deduped, so a
//! rebuild from identical inputs publishes identical contents.

use crate::model::{EntityId, Fingerprint, LookupPair, MatchId, MatchPair};
use crate::persistence::{SortedStoreReader, SortedStoreWriter};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Locations of the four indexes of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPaths {
    pub hash2id: PathBuf,
    pub id2hash: PathBuf,
    pub match2id: PathBuf,
    pub id2match: PathBuf,
}

impl IndexPaths {
    /// Conventional layout: the four indexes as siblings under one
    /// directory, named by role.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            hash2id: dir.join("hash2id"),
            id2hash: dir.join("id2hash"),
            match2id: dir.join("match2id"),
            id2match: dir.join("id2match"),
        }
    }
}

/// Row counts written per index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexWriteReport {
    pub hash2id_rows: u64,
    pub id2hash_rows: u64,
    pub match2id_rows: u64,
    pub id2match_rows: u64,
}

fn hash2id_key(pair: &LookupPair) -> Vec<u8> {
    let mut key = Vec::with_capacity(14);
    key.extend_from_slice(&pair.hash.to_key_bytes());
    key.extend_from_slice(&pair.id.to_key_bytes());
    key
}

fn id2hash_key(pair: &LookupPair) -> Vec<u8> {
    let mut key = Vec::with_capacity(14);
    key.extend_from_slice(&pair.id.to_key_bytes());
    key.extend_from_slice(&pair.hash.to_key_bytes());
    key
}

fn match2id_key(pair: &MatchPair) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.extend_from_slice(&pair.match_id.to_key_bytes());
    key.extend_from_slice(&pair.id.to_key_bytes());
    key
}

fn id2match_key(pair: &MatchPair) -> Vec<u8> {
    let mut key = Vec::with_capacity(10);
    key.extend_from_slice(&pair.id.to_key_bytes());
    key.extend_from_slice(&pair.match_id.to_key_bytes());
    key
}

fn write_index<T, K>(path: &Path, rows: &[T], key_of: K) -> Result<u64>
where
    K: Fn(&T) -> Vec<u8>,
    T: Payload,
{
    let mut writer = SortedStoreWriter::create(path)?;
    writer.put_rows(rows.iter().map(|row| (key_of(row), row.payload())))?;
    writer.publish()?;
    Ok(rows.len() as u64)
}

trait Payload {
    fn payload(&self) -> Vec<u8>;
}

impl Payload for LookupPair {
    fn payload(&self) -> Vec<u8> {
        self.to_payload().to_vec()
    }
}

impl Payload for MatchPair {
    fn payload(&self) -> Vec<u8> {
        self.to_payload().to_vec()
    }
}

/// Publish `Hash2ID` and `ID2Hash` from the deduped lookup relation.
pub fn write_lookup_indexes(pairs: &[LookupPair], paths: &IndexPaths) -> Result<(u64, u64)> {
    let hash2id = write_index(&paths.hash2id, pairs, hash2id_key)?;
    let id2hash = write_index(&paths.id2hash, pairs, id2hash_key)?;
    Ok((hash2id, id2hash))
}

/// Publish `Match2ID` and `ID2Match` from the deduped match relation.
pub fn write_match_indexes(pairs: &[MatchPair], paths: &IndexPaths) -> Result<(u64, u64)> {
    let match2id = write_index(&paths.match2id, pairs, match2id_key)?;
    let id2match = write_index(&paths.id2match, pairs, id2match_key)?;
    Ok((match2id, id2match))
}

/// Publish all four indexes. The lookup and match halves touch disjoint
/// paths and publish in parallel.
pub fn write_all_indexes(
    lookup_pairs: &[LookupPair],
    match_pairs: &[MatchPair],
    paths: &IndexPaths,
) -> Result<IndexWriteReport> {
    let (lookup, matches) = rayon::join(
        || write_lookup_indexes(lookup_pairs, paths),
        || write_match_indexes(match_pairs, paths),
    );
    let (hash2id_rows, id2hash_rows) = lookup?;
    let (match2id_rows, id2match_rows) = matches?;
    tracing::info!(
        hash2id_rows,
        id2hash_rows,
        match2id_rows,
        id2match_rows,
        "published indexes"
    );
    Ok(IndexWriteReport {
        hash2id_rows,
        id2hash_rows,
        match2id_rows,
        id2match_rows,
    })
}

/// Lookup rows stored under one fingerprint in `Hash2ID`.
pub fn lookup_by_hash(reader: &SortedStoreReader, hash: Fingerprint) -> Result<Vec<LookupPair>> {
    decode_lookup(reader.values_for_prefix(&hash.to_key_bytes())?)
}

/// Lookup rows stored under one entity id in `ID2Hash`.
pub fn lookup_by_id(reader: &SortedStoreReader, id: EntityId) -> Result<Vec<LookupPair>> {
    decode_lookup(reader.values_for_prefix(&id.to_key_bytes())?)
}

/// Match rows stored under one match id in `Match2ID`.
pub fn matches_by_match_id(reader: &SortedStoreReader, match_id: MatchId) -> Result<Vec<MatchPair>> {
    decode_match(reader.values_for_prefix(&match_id.to_key_bytes())?)
}

/// Match rows stored under one entity id in `ID2Match`.
pub fn matches_by_id(reader: &SortedStoreReader, id: EntityId) -> Result<Vec<MatchPair>> {
    decode_match(reader.values_for_prefix(&id.to_key_bytes())?)
}

/// Decode every lookup row of an index in key order.
pub fn scan_lookup_rows(reader: &SortedStoreReader) -> Result<Vec<LookupPair>> {
    decode_lookup(reader.scan()?.into_iter().map(|(_, value)| value).collect())
}

/// Decode every match row of an index in key order.
pub fn scan_match_rows(reader: &SortedStoreReader) -> Result<Vec<MatchPair>> {
    decode_match(reader.scan()?.into_iter().map(|(_, value)| value).collect())
}

fn decode_lookup(values: Vec<Vec<u8>>) -> Result<Vec<LookupPair>> {
    values
        .into_iter()
        .map(|value| {
            LookupPair::from_payload(&value)
                .ok_or_else(|| anyhow::anyhow!("malformed lookup payload of {} bytes", value.len()))
        })
        .collect()
}

fn decode_match(values: Vec<Vec<u8>>) -> Result<Vec<MatchPair>> {
    values
        .into_iter()
        .map(|value| {
            MatchPair::from_payload(&value)
                .ok_or_else(|| anyhow::anyhow!("malformed match payload of {} bytes", value.len()))
        })
        .collect()
}
