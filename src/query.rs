//! # Query Engine
//!
//! Answers the two lookup shapes over a published build: related ids for
//! known entity ids, and related ids for fresh example records. Queries
//! are stateless joins across the four indexes; the only mutable state
//! is a bounded cache of match-id expansions.

use crate::config::QueryTuning;
use crate::directive::Plan;
use crate::error::Error;
use crate::fingerprint::RecordHasher;
use crate::index::{
    lookup_by_hash, lookup_by_id, matches_by_id, matches_by_match_id, IndexPaths,
};
use crate::model::{EntityId, Fingerprint, InputRecord, MatchId, RecordView};
use crate::persistence::SortedStoreReader;
use anyhow::Result;
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::num::NonZeroUsize;

/// One related-id result row of an id-seeded query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RelatedPair {
    pub given_id: EntityId,
    pub id: EntityId,
}

/// Read handle over the indexes of one build.
pub struct QueryEngine {
    paths: IndexPaths,
    hash2id: SortedStoreReader,
    id2hash: Option<SortedStoreReader>,
    id2match: SortedStoreReader,
    match2id: SortedStoreReader,
    tuning: QueryTuning,
    match_cache: Mutex<LruCache<MatchId, Vec<EntityId>>>,
}

impl QueryEngine {
    /// Open all four indexes for id-seeded and example-seeded queries.
    pub fn open(paths: &IndexPaths) -> Result<Self> {
        Self::open_with_tuning(paths, QueryTuning::default())
    }

    pub fn open_with_tuning(paths: &IndexPaths, tuning: QueryTuning) -> Result<Self> {
        let id2hash = SortedStoreReader::open(&paths.id2hash)?;
        Self::open_inner(paths, Some(id2hash), tuning)
    }

    /// Open without `ID2Hash`, enough for example-seeded queries only.
    pub fn open_for_examples(paths: &IndexPaths, tuning: QueryTuning) -> Result<Self> {
        Self::open_inner(paths, None, tuning)
    }

    fn open_inner(
        paths: &IndexPaths,
        id2hash: Option<SortedStoreReader>,
        tuning: QueryTuning,
    ) -> Result<Self> {
        let capacity =
            NonZeroUsize::new(tuning.match_cache_capacity.max(1)).expect("nonzero capacity");
        Ok(Self {
            paths: paths.clone(),
            hash2id: SortedStoreReader::open(&paths.hash2id)?,
            id2hash,
            id2match: SortedStoreReader::open(&paths.id2match)?,
            match2id: SortedStoreReader::open(&paths.match2id)?,
            tuning,
            match_cache: Mutex::new(LruCache::new(capacity)),
        })
    }

    /// Everything related to each given id: ids reachable through a
    /// shared fingerprint, widened to their whole clusters. The result
    /// is deduped on (given id, id) and sorted.
    pub fn find_related_by_ids(&self, ids: &[EntityId]) -> Result<Vec<RelatedPair>> {
        let id2hash = self
            .id2hash
            .as_ref()
            .ok_or_else(|| Error::MissingIndex(self.paths.id2hash.clone()))?;

        let mut results: BTreeSet<(EntityId, EntityId)> = BTreeSet::new();
        for &given_id in ids {
            let hashes = lookup_by_id(id2hash, given_id)?;
            self.note_fanout("id2hash", given_id.get(), hashes.len());

            let mut candidates: BTreeSet<EntityId> = BTreeSet::new();
            for row in &hashes {
                let sharing = lookup_by_hash(&self.hash2id, row.hash)?;
                self.note_fanout("hash2id", row.hash.0, sharing.len());
                candidates.extend(sharing.iter().map(|pair| pair.id));
            }

            let mut match_ids: BTreeSet<MatchId> = BTreeSet::new();
            for &candidate in &candidates {
                for row in matches_by_id(&self.id2match, candidate)? {
                    match_ids.insert(row.match_id);
                }
            }

            for &match_id in &match_ids {
                for id in self.expand_match(match_id)? {
                    results.insert((given_id, id));
                }
            }
        }

        Ok(results
            .into_iter()
            .map(|(given_id, id)| RelatedPair { given_id, id })
            .collect())
    }

    /// Everything related to the example records: fingerprints computed
    /// the same way the build computed them probe `Hash2ID`, and the hits
    /// widen to their whole clusters. Callers typically pass an edit
    /// distance of 0 to avoid over-fuzzing the probe.
    pub fn find_related_by_example(
        &self,
        plan: &Plan,
        examples: &[RecordView],
        edit_distance: i32,
    ) -> Result<Vec<EntityId>> {
        let hasher = RecordHasher::new(plan, edit_distance);

        let mut probes: BTreeSet<Fingerprint> = BTreeSet::new();
        for view in examples {
            let probe = InputRecord::new(EntityId::new(0), view.clone());
            probes.extend(hasher.fingerprints(&probe).into_iter().map(|pair| pair.hash));
        }

        let mut hits: BTreeSet<EntityId> = BTreeSet::new();
        for &hash in &probes {
            let sharing = lookup_by_hash(&self.hash2id, hash)?;
            self.note_fanout("hash2id", hash.0, sharing.len());
            hits.extend(sharing.iter().map(|pair| pair.id));
        }

        let mut match_ids: BTreeSet<MatchId> = BTreeSet::new();
        for &id in &hits {
            for row in matches_by_id(&self.id2match, id)? {
                match_ids.insert(row.match_id);
            }
        }

        let mut results: BTreeSet<EntityId> = BTreeSet::new();
        for &match_id in &match_ids {
            results.extend(self.expand_match(match_id)?);
        }
        Ok(results.into_iter().collect())
    }

    fn expand_match(&self, match_id: MatchId) -> Result<Vec<EntityId>> {
        if let Some(members) = self.match_cache.lock().get(&match_id) {
            return Ok(members.clone());
        }
        let members: Vec<EntityId> = matches_by_match_id(&self.match2id, match_id)?
            .into_iter()
            .map(|row| row.id)
            .collect();
        self.note_fanout("match2id", match_id.0 as u64, members.len());
        self.match_cache.lock().put(match_id, members.clone());
        Ok(members)
    }

    /// A fanout past the soft ceiling is a job warning, never a cut:
    /// every row still flows into the result.
    fn note_fanout(&self, index: &'static str, key: u64, fanout: usize) {
        if fanout > self.tuning.fanout_soft_limit {
            tracing::warn!(
                index,
                key,
                fanout,
                limit = self.tuning.fanout_soft_limit,
                "per-key fanout exceeded the soft ceiling"
            );
        }
    }
}

/// Open the engine if every path in `paths` exists, failing with
/// `MissingIndex` naming the first absent one.
pub fn require_indexes(paths: &IndexPaths) -> Result<()> {
    for path in [
        &paths.hash2id,
        &paths.id2hash,
        &paths.match2id,
        &paths.id2match,
    ] {
        if !path.exists() {
            return Err(Error::MissingIndex(path.clone()).into());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{write_all_indexes, IndexPaths};
    use crate::model::{LookupPair, MatchPair};
    use tempfile::TempDir;

    fn id(value: u64) -> EntityId {
        EntityId::new(value)
    }

    fn publish_fixture(paths: &IndexPaths) {
        // 1 and 2 share a fingerprint; 3 is clustered with 2 but shares
        // no fingerprint with 1; 4 is unrelated.
        let lookup_pairs = vec![
            LookupPair::new(id(1), Fingerprint(0xAA)),
            LookupPair::new(id(2), Fingerprint(0xAA)),
            LookupPair::new(id(2), Fingerprint(0xBB)),
            LookupPair::new(id(3), Fingerprint(0xBB)),
            LookupPair::new(id(4), Fingerprint(0xCC)),
        ];
        let match_pairs = vec![
            MatchPair::new(MatchId(1), id(1)),
            MatchPair::new(MatchId(1), id(2)),
            MatchPair::new(MatchId(1), id(3)),
            MatchPair::new(MatchId(2), id(4)),
        ];
        write_all_indexes(&lookup_pairs, &match_pairs, paths).unwrap();
    }

    #[test]
    fn related_by_ids_walks_hashes_and_clusters() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        publish_fixture(&paths);

        let engine = QueryEngine::open(&paths).unwrap();
        let related = engine.find_related_by_ids(&[id(1)]).unwrap();
        let ids: Vec<u64> = related.iter().map(|pair| pair.id.get()).collect();

        // Self, the direct hash match, and the transitive cluster member.
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(related.iter().all(|pair| pair.given_id == id(1)));
    }

    #[test]
    fn related_by_ids_tags_each_given_id() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        publish_fixture(&paths);

        let engine = QueryEngine::open(&paths).unwrap();
        let related = engine.find_related_by_ids(&[id(1), id(4)]).unwrap();

        let of_4: Vec<u64> = related
            .iter()
            .filter(|pair| pair.given_id == id(4))
            .map(|pair| pair.id.get())
            .collect();
        assert_eq!(of_4, vec![4]);
    }

    #[test]
    fn unknown_id_returns_nothing() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        publish_fixture(&paths);

        let engine = QueryEngine::open(&paths).unwrap();
        assert!(engine.find_related_by_ids(&[id(99)]).unwrap().is_empty());
    }

    #[test]
    fn missing_index_is_an_immediate_failure() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        let err = QueryEngine::open(&paths).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::MissingIndex(_))
        ));
        assert!(require_indexes(&paths).is_err());
    }

    #[test]
    fn match_expansion_is_cached() {
        let dir = TempDir::new().unwrap();
        let paths = IndexPaths::in_dir(dir.path());
        publish_fixture(&paths);

        let engine = QueryEngine::open(&paths).unwrap();
        let first = engine.expand_match(MatchId(1)).unwrap();
        let second = engine.expand_match(MatchId(1)).unwrap();
        assert_eq!(first, second);
        assert_eq!(first, vec![id(1), id(2), id(3)]);
    }
}
