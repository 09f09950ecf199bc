//! # Medley
//!
//! A record-level fuzzy similarity engine.
//!
//! Records fragment into field groups under a small directive DSL, expand
//! through layered deletion neighborhoods (character-level within fields,
//! group-level across fields), and compile into four on-disk inverted
//! indexes. Ids sharing any fingerprint collapse transitively into one
//! canonical match id, so "what is related to X?" answers with a pair of
//! exact-match lookups at query time.

pub mod cluster;
pub mod config;
pub mod directive;
pub mod error;
pub mod fingerprint;
pub mod hashing;
pub mod index;
pub mod model;
pub mod neighborhood;
pub mod persistence;
pub mod query;

// Re-export main types for convenience
pub use config::{MedleyConfig, Profile};
pub use directive::Plan;
pub use error::Error;
pub use index::{IndexPaths, IndexWriteReport};
pub use model::{EntityId, Fingerprint, InputRecord, LookupPair, MatchId, MatchPair, RecordView};
pub use query::{QueryEngine, RelatedPair};

use crate::fingerprint::RecordHasher;
use anyhow::Result;
use crossbeam_channel::bounded;
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag, honoured at shuffle boundaries and at
/// the top of the cluster reduction loop. A cancelled build publishes
/// nothing.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Counts reported by a completed build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Input records consumed
    pub records: u64,
    /// Deduped (id, fingerprint) pairs
    pub lookup_pairs: u64,
    /// Clusters assigned (the highest match id)
    pub clusters: u32,
    /// Rows written per index
    pub report: IndexWriteReport,
}

/// Main API for building and querying similarity indexes.
pub struct Medley {
    config: MedleyConfig,
}

impl Default for Medley {
    fn default() -> Self {
        Self::new()
    }
}

impl Medley {
    /// Create an engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(MedleyConfig::default())
    }

    pub fn with_config(config: MedleyConfig) -> Self {
        Self { config }
    }

    /// Create an engine configured from `MEDLEY_`-prefixed environment
    /// variables and defaults.
    pub fn from_env() -> Result<Self> {
        Ok(Self::with_config(MedleyConfig::from_env()?))
    }

    pub fn config(&self) -> &MedleyConfig {
        &self.config
    }

    /// Compile `records` into the four indexes at `paths`.
    ///
    /// Directive errors are fatal before any record is read. A failed or
    /// cancelled build publishes nothing; a completed build overwrites
    /// whatever was at the paths.
    pub fn build_all_indexes<R, D, S>(
        &self,
        records: R,
        directives: D,
        max_edit_distance: i32,
        paths: &IndexPaths,
    ) -> Result<BuildSummary>
    where
        R: IntoIterator<Item = InputRecord> + Send,
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.build_all_indexes_with_cancel(
            records,
            directives,
            max_edit_distance,
            paths,
            &CancelToken::new(),
        )
    }

    /// `build_all_indexes` with the configured default deletion depth.
    pub fn build_indexes<R, D, S>(
        &self,
        records: R,
        directives: D,
        paths: &IndexPaths,
    ) -> Result<BuildSummary>
    where
        R: IntoIterator<Item = InputRecord> + Send,
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.build_all_indexes(
            records,
            directives,
            self.config.build.max_edit_distance,
            paths,
        )
    }

    pub fn build_all_indexes_with_cancel<R, D, S>(
        &self,
        records: R,
        directives: D,
        max_edit_distance: i32,
        paths: &IndexPaths,
        cancel: &CancelToken,
    ) -> Result<BuildSummary>
    where
        R: IntoIterator<Item = InputRecord> + Send,
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let plan = Plan::parse(directives)?;

        let (records_seen, mut lookup_pairs) =
            self.fingerprint_records(records, &plan, max_edit_distance, cancel)?;
        lookup_pairs.par_sort_unstable();
        lookup_pairs.dedup();
        tracing::info!(
            records = records_seen,
            pairs = lookup_pairs.len(),
            "fingerprinting complete"
        );

        let match_pairs = cluster::build_match_pairs(&lookup_pairs, &self.config.build, cancel)?;
        let clusters = match_pairs.last().map(|pair| pair.match_id.0).unwrap_or(0);

        if cancel.is_cancelled() {
            return Err(Error::Cancelled.into());
        }
        let report = index::write_all_indexes(&lookup_pairs, &match_pairs, paths)?;

        Ok(BuildSummary {
            records: records_seen,
            lookup_pairs: lookup_pairs.len() as u64,
            clusters,
            report,
        })
    }

    /// Fan records out to hashing workers over bounded channels and
    /// collect the emitted pairs.
    fn fingerprint_records<R>(
        &self,
        records: R,
        plan: &Plan,
        max_edit_distance: i32,
        cancel: &CancelToken,
    ) -> Result<(u64, Vec<LookupPair>)>
    where
        R: IntoIterator<Item = InputRecord> + Send,
    {
        let workers = self.config.build.resolved_workers();
        let batch_size = self.config.build.record_batch_size.max(1);

        let (batch_tx, batch_rx) = bounded::<Vec<InputRecord>>(workers * 2);
        let (pair_tx, pair_rx) = bounded::<Vec<LookupPair>>(workers * 2);

        let mut lookup_pairs: Vec<LookupPair> = Vec::new();
        let mut records_seen = 0u64;
        let mut cancelled = false;

        std::thread::scope(|scope| {
            for _ in 0..workers {
                let batch_rx = batch_rx.clone();
                let pair_tx = pair_tx.clone();
                let hasher = RecordHasher::new(plan, max_edit_distance);
                scope.spawn(move || {
                    for batch in batch_rx.iter() {
                        let mut pairs = Vec::new();
                        for record in &batch {
                            pairs.extend(hasher.fingerprints(record));
                        }
                        if pair_tx.send(pairs).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(batch_rx);
            drop(pair_tx);

            let producer_cancel = cancel.clone();
            let producer = scope.spawn(move || {
                let mut seen = 0u64;
                let mut batch = Vec::with_capacity(batch_size);
                for record in records {
                    if producer_cancel.is_cancelled() {
                        return (seen, true);
                    }
                    batch.push(record);
                    seen += 1;
                    if batch.len() >= batch_size {
                        let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
                        if batch_tx.send(full).is_err() {
                            return (seen, true);
                        }
                    }
                }
                if !batch.is_empty() {
                    let _ = batch_tx.send(batch);
                }
                (seen, false)
            });

            for pairs in pair_rx.iter() {
                lookup_pairs.extend(pairs);
            }
            let (seen, stopped) = producer.join().expect("producer thread");
            records_seen = seen;
            cancelled = stopped;
        });

        if cancelled {
            return Err(Error::Cancelled.into());
        }
        Ok((records_seen, lookup_pairs))
    }

    /// Q1: related ids for known entity ids, tagged with the given id.
    pub fn find_related_by_ids(
        &self,
        ids: &[EntityId],
        paths: &IndexPaths,
    ) -> Result<Vec<RelatedPair>> {
        let engine = QueryEngine::open_with_tuning(paths, self.config.query.clone())?;
        engine.find_related_by_ids(ids)
    }

    /// Q2: related ids for fresh example records, fingerprinted the same
    /// way the build fingerprinted its input.
    pub fn find_related_by_example<D, S>(
        &self,
        examples: &[RecordView],
        directives: D,
        edit_distance: i32,
        paths: &IndexPaths,
    ) -> Result<Vec<EntityId>>
    where
        D: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let plan = Plan::parse(directives)?;
        let engine = QueryEngine::open_for_examples(paths, self.config.query.clone())?;
        engine.find_related_by_example(&plan, examples, edit_distance)
    }
}
