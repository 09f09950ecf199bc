//! # Cluster Builder
//!
//! Collapses the (entity id, fingerprint) relation into canonical match
//! ids: any two ids sharing a fingerprint end up in the same cluster,
//! transitively. The reduction is the batch-parallel formulation —
//! tentative labels per fingerprint, per-worker chain walking over
//! sorted edge partitions, then a global fixed-point rewrite — so the
//! same code path scales from one worker to many.

use crate::config::BuildTuning;
use crate::error::Error;
use crate::model::{EntityId, LookupPair, MatchId, MatchPair};
use crate::CancelToken;
use anyhow::Result;
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;

/// Compute the canonical match id of every entity id in `pairs`.
///
/// Output is sorted by (match id, entity id) and deduped; match ids are
/// densely numbered from 1 in a deterministic order, so identical inputs
/// produce identical outputs.
pub fn build_match_pairs(
    pairs: &[LookupPair],
    tuning: &BuildTuning,
    cancel: &CancelToken,
) -> Result<Vec<MatchPair>> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }

    // Equivalence hints: runs of ids sharing a fingerprint, visited in
    // fingerprint order so labelling is deterministic.
    let mut sorted: Vec<LookupPair> = pairs.to_vec();
    sorted.par_sort_unstable_by(|a, b| (a.hash, a.id).cmp(&(b.hash, b.id)));
    sorted.dedup();

    let labelled = assign_tentative_labels(&sorted);
    let canonical_for_id = lowest_label_per_id(&labelled);
    let edges = related_label_edges(&labelled, &canonical_for_id, tuning)?;

    let rewrite = reduce_edges(edges, tuning, cancel)?;

    // Global fixed point: rewrite each row's label through the reduced
    // edge map until nothing is dirty. Every rewrite strictly lowers the
    // label, so the loop terminates.
    let mut rows: Vec<(EntityId, u64)> = canonical_for_id.into_iter().collect();
    rows.par_sort_unstable();
    let mut rounds = 0u32;
    loop {
        checkpoint(cancel)?;
        let dirty: usize = rows
            .par_iter_mut()
            .map(|row| match rewrite.get(&row.1) {
                Some(&canonical) if canonical < row.1 => {
                    row.1 = canonical;
                    1
                }
                _ => 0,
            })
            .sum();
        rounds += 1;
        if dirty == 0 {
            break;
        }
    }
    tracing::debug!(rounds, ids = rows.len(), "match label rewrite converged");

    renumber_dense(rows)
}

/// One tentative label per fingerprint hint, 1-based, in fingerprint
/// order. An id occurring under several fingerprints gets several labels.
fn assign_tentative_labels(sorted: &[LookupPair]) -> Vec<(u64, EntityId)> {
    let mut labelled = Vec::with_capacity(sorted.len());
    let mut next_label = 0u64;
    let mut previous = None;
    for pair in sorted {
        if previous != Some(pair.hash) {
            next_label += 1;
            previous = Some(pair.hash);
        }
        labelled.push((next_label, pair.id));
    }
    labelled
}

fn lowest_label_per_id(labelled: &[(u64, EntityId)]) -> FxHashMap<EntityId, u64> {
    let mut canonical: FxHashMap<EntityId, u64> = FxHashMap::default();
    for &(label, id) in labelled {
        canonical
            .entry(id)
            .and_modify(|lowest| *lowest = (*lowest).min(label))
            .or_insert(label);
    }
    canonical
}

/// Edges (canonical, related) with canonical < related: every label an
/// id carries beyond its lowest points back at that lowest.
fn related_label_edges(
    labelled: &[(u64, EntityId)],
    canonical_for_id: &FxHashMap<EntityId, u64>,
    tuning: &BuildTuning,
) -> Result<Vec<(u64, u64)>> {
    let mut edges: Vec<(u64, u64)> = labelled
        .iter()
        .filter_map(|&(label, id)| {
            let canonical = canonical_for_id[&id];
            (canonical < label).then_some((canonical, label))
        })
        .collect();
    edges.par_sort_unstable();
    edges.dedup();

    let needed_bytes = edges.len() * std::mem::size_of::<(u64, u64)>();
    if needed_bytes > tuning.max_edge_table_bytes {
        return Err(Error::ClusterOutOfMemory {
            needed_bytes,
            budget_bytes: tuning.max_edge_table_bytes,
        }
        .into());
    }
    Ok(edges)
}

/// Iterated rewrite of the edge table into a relatedId -> canonicalId
/// map. Each round shuffles the pending edges to workers by upper
/// endpoint and chain-walks every partition; merging a partition's output
/// into the map can expose that one related label was claimed by two
/// different canonicals, and that claim is itself a relation, so it feeds
/// the next round. Map values only ever decrease, so the loop reaches a
/// fixed point.
fn reduce_edges(
    edges: Vec<(u64, u64)>,
    tuning: &BuildTuning,
    cancel: &CancelToken,
) -> Result<FxHashMap<u64, u64>> {
    let workers = if edges.len() < tuning.single_worker_pair_threshold {
        1
    } else {
        tuning.resolved_workers()
    };

    let mut rewrite: FxHashMap<u64, u64> = FxHashMap::default();
    let mut pending = edges;
    let mut rounds = 0u32;
    while !pending.is_empty() {
        checkpoint(cancel)?;

        let mut partitions: Vec<Vec<(u64, u64)>> = vec![Vec::new(); workers];
        for (a, b) in pending {
            partitions[(b % workers as u64) as usize].push((a, b));
        }
        let reduced: Vec<Vec<(u64, u64)>> = partitions
            .into_par_iter()
            .map(|mut partition| {
                partition.sort_unstable();
                reduce_chains(&partition)
            })
            .collect();

        let mut next: Vec<(u64, u64)> = Vec::new();
        for (canonical, related) in reduced.into_iter().flatten() {
            match rewrite.get(&related).copied() {
                None => {
                    rewrite.insert(related, canonical);
                }
                Some(current) if current == canonical => {}
                Some(current) if canonical < current => {
                    rewrite.insert(related, canonical);
                    next.push((canonical, current));
                }
                Some(current) => {
                    next.push((current, canonical));
                }
            }
        }
        next.sort_unstable();
        next.dedup();
        pending = next;
        rounds += 1;
    }
    tracing::debug!(rounds, entries = rewrite.len(), "edge table reduced");
    Ok(rewrite)
}

/// Linear chain walk over one partition sorted by (a, b), a < b.
///
/// Each edge's lower endpoint rewrites through the running map before the
/// upper endpoint is recorded. A second edge arriving at an upper
/// endpoint already bound to a different root links the two roots, which
/// is what joins stars like (1, 3), (2, 3) into one cluster. Map keys
/// below the current lower endpoint can never be looked up again in a
/// sorted stream, so they are evicted as the pass advances.
fn reduce_chains(edges: &[(u64, u64)]) -> Vec<(u64, u64)> {
    let mut canonical: BTreeMap<u64, u64> = BTreeMap::new();
    let mut out = Vec::with_capacity(edges.len());
    for &(a, b) in edges {
        canonical = canonical.split_off(&a);
        let root = canonical.get(&a).copied().unwrap_or(a);
        match canonical.get(&b).copied() {
            None => {
                canonical.insert(b, root);
                out.push((root, b));
            }
            Some(existing) if existing == root => {}
            Some(existing) => {
                let low = existing.min(root);
                let high = existing.max(root);
                canonical.insert(b, low);
                canonical.insert(high, low);
                out.push((low, high));
                out.push((low, b));
            }
        }
    }
    out
}

/// Renumber surviving labels densely from 1, in label order, and dedupe.
fn renumber_dense(rows: Vec<(EntityId, u64)>) -> Result<Vec<MatchPair>> {
    let mut distinct: Vec<u64> = rows.iter().map(|&(_, label)| label).collect();
    distinct.sort_unstable();
    distinct.dedup();
    if distinct.len() > u32::MAX as usize {
        anyhow::bail!("cluster count {} exceeds the 32-bit match id space", distinct.len());
    }

    let renumber: FxHashMap<u64, u32> = distinct
        .iter()
        .enumerate()
        .map(|(index, &label)| (label, index as u32 + 1))
        .collect();

    let mut out: Vec<MatchPair> = rows
        .into_iter()
        .map(|(id, label)| MatchPair::new(MatchId(renumber[&label]), id))
        .collect();
    out.par_sort_unstable();
    out.dedup();
    Ok(out)
}

fn checkpoint(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled.into());
    }
    Ok(())
}
