//! # Record Fingerprinting
//!
//! Expands each input record through the directive plan into its set of
//! 64-bit fingerprints. Two records are similar exactly when their
//! fingerprint sets intersect, so everything the engine can ever match
//! is decided here: which fields hash together, which string variants a
//! field contributes, and which field groups may be deleted.

use crate::directive::{Alternative, Plan};
use crate::hashing::{combine64, hash_u64_seq, EMPTY_SENTINEL, H64_SEED};
use crate::model::{Fingerprint, InputRecord, LookupPair, RecordView};
use crate::neighborhood::{group_neighborhood, string_neighborhood};
use hashbrown::{HashMap, HashSet};

/// Turns records into (entity id, fingerprint) pairs under a fixed plan
/// and group-deletion depth.
#[derive(Debug, Clone)]
pub struct RecordHasher<'a> {
    plan: &'a Plan,
    max_edit_distance: u32,
}

impl<'a> RecordHasher<'a> {
    /// A negative group-deletion depth clamps to zero.
    pub fn new(plan: &'a Plan, max_edit_distance: i32) -> Self {
        Self {
            plan,
            max_edit_distance: max_edit_distance.max(0) as u32,
        }
    }

    /// The deduped fingerprint pairs for one record, across every
    /// directive alternative. Never empty: each variant emits at least
    /// its sentinel-group fingerprint.
    pub fn fingerprints(&self, record: &InputRecord) -> Vec<LookupPair> {
        let mut hashes: HashSet<u64> = HashSet::new();
        for alternative in &self.plan.alternatives {
            self.expand_alternative(alternative, &record.view, &mut hashes);
        }

        let mut pairs: Vec<LookupPair> = hashes
            .into_iter()
            .map(|hash| LookupPair::new(record.id, Fingerprint(hash)))
            .collect();
        pairs.sort_unstable();
        pairs
    }

    fn expand_alternative(
        &self,
        alternative: &Alternative,
        view: &RecordView,
        out: &mut HashSet<u64>,
    ) {
        // Project the record onto the alternative's fields. Unreadable or
        // absent fields read as empty; values are trimmed up front.
        let names = alternative.field_names();
        let base: HashMap<&str, String> = names
            .iter()
            .map(|&name| (name, view.get(name).trim().to_string()))
            .collect();

        // Cross product of per-field string neighborhoods. Expanding one
        // field never changes another, so field order is irrelevant.
        let mut variants: Vec<HashMap<&str, String>> = vec![base.clone()];
        for &name in &names {
            let expand = expansion_depth(alternative, name);
            if expand == 0 {
                continue;
            }
            let values = string_neighborhood(&base[name], expand);
            if values.len() == 1 {
                continue;
            }
            let mut next = Vec::with_capacity(variants.len() * values.len());
            for variant in &variants {
                for value in &values {
                    let mut replaced = variant.clone();
                    replaced.insert(name, value.clone());
                    next.push(replaced);
                }
            }
            variants = next;
        }

        for variant in &variants {
            self.hash_variant(alternative, variant, out);
        }
    }

    fn hash_variant(
        &self,
        alternative: &Alternative,
        variant: &HashMap<&str, String>,
        out: &mut HashSet<u64>,
    ) {
        let mut required = Vec::new();
        let mut others = Vec::new();
        for group in &alternative.groups {
            let mut state = H64_SEED;
            let mut members = 0usize;
            for field in &group.fields {
                let value = variant[field.name.as_str()].trim();
                if value.is_empty() {
                    continue;
                }
                let tagged = format!("{}:{}", field.name, value);
                state = combine64(state, tagged.as_bytes());
                members += 1;
            }
            if group.required {
                required.push(state);
            } else if members > 0 {
                // Groups with no surviving members hash as the empty
                // sequence and drop out of the deletable list.
                others.push(state);
            }
        }

        // The required hash seeds every fingerprint, so required content
        // is never elidable by group deletion.
        let required_hash = if required.is_empty() {
            EMPTY_SENTINEL
        } else {
            hash_u64_seq(&required)
        };

        if others.is_empty() {
            // A row always emits at least one fingerprint.
            others.push(EMPTY_SENTINEL);
        }

        for aggregate in group_neighborhood(&others, self.max_edit_distance) {
            out.insert(hash_u64_seq(&[required_hash, aggregate]));
        }
    }
}

fn expansion_depth(alternative: &Alternative, name: &str) -> u32 {
    // Occurrences are already normalised to the max at parse time.
    alternative
        .groups
        .iter()
        .flat_map(|group| group.fields.iter())
        .find(|field| field.name == name)
        .map(|field| field.expand)
        .unwrap_or(0)
}
