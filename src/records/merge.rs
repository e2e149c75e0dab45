//! Dedup merge of an in-memory collection with freshly received records.
//!
//! Two phases:
//! 1. keep the existing entries whose id is absent from `incoming`
//!    (local-only records that the server has not seen yet survive);
//! 2. append `incoming` and collapse duplicate ids, later entries winning, so
//!    the server copy always replaces a stale cached one.
//!
//! The same rules back incremental change events: insert and update are
//! single-record upserts, delete is a filter by id.

use std::collections::{HashMap, HashSet};

use super::model::Identified;

/// What a single-record upsert did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
}

/// Merges `incoming` into `existing`, returning a collection with exactly one
/// entry per identifier.
pub fn merge<T: Identified + Clone>(existing: &[T], incoming: &[T]) -> Vec<T> {
    if incoming.is_empty() {
        return existing.to_vec();
    }

    let incoming_ids: HashSet<&str> = incoming.iter().map(|r| r.id()).collect();

    let combined = existing
        .iter()
        .filter(|r| !incoming_ids.contains(r.id()))
        .chain(incoming.iter());

    dedup_last_wins(combined)
}

/// Collapses duplicate ids: the position of the first occurrence is kept, the
/// value of the last occurrence wins.
fn dedup_last_wins<'a, T, I>(items: I) -> Vec<T>
where
    T: Identified + Clone + 'a,
    I: Iterator<Item = &'a T>,
{
    let mut out: Vec<T> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for item in items {
        match index.get(item.id()) {
            Some(&pos) => out[pos] = item.clone(),
            None => {
                index.insert(item.id().to_string(), out.len());
                out.push(item.clone());
            }
        }
    }

    out
}

/// Replaces the entry with the same id in place, or appends it.
pub fn upsert<T: Identified>(collection: &mut Vec<T>, record: T) -> UpsertOutcome {
    match collection.iter().position(|r| r.id() == record.id()) {
        Some(pos) => {
            collection[pos] = record;
            UpsertOutcome::Replaced
        }
        None => {
            collection.push(record);
            UpsertOutcome::Inserted
        }
    }
}

/// Removes every entry with the given id. Returns true if anything was removed.
pub fn remove_by_id<T: Identified>(collection: &mut Vec<T>, id: &str) -> bool {
    let before = collection.len();
    collection.retain(|r| r.id() != id);
    collection.len() != before
}

/// Scalar variant: a fetched value replaces the current one, nothing keeps it.
pub fn merge_scalar<T>(existing: Option<T>, incoming: Option<T>) -> Option<T> {
    incoming.or(existing)
}
