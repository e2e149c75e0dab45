//! Records, identifiers, shape mapping and the dedup merge.

pub mod ids;
pub mod merge;
pub mod model;
pub mod normalize;

#[cfg(test)]
mod tests;

pub use ids::{ensure_id, new_record_id};
pub use merge::{merge, merge_scalar, remove_by_id, upsert, UpsertOutcome};
pub use model::{
    EntityKind, Identified, Record, SavingsBalance, SavingsHistoryEntry, Transaction,
};
pub use normalize::{to_internal, to_remote, RemoteRow};
