//! # Merge-Upsert Store
//!
//! Durable, additive persistence for aggregate records.
//!
//! ## Merge-Upsert, Not Overwrite-Upsert
//!
//! ```text
//!   stored row            delta submitted           stored row after
//!   kills = 5      +      kills = 3          =      kills = 8
//!   (absent)       +      kills = 3          =      kills = 3
//! ```
//!
//! [`StatsStore::merge_upsert`] *adds* the submitted counters to whatever is
//! stored. That makes the caller responsible for submitting only what has not
//! been persisted yet. The cache enforces this by construction: it keeps a
//! separate pending-delta record per identity, submits that, and retires it
//! only after the write is confirmed. See [`crate::cache`].
//!
//! The display name and timestamp are the only overwritten values.

use crate::error::Result;
use crate::record::AggregateRecord;
use crate::types::{Identity, ScalarField};

pub mod schema;
mod sqlite;

pub use schema::Database;
pub use sqlite::SqliteStore;

/// The store operations the cache and the query commands need.
///
/// Methods take `&mut self`: a store is owned by the consumer context and
/// is never shared.
pub trait StatsStore {
    /// Reads one identity's stored record.
    fn load(&mut self, identity: &Identity) -> Result<Option<AggregateRecord>>;

    /// Inserts `delta` if the identity has no row, otherwise adds every counter
    /// of `delta` to the stored counters and overwrites the display name.
    ///
    /// Atomic per record: either every counter lands or none does.
    fn merge_upsert(&mut self, delta: &AggregateRecord) -> Result<()>;

    /// Stored records ordered by `field`, highest first.
    fn top(&mut self, field: ScalarField, limit: usize) -> Result<Vec<AggregateRecord>>;

    /// Deletes an identity's stored record. Returns whether one existed.
    fn reset(&mut self, identity: &Identity) -> Result<bool>;
}
