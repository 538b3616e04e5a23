//! # Stats Aggregation Cache
//!
//! The mutation surface for aggregate records. Hides lazy hydration from the
//! store and, more importantly, keeps persistence additive-safe.
//!
//! ## Two Records Per Identity
//!
//! ```text
//!                 increment(+1 kill)
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!   ┌──────────────┐           ┌──────────────┐
//!   │ running total│           │ pending delta│ ──flush──► merge_upsert
//!   │ (answers     │           │ (not yet in  │            │
//!   │  queries)    │           │  the store)  │ ◄─subtract─┘ on Ok only
//!   └──────────────┘           └──────────────┘
//! ```
//!
//! Every increment lands in both. A flush submits a copy of the pending delta
//! and subtracts exactly that copy once the store confirms the write. A failed
//! write leaves the delta in place for the next flush. A second flush with no
//! new increments finds a zero delta and writes nothing.
//!
//! ## Hydration
//!
//! The first touch of an identity loads its stored row and adopts it as the
//! running total. When that load fails the record starts from zero and is
//! marked unhydrated; increments still accumulate in the pending delta, and a
//! later successful load sets the total to `stored + pending`.
//!
//! ## Idle Records
//!
//! A disconnected identity whose delta is fully persisted can be demoted to a
//! bounded LRU. A reconnect within the LRU's window reuses the record instead
//! of reading the store again.
//!
//! ## Ownership
//!
//! `StatsCache` owns its map and its store. It is not `Sync`-shared: the
//! consumer context holds it by value and the dispatcher lends it to actions.

use std::collections::hash_map::Entry as MapEntry;
use std::collections::HashMap;
use std::num::NonZeroUsize;

use chrono::Utc;
use lru::LruCache;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::record::AggregateRecord;
use crate::store::StatsStore;
use crate::types::{Identity, StatDelta};

/// Idle records kept after disconnect.
pub const DEFAULT_IDLE_CAPACITY: usize = 256;

// =============================================================================
// Entry
// =============================================================================

#[derive(Debug, Clone)]
struct Entry {
    total: AggregateRecord,
    pending: AggregateRecord,
    /// False while the stored row could not be read yet.
    hydrated: bool,
}

impl Entry {
    fn fresh(identity: &Identity, name: String, hydrated: bool) -> Self {
        Self {
            total: AggregateRecord::new(identity.clone(), name.clone()),
            pending: AggregateRecord::new(identity.clone(), name),
            hydrated,
        }
    }

    fn from_stored(stored: AggregateRecord) -> Self {
        let pending = AggregateRecord::new(stored.identity.clone(), stored.display_name.clone());
        Self {
            total: stored,
            pending,
            hydrated: true,
        }
    }

    fn rename(&mut self, name: &str) {
        if !name.is_empty() && self.total.display_name != name {
            self.total.display_name = name.to_string();
            self.pending.display_name = name.to_string();
        }
    }

    /// Adopts a freshly loaded stored row underneath the pending delta.
    fn adopt(&mut self, stored: Option<AggregateRecord>) {
        if let Some(mut stored) = stored {
            stored.display_name = self.total.display_name.clone();
            stored.merge(&self.pending);
            stored.last_updated = self.total.last_updated.max(stored.last_updated);
            self.total = stored;
        }
        self.hydrated = true;
    }
}

// =============================================================================
// Flush Summary
// =============================================================================

/// Result of flushing several identities.
#[derive(Debug, Default)]
pub struct FlushSummary {
    /// Identities whose delta was written.
    pub written: usize,
    /// Identities that had nothing pending.
    pub clean: usize,
    /// Identities skipped because no display name could be resolved.
    pub skipped: usize,
    /// Identities whose write failed; their delta is retained.
    pub failed: Vec<(Identity, Error)>,
}

impl FlushSummary {
    pub fn is_ok(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, identity: &Identity, outcome: Result<bool>) {
        match outcome {
            Ok(true) => self.written += 1,
            Ok(false) => self.clean += 1,
            Err(e) => self.failed.push((identity.clone(), e)),
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Per-identity running totals with pending-delta tracking.
pub struct StatsCache<S> {
    store: S,
    entries: HashMap<Identity, Entry>,
    idle: LruCache<Identity, AggregateRecord>,
}

impl<S: StatsStore> StatsCache<S> {
    pub fn new(store: S) -> Self {
        let cap = NonZeroUsize::new(DEFAULT_IDLE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self::with_idle_capacity(store, cap)
    }

    pub fn with_idle_capacity(store: S, idle_capacity: NonZeroUsize) -> Self {
        Self {
            store,
            entries: HashMap::new(),
            idle: LruCache::new(idle_capacity),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Number of resident (non-idle) records.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn idle_len(&self) -> usize {
        self.idle.len()
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.entries.contains_key(identity)
    }

    pub fn is_hydrated(&self, identity: &Identity) -> bool {
        self.entries.get(identity).is_some_and(|e| e.hydrated)
    }

    // -------------------------------------------------------------------------
    // GetOrCreate / Increment
    // -------------------------------------------------------------------------

    /// Returns the running total for `identity`, loading or creating it first.
    ///
    /// A non-empty `name_hint` replaces the display name. An unhydrated record
    /// retries its load here.
    pub fn get_or_create(&mut self, identity: &Identity, name_hint: &str) -> &AggregateRecord {
        let needs_retry = self.entries.get(identity).is_some_and(|e| !e.hydrated);
        if needs_retry {
            match self.store.load(identity) {
                Ok(stored) => {
                    if let Some(entry) = self.entries.get_mut(identity) {
                        entry.adopt(stored);
                        debug!(identity = %identity, "late hydration succeeded");
                    }
                }
                Err(e) => warn!(identity = %identity, error = %e, "hydration retry failed"),
            }
        }

        let entry = self.entry(identity, name_hint);
        entry.rename(name_hint);
        &entry.total
    }

    /// Applies one increment, creating the record if absent.
    ///
    /// In-memory only. The increment is visible in the running total and the
    /// pending delta at once.
    pub fn increment(&mut self, identity: &Identity, name_hint: &str, delta: StatDelta) {
        let entry = self.entry(identity, name_hint);
        entry.rename(name_hint);
        entry.total.apply(delta);
        entry.pending.apply(delta);
        let now = Utc::now();
        entry.total.last_updated = now;
        entry.pending.last_updated = now;
    }

    /// Resident entry for `identity`, creating it on first touch.
    fn entry(&mut self, identity: &Identity, name_hint: &str) -> &mut Entry {
        match self.entries.entry(identity.clone()) {
            MapEntry::Occupied(slot) => slot.into_mut(),
            MapEntry::Vacant(slot) => {
                slot.insert(Self::create(&mut self.store, &mut self.idle, identity, name_hint))
            }
        }
    }

    fn create(
        store: &mut S,
        idle: &mut LruCache<Identity, AggregateRecord>,
        identity: &Identity,
        name_hint: &str,
    ) -> Entry {
        if let Some(record) = idle.pop(identity) {
            debug!(identity = %identity, "reusing idle record");
            return Entry::from_stored(record);
        }

        let name = if name_hint.is_empty() {
            identity.to_string()
        } else {
            name_hint.to_string()
        };

        match store.load(identity) {
            Ok(Some(stored)) => {
                debug!(identity = %identity, "hydrated from store");
                Entry::from_stored(stored)
            }
            Ok(None) => Entry::fresh(identity, name, true),
            Err(e) => {
                warn!(identity = %identity, error = %e, "load failed, starting unhydrated");
                Entry::fresh(identity, name, false)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Snapshots
    // -------------------------------------------------------------------------

    /// A point-in-time copy of the running total.
    pub fn snapshot(&self, identity: &Identity) -> Option<AggregateRecord> {
        self.entries.get(identity).map(|e| e.total.clone())
    }

    /// Copies of every resident record whose name `resolve` can supply.
    ///
    /// Identities `resolve` returns `None` for are left out.
    pub fn snapshot_all<F>(&self, resolve: F) -> HashMap<Identity, AggregateRecord>
    where
        F: Fn(&Identity) -> Option<String>,
    {
        self.entries
            .iter()
            .filter_map(|(id, entry)| {
                let name = resolve(id)?;
                let mut copy = entry.total.clone();
                copy.display_name = name;
                Some((id.clone(), copy))
            })
            .collect()
    }

    /// A copy of the increments not yet persisted.
    pub fn pending_delta(&self, identity: &Identity) -> Option<AggregateRecord> {
        self.entries.get(identity).map(|e| e.pending.clone())
    }

    // -------------------------------------------------------------------------
    // Flushing
    // -------------------------------------------------------------------------

    /// Merge-upserts the pending delta of one identity.
    ///
    /// Returns `Ok(true)` when something was written and `Ok(false)` when
    /// there was nothing to write. On `Err` the delta is kept.
    pub fn flush(&mut self, identity: &Identity) -> Result<bool> {
        let Some(entry) = self.entries.get_mut(identity) else {
            return Ok(false);
        };
        if entry.pending.is_zero() {
            return Ok(false);
        }

        let mut delta = entry.pending.clone();
        delta.display_name = entry.total.display_name.clone();
        delta.last_updated = Utc::now();

        if let Err(e) = self.store.merge_upsert(&delta) {
            warn!(identity = %identity, error = %e, "flush failed, keeping pending delta");
            return Err(e);
        }

        entry.pending.subtract(&delta);
        entry.total.last_updated = delta.last_updated;

        if !entry.hydrated {
            // The store now holds stored + delta; reading it back gives the
            // exact running total.
            match self.store.load(identity) {
                Ok(stored) => {
                    entry.adopt(stored);
                    debug!(identity = %identity, "hydrated after flush");
                }
                Err(e) => warn!(identity = %identity, error = %e, "hydration after flush failed"),
            }
        }

        debug!(identity = %identity, "flushed pending delta");
        Ok(true)
    }

    /// Flushes the given identities one by one. Failures do not stop the rest.
    pub fn flush_many<'a, I>(&mut self, identities: I) -> FlushSummary
    where
        I: IntoIterator<Item = &'a Identity>,
    {
        let mut summary = FlushSummary::default();
        for id in identities {
            let outcome = self.flush(id);
            summary.record(id, outcome);
        }
        summary
    }

    /// Flushes every resident identity whose name `resolve` can supply, using
    /// the resolved name as the stored display name.
    pub fn flush_all<F>(&mut self, resolve: F) -> FlushSummary
    where
        F: Fn(&Identity) -> Option<String>,
    {
        let mut resolved = Vec::new();
        let mut skipped = 0;
        for id in self.entries.keys() {
            match resolve(id) {
                Some(name) => resolved.push((id.clone(), name)),
                None => skipped += 1,
            }
        }

        for (id, name) in &resolved {
            if let Some(entry) = self.entries.get_mut(id) {
                entry.rename(name);
            }
        }

        let mut summary = self.flush_many(resolved.iter().map(|(id, _)| id));
        summary.skipped = skipped;
        summary
    }

    /// Flushes every resident identity with its cached name.
    ///
    /// Used at shutdown. Any failure becomes [`Error::FlushFailed`].
    pub fn flush_everything(&mut self) -> Result<usize> {
        let ids: Vec<Identity> = self.entries.keys().cloned().collect();
        let summary = self.flush_many(&ids);

        match summary.failed.first() {
            None => Ok(summary.written),
            Some((_, first)) => Err(Error::FlushFailed {
                failed: summary.failed.len(),
                first: first.to_string(),
            }),
        }
    }

    // -------------------------------------------------------------------------
    // Eviction / Reset
    // -------------------------------------------------------------------------

    /// Drops a resident record once nothing is pending.
    ///
    /// A hydrated record moves to the idle LRU; an unhydrated one is simply
    /// forgotten. Returns `false` and keeps the record when a delta remains.
    pub fn evict_or_demote(&mut self, identity: &Identity) -> bool {
        let Some(entry) = self.entries.get(identity) else {
            return true;
        };
        if !entry.pending.is_zero() {
            return false;
        }

        if let Some(entry) = self.entries.remove(identity) {
            if entry.hydrated {
                self.idle.put(identity.clone(), entry.total);
            }
        }
        true
    }

    /// Deletes the stored row and zeroes any cached state for `identity`.
    ///
    /// A resident record stays resident with zero totals and no pending
    /// delta, so later increments start from zero. Returns whether a stored
    /// row existed.
    pub fn reset(&mut self, identity: &Identity) -> Result<bool> {
        let existed = self.store.reset(identity)?;
        self.idle.pop(identity);
        if let Some(entry) = self.entries.get_mut(identity) {
            let name = entry.total.display_name.clone();
            *entry = Entry::fresh(identity, name, true);
        }
        Ok(existed)
    }
}

// =============================================================================
// Tests
// =============================================================================
