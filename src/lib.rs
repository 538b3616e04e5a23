//! # roundstats - Per-Player Gameplay Statistics
//!
//! roundstats turns a stream of game events (kills, damage, round ends,
//! connects, disconnects) into durable per-player aggregates:
//!
//! - **Single-writer mutation**: every cache change and store call runs on one
//!   consumer context, fed by a lock-free queue
//! - **Lazy hydration**: a player's stored totals are read on first touch
//! - **Additive persistence**: only pending deltas are merge-upserted, so a
//!   flush never double-counts
//! - **Table-driven categories**: raw weapon names map to canonical buckets
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Event Source (any thread)                      │
//! │              StatsHandle::submit(GameEvent)                     │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ enqueue (never blocks)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Dispatcher (consumer tick)                     │
//! │                                                                 │
//! │  ┌─────────────┐  ┌─────────────────────┐  ┌─────────────────┐ │
//! │  │ FIFO drain  │  │ StatsCache          │  │ Session roster  │ │
//! │  │ per tick    │  │ total + pending     │  │ flush policy    │ │
//! │  └─────────────┘  └─────────────────────┘  └─────────────────┘ │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ merge_upsert(pending delta)
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         SQLite                                  │
//! │            player_stats + weapon_stats (additive)               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Single consumer**: only the tick that owns the [`Dispatcher`] mutates
//!    the cache or touches the store
//! 2. **FIFO per producer**: actions from one producer run in enqueue order
//! 3. **No double count**: a pending delta is retired only after the store
//!    confirmed it, and only by exactly the amount written
//! 4. **Never lose silently**: a failed write keeps the delta; a failed final
//!    flush is an error
//!
//! ## Module Organization
//!
//! - [`error`]: Error enum for all failure modes
//! - [`types`]: Identity, counter names, deltas
//! - [`category`]: Weapon and hit-location normalization
//! - [`record`]: Aggregate records and counter arithmetic
//! - [`dispatcher`]: Deferred action queue
//! - [`cache`]: Aggregation cache with pending-delta tracking
//! - [`store`]: Merge-upsert store and its SQLite implementation
//! - [`tracker`]: Event translation and flush policy
//! - [`config`]: JSON configuration
//! - [`logging`]: Tracing subscriber setup

// =============================================================================
// Module Declarations
// =============================================================================

/// Error types for roundstats operations.
///
/// A single error enum keeps handling uniform across the cache, the store and
/// the binary.
pub mod error;

/// Domain types: identities, counter names and the deltas applied to them.
pub mod types;

/// Weapon category table and hit-location classification.
///
/// Both normalizers are total: unknown input maps to a fallback, never to an
/// error.
pub mod category;

/// Aggregate records.
pub mod record;

/// Deferred action dispatcher.
///
/// Producers enqueue boxed closures from any thread; the consumer runs them
/// in FIFO order, once per tick, with per-action fault isolation.
pub mod dispatcher;

/// Stats aggregation cache.
///
/// Keeps a running total and a pending delta per identity. The pending delta
/// is what gets persisted.
pub mod cache;

/// Merge-upsert store.
///
/// The [`StatsStore`](store::StatsStore) trait plus a SQLite implementation
/// whose writes add to stored counters instead of overwriting them.
pub mod store;

/// Game events, their translation into increments, and the tracker runner.
///
/// The main entry point is [`Tracker`](tracker::Tracker).
pub mod tracker;

/// Tracker configuration.
pub mod config;

/// Tracing subscriber installation.
pub mod logging;

// =============================================================================
// Re-exports
// =============================================================================

pub use cache::StatsCache;
pub use category::{classify_hit_location, normalize, WeaponCategory};
pub use config::TrackerConfig;
pub use dispatcher::{DispatchHandle, Dispatcher, DrainReport};
pub use error::{Error, Result};
pub use record::AggregateRecord;
pub use store::{Database, SqliteStore, StatsStore};
pub use tracker::{GameEvent, PlayerRef, StatsHandle, Tracker};

pub use types::{HitLocation, Identity, InteractionKind, ScalarField, StatDelta};
