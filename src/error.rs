//! # Error Handling for roundstats
//!
//! This module defines the error types used throughout the crate. A single
//! error enum ([`Error`]) represents every failure mode, which keeps function
//! signatures short and lets callers match uniformly.
//!
//! ## Rust Pattern: thiserror
//!
//! We use the `thiserror` crate to derive `std::error::Error` implementations:
//! - `Display` comes from the `#[error(...)]` attributes
//! - `From` conversions come from `#[from]`, so `?` converts driver errors
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Transient store | SQLite busy, disk full | Log, keep pending delta, retry on next flush |
//! | Action failure | Panic or error inside a dispatched action | Log, continue draining |
//! | Shutdown loss | Final flush could not persist everything | Surface loudly, non-zero exit |
//! | Setup | Bad config file, schema mismatch | Refuse to start |
//!
//! Producers never see any of these: enqueueing cannot fail.

use std::path::PathBuf;

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in roundstats operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Store Errors (transient; pending deltas are retained)
    // =========================================================================

    /// SQLite operation failed.
    ///
    /// # When This Happens
    ///
    /// Wraps any error from the `rusqlite` crate: the database file is locked,
    /// the disk is full, the file is corrupted. During a flush this is treated
    /// as transient: the identity's pending delta stays in memory and the next
    /// flush retries it.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Schema version mismatch.
    ///
    /// Opening a database written by a newer, incompatible layout.
    #[error("schema error: {0}")]
    Schema(String),

    /// A query named a stat column that does not exist.
    #[error("unknown stat field '{0}'")]
    UnknownField(String),

    // =========================================================================
    // Dispatcher Errors (caught per action, never abort a drain)
    // =========================================================================

    /// A dispatched action panicked while running on the consumer context.
    ///
    /// The dispatcher catches the unwind, logs this error with the action's
    /// label, and moves on to the next action.
    #[error("action '{label}' panicked: {message}")]
    ActionPanicked {
        /// Short label of the action kind (e.g. `"kill"`)
        label: &'static str,
        /// Panic payload, when it was a string
        message: String,
    },

    // =========================================================================
    // Shutdown Errors (real data loss)
    // =========================================================================

    /// The final flush failed for at least one identity.
    ///
    /// Returned only at shutdown, where no later flush will retry the pending
    /// deltas. The binary maps this to a non-zero exit status.
    #[error("final flush failed for {failed} identities; first failure: {first}")]
    FlushFailed {
        /// Number of identities whose pending delta could not be persisted
        failed: usize,
        /// Rendered message of the first failure
        first: String,
    },

    // =========================================================================
    // Setup Errors
    // =========================================================================

    /// Configuration file could not be read or parsed.
    #[error("invalid config at {}: {reason}", path.display())]
    Config {
        /// Path that was being loaded
        path: PathBuf,
        /// What went wrong
        reason: String,
    },

    /// Filesystem or stream I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================
