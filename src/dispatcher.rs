//! # Deferred Action Dispatcher
//!
//! Serializes every cache mutation and store call onto one consumer context,
//! no matter which thread observed the triggering event.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//! │  producer A  │ │  producer B  │ │  producer C  │   any thread
//! └──────┬───────┘ └──────┬───────┘ └──────┬───────┘
//!        │ enqueue        │ enqueue        │ enqueue   (never blocks)
//!        └────────────────┼────────────────┘
//!                         ▼
//!          ┌──────────────────────────────┐
//!          │ crossbeam unbounded channel  │   FIFO of arrival
//!          └──────────────┬───────────────┘
//!                         │ drain(ctx), once per tick
//!                         ▼
//!          ┌──────────────────────────────┐
//!          │   Dispatcher (sole owner)    │   runs actions one at a time
//!          │   &mut C  ── cache, store    │
//!          └──────────────────────────────┘
//! ```
//!
//! ## Rust Pattern: Ownership as the Single-Consumer Guarantee
//!
//! [`Dispatcher`] is not `Clone`, and [`Dispatcher::drain`] takes `&mut self`
//! together with `&mut C`. Whoever owns the dispatcher and the context *is*
//! the consumer context; the borrow checker rules out a second concurrent
//! drain. Producers only ever hold a [`DispatchHandle`], which can enqueue and
//! nothing else.
//!
//! ## Actions Take the Context as an Argument
//!
//! An action is a boxed `FnOnce(&mut C)`. Everything it needs from the
//! producer side (identity, name, delta) is moved into the closure by value at
//! enqueue time; the mutable state it works on is lent to it by the consumer
//! when it runs. There is no ambient or static state.
//!
//! ## Drain Semantics
//!
//! - The number of queued actions is sampled when `drain` starts; at most that
//!   many run. Actions enqueued during the drain wait for the next tick.
//! - Each action runs to completion before the next starts.
//! - An action that returns `Err` or panics is logged and counted; the drain
//!   continues with the next action.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::types::Identity;

// =============================================================================
// Actions
// =============================================================================

/// The body of a deferred action.
pub type ActionFn<C> = Box<dyn FnOnce(&mut C) -> Result<()> + Send + 'static>;

/// A queued unit of work plus the context used to diagnose it.
pub struct Action<C> {
    /// Short action kind, e.g. `"kill"` or `"flush"`.
    pub label: &'static str,
    /// Identity the action concerns, when there is one.
    pub identity: Option<Identity>,
    run: ActionFn<C>,
}

impl<C> Action<C> {
    pub fn new<F>(label: &'static str, identity: Option<Identity>, run: F) -> Self
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        Self {
            label,
            identity,
            run: Box::new(run),
        }
    }
}

// =============================================================================
// Shared State
// =============================================================================

#[derive(Debug, Default)]
struct Shared {
    closed: AtomicBool,
    dropped: AtomicU64,
}

/// Creates a connected producer handle and consumer.
pub fn channel<C>() -> (DispatchHandle<C>, Dispatcher<C>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    let shared = Arc::new(Shared::default());

    let handle = DispatchHandle {
        tx: tx.clone(),
        shared: Arc::clone(&shared),
    };
    let dispatcher = Dispatcher { tx, rx, shared };
    (handle, dispatcher)
}

// =============================================================================
// Producer Side
// =============================================================================

/// Producer-side handle. Cheap to clone, safe to use from any thread.
pub struct DispatchHandle<C> {
    tx: Sender<Action<C>>,
    shared: Arc<Shared>,
}

impl<C> Clone for DispatchHandle<C> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C> DispatchHandle<C> {
    /// Queues an action for the next drain.
    ///
    /// Never blocks and never fails. After the dispatcher has been closed the
    /// action is dropped and a warning is logged.
    pub fn enqueue(&self, action: Action<C>) {
        if self.shared.closed.load(Ordering::Acquire) {
            self.drop_action(&action);
            return;
        }
        if let Err(rejected) = self.tx.send(action) {
            // Receiver gone: the consumer was torn down.
            self.drop_action(&rejected.0);
        }
    }

    /// Convenience wrapper around [`enqueue`](Self::enqueue).
    pub fn submit<F>(&self, label: &'static str, identity: Option<Identity>, run: F)
    where
        F: FnOnce(&mut C) -> Result<()> + Send + 'static,
    {
        self.enqueue(Action::new(label, identity, run));
    }

    /// True once the consumer has started shutting down.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Number of actions rejected because the dispatcher was closed.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    fn drop_action(&self, action: &Action<C>) {
        self.shared.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(
            action = action.label,
            identity = ?action.identity.as_ref().map(Identity::as_str),
            "dispatcher closed, dropping action"
        );
    }
}

// =============================================================================
// Consumer Side
// =============================================================================

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Actions that completed with `Ok`.
    pub executed: usize,
    /// Actions that returned `Err` or panicked.
    pub failed: usize,
}

impl DrainReport {
    pub fn ran(&self) -> usize {
        self.executed + self.failed
    }

    fn absorb(&mut self, other: DrainReport) {
        self.executed += other.executed;
        self.failed += other.failed;
    }
}

/// The single consumer. Owned by whoever drives the tick.
pub struct Dispatcher<C> {
    tx: Sender<Action<C>>,
    rx: Receiver<Action<C>>,
    shared: Arc<Shared>,
}

impl<C> Dispatcher<C> {
    /// A new producer handle onto this dispatcher's queue.
    pub fn handle(&self) -> DispatchHandle<C> {
        DispatchHandle {
            tx: self.tx.clone(),
            shared: Arc::clone(&self.shared),
        }
    }

    /// Actions currently waiting.
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Runs the actions that were queued when this call started, in FIFO order.
    pub fn drain(&mut self, ctx: &mut C) -> DrainReport {
        let budget = self.rx.len();
        let mut report = DrainReport::default();

        for _ in 0..budget {
            let Ok(action) = self.rx.try_recv() else {
                break;
            };
            match run_isolated(action, ctx) {
                Ok(()) => report.executed += 1,
                Err(_) => report.failed += 1,
            }
        }

        if report.ran() > 0 {
            debug!(executed = report.executed, failed = report.failed, "drained actions");
        }
        report
    }

    /// Stops accepting new actions. Already-queued actions are kept.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Closes the queue and drains until it is empty.
    ///
    /// Used at shutdown so that nothing accepted before the close is lost.
    pub fn close_and_drain(&mut self, ctx: &mut C) -> DrainReport {
        self.close();
        let mut total = DrainReport::default();
        while !self.rx.is_empty() {
            total.absorb(self.drain(ctx));
        }
        total
    }
}

/// Runs one action, converting errors and panics into a logged `Err`.
fn run_isolated<C>(action: Action<C>, ctx: &mut C) -> Result<()> {
    let Action {
        label,
        identity,
        run,
    } = action;

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(ctx)));
    let err = match outcome {
        Ok(Ok(())) => return Ok(()),
        Ok(Err(e)) => e,
        Err(payload) => Error::ActionPanicked {
            label,
            message: panic_message(payload.as_ref()),
        },
    };

    error!(
        action = label,
        identity = ?identity.as_ref().map(Identity::as_str),
        error = %err,
        "deferred action failed"
    );
    Err(err)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================
