//! Strongly-typed identifiers and the identity-by-id helper.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique [`RunnableId`] allocation.
static RUNNABLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique per-process identifier for a runnable worker.
///
/// Allocated from a monotonic atomic counter via [`RunnableId::next`].
/// Two distinct runnables always have different IDs, even if they execute
/// steps with the same name. Equality and ordering of runnables is defined
/// by this ID alone; names are for humans and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RunnableId(u64);

impl RunnableId {
    /// Allocate a fresh, unique runnable ID.
    ///
    /// Each call returns an ID that has never been returned before within
    /// this process. Thread-safe.
    pub fn next() -> Self {
        Self(RUNNABLE_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numeric value, for logs and FFI-adjacent callers.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RunnableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing per-worker iteration counter.
///
/// Incremented each time a worker begins an iteration of its step,
/// including iterations that are later skipped by a failed resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IterationId(pub u64);

impl IterationId {
    /// The next iteration ID.
    pub fn successor(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for IterationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Capability trait for anything carrying a stable runnable identity.
///
/// Replaces inherited equality-by-id behavior with an explicit capability
/// plus the [`same_runnable`] helper: implementors expose their ID, and
/// identity comparison is a free function rather than a default method.
pub trait Identified {
    /// The stable numeric identity of this runnable.
    fn runnable_id(&self) -> RunnableId;
}

/// Whether two identified values denote the same runnable.
pub fn same_runnable(a: &dyn Identified, b: &dyn Identified) -> bool {
    a.runnable_id() == b.runnable_id()
}
