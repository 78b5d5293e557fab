//! Versioned, lockable value hand-off between pipeline stages.
//!
//! A [`SyncBuffer`] holds at most one value of type `T` together with a
//! monotonically increasing version counter. A single producer writes
//! under overwrite-or-drop semantics with an optional write-skip throttle;
//! any number of consumers read it, each under its own
//! [`Consumption`] policy with per-consumer [`ReadCursor`] bookkeeping, so
//! consumption never removes the value for anyone else.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tactus_core::policy::Consumption;
use tactus_core::ResolveError;

/// Upper bound on one condvar wait inside a guarded read.
///
/// Only buffer writes signal the condvar, so a blocked reader re-checks
/// its caller's `keep_waiting` predicate at least this often. Bounds how
/// long a stopped or disposed consumer can stay parked in a read.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Result of a write attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The value replaced the slot contents; the version advanced by 1.
    Applied {
        /// The new version.
        version: u64,
    },
    /// Dropped by the write-skip throttle; the previous version stands.
    Throttled,
    /// The slot was occupied and overwrite was disabled; dropped silently.
    Occupied,
}

impl WriteOutcome {
    /// Whether the write was applied.
    pub fn applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// A successfully resolved read.
#[derive(Clone, Debug)]
pub struct ReadReceipt<T> {
    /// The captured value.
    pub value: T,
    /// The version at which the value was captured.
    pub version: u64,
    /// Time spent blocked waiting for a satisfying version.
    pub waited: Duration,
}

/// Per-consumer read bookkeeping.
///
/// Lives with the consumer's prerequisite, not the buffer: consumption is
/// bookkeeping about what this consumer has seen, never value removal.
#[derive(Clone, Debug, Default)]
pub struct ReadCursor {
    /// Last version this consumer consumed (`consume = true` reads only).
    /// On-change waits compare against this.
    consumed: Option<u64>,
    /// Last version served to this consumer, consumed or not.
    last_served: Option<u64>,
    /// Consecutive reads served the same version (1-based).
    serves: u32,
    /// Consecutive stale reads since the last fresh version.
    stale_strikes: u32,
}

impl ReadCursor {
    /// A fresh cursor that has seen nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything, as on a runnable restart.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Last version this consumer consumed, if any.
    pub fn consumed_version(&self) -> Option<u64> {
        self.consumed
    }
}

/// Interior state, guarded by the buffer's mutex.
#[derive(Debug)]
struct Inner<T> {
    /// Current value; `None` until the first applied write.
    slot: Option<T>,
    /// Increments by exactly 1 on every applied write.
    version: u64,
    /// Write-skip throttle: remaining writes to drop. Charged lazily on
    /// the first throttled write so `skip = n` drops the first `n` writes.
    throttle: Option<u32>,
}

/// A named, versioned, guarded holder of a value of type `T`.
///
/// Single-writer-at-a-time per buffer (writes are totally ordered by
/// version), multi-consumer. The value/version pair is the only state
/// shared across workers; all access goes through the internal guard.
#[derive(Debug)]
pub struct SyncBuffer<T> {
    name: String,
    inner: Mutex<Inner<T>>,
    changed: Condvar,
}

// Compile-time assertion: SyncBuffer must be Send + Sync for Send values.
const _: fn() = || {
    fn assert<T: Send + Sync>() {}
    assert::<SyncBuffer<Vec<f32>>>();
};

impl<T: Clone> SyncBuffer<T> {
    /// Create an empty buffer. The name appears in diagnostics and errors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner {
                slot: None,
                version: 0,
                throttle: None,
            }),
            changed: Condvar::new(),
        }
    }

    /// The buffer's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Write a value under the overwrite/skip policy.
    ///
    /// With `skip = n`, `n` writes are dropped between applied ones (the
    /// first `n` writes are dropped). An applied write replaces the slot,
    /// advances the version by exactly 1, and wakes all blocked on-change
    /// readers. With `overwrite = false` a write to an occupied slot is
    /// dropped silently.
    pub fn write(&self, value: T, overwrite: bool, skip: u32) -> WriteOutcome {
        let mut inner = self.inner.lock().unwrap();
        if skip > 0 {
            let left = inner.throttle.get_or_insert(skip);
            if *left > 0 {
                *left -= 1;
                return WriteOutcome::Throttled;
            }
            *left = skip;
        }
        if inner.slot.is_some() && !overwrite {
            return WriteOutcome::Occupied;
        }
        inner.slot = Some(value);
        inner.version += 1;
        let version = inner.version;
        drop(inner);
        self.changed.notify_all();
        WriteOutcome::Applied { version }
    }

    /// Read under `policy`, waiting at most `policy.read_timeout`.
    pub fn read(
        &self,
        policy: &Consumption,
        cursor: &mut ReadCursor,
    ) -> Result<ReadReceipt<T>, ResolveError> {
        self.read_within(policy, cursor, policy.read_timeout)
    }

    /// Read under `policy` with an explicit wait budget.
    ///
    /// Prerequisite resolution narrows the wait to the minimum of the
    /// policy's own timeout and the step's remaining overall deadline.
    pub fn read_within(
        &self,
        policy: &Consumption,
        cursor: &mut ReadCursor,
        budget: Option<Duration>,
    ) -> Result<ReadReceipt<T>, ResolveError> {
        self.read_while(policy, cursor, budget, || true)
    }

    /// Read under `policy`, waiting only while `keep_waiting` holds.
    ///
    /// The wait is sliced so the predicate is re-checked regularly even
    /// though only writes signal the condvar; a
    /// predicate gone false surfaces as [`ResolveError::Interrupted`].
    /// Workers pass their lifecycle state here so an unbounded read
    /// cannot outlive a stop or dispose.
    pub fn read_while(
        &self,
        policy: &Consumption,
        cursor: &mut ReadCursor,
        budget: Option<Duration>,
        keep_waiting: impl Fn() -> bool,
    ) -> Result<ReadReceipt<T>, ResolveError> {
        if policy.allow_dirty {
            return self.read_dirty();
        }

        let start = Instant::now();
        let mut inner = self.inner.lock().unwrap();
        let (value, version) = loop {
            match &inner.slot {
                Some(value) if !(policy.on_change && cursor.consumed == Some(inner.version)) => {
                    break (value.clone(), inner.version);
                }
                // Either the buffer is empty or this consumer has already
                // consumed the current version; wait for a change signal.
                _ => {}
            }
            if !keep_waiting() {
                return Err(ResolveError::Interrupted {
                    buffer: self.name.clone(),
                });
            }
            let slice = match budget {
                None => WAIT_SLICE,
                Some(total) => {
                    let Some(remaining) = total.checked_sub(start.elapsed()) else {
                        return Err(ResolveError::Timeout {
                            buffer: self.name.clone(),
                            waited: start.elapsed(),
                        });
                    };
                    remaining.min(WAIT_SLICE)
                }
            };
            let (guard, _timeout) = self.changed.wait_timeout(inner, slice).unwrap();
            inner = guard;
        };
        drop(inner);
        let waited = start.elapsed();

        // Reuse accounting: how many consecutive reads this version has
        // satisfied, and how many stale serves have been skipped since
        // the last fresh version.
        if cursor.last_served == Some(version) {
            cursor.serves = cursor.serves.saturating_add(1);
        } else {
            cursor.last_served = Some(version);
            cursor.serves = 1;
            cursor.stale_strikes = 0;
        }
        if !policy.reuse_budget.permits(cursor.serves) {
            cursor.stale_strikes = cursor.stale_strikes.saturating_add(1);
            return if cursor.stale_strikes > policy.reuse_tolerance {
                Err(ResolveError::StaleExhausted {
                    buffer: self.name.clone(),
                    version,
                    strikes: cursor.stale_strikes,
                })
            } else {
                Err(ResolveError::Stale {
                    buffer: self.name.clone(),
                    version,
                    serves: cursor.serves,
                })
            };
        }

        if policy.consume {
            cursor.consumed = Some(version);
        }
        Ok(ReadReceipt {
            value,
            version,
            waited,
        })
    }

    /// Best-effort sample: no waiting, no consumption, no timeout.
    ///
    /// The guard is held only for the duration of the clone, so this
    /// cannot observe a value mid-write; what the dirty policy gives up
    /// is ordering and freshness, not integrity.
    fn read_dirty(&self) -> Result<ReadReceipt<T>, ResolveError> {
        let inner = self.inner.lock().unwrap();
        match &inner.slot {
            Some(value) => Ok(ReadReceipt {
                value: value.clone(),
                version: inner.version,
                waited: Duration::ZERO,
            }),
            None => Err(ResolveError::NeverWritten {
                buffer: self.name.clone(),
            }),
        }
    }

    /// Non-consuming sample of the current value and version.
    pub fn peek(&self) -> Option<(T, u64)> {
        let inner = self.inner.lock().unwrap();
        inner.slot.as_ref().map(|v| (v.clone(), inner.version))
    }

    /// The current version (0 until the first applied write).
    pub fn version(&self) -> u64 {
        self.inner.lock().unwrap().version
    }

    /// Whether no write has ever been applied.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().slot.is_none()
    }
}
