//! Consumption policy: how one step is allowed to read one buffer.

use std::fmt;
use std::time::Duration;

/// How many consecutive iterations one produced version may satisfy a
/// consumer before it is treated as stale.
///
/// `Serves(k)` allows the same version to be served `k + 1` consecutive
/// times (the original serve plus `k` reuses). `Unlimited` disables
/// staleness tracking entirely.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReuseBudget {
    /// The same version may be served forever.
    Unlimited,
    /// The same version may be reused this many additional times.
    Serves(u32),
}

impl ReuseBudget {
    /// Whether serving a version for the `serves`-th consecutive time
    /// (1-based) is still within budget.
    pub fn permits(self, serves: u32) -> bool {
        match self {
            Self::Unlimited => true,
            // Saturating: Serves(u32::MAX) must not wrap to "never".
            Self::Serves(k) => serves <= k.saturating_add(1),
        }
    }
}

impl Default for ReuseBudget {
    fn default() -> Self {
        Self::Unlimited
    }
}

impl fmt::Display for ReuseBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unlimited => write!(f, "unlimited"),
            Self::Serves(k) => write!(f, "{k}"),
        }
    }
}

/// Immutable descriptor of how one consumer reads one buffer.
///
/// Bound to exactly one (buffer, consumer) pair at wiring time; the
/// per-consumer read bookkeeping (last consumed version, reuse counts)
/// lives with the consumer, not the buffer, so multiple consumers of one
/// producer never contend on policy state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Consumption {
    /// `true`: a successful read marks the version as consumed, so future
    /// on-change waits by this consumer require a newer version. `false`:
    /// peek — the read leaves the version available.
    pub consume: bool,
    /// Block until the buffer's version differs from the last version this
    /// consumer consumed.
    pub on_change: bool,
    /// Sample the buffer without waiting: never blocks on a change, never
    /// consumes, never times out. Fails only if the buffer has never been
    /// written.
    pub allow_dirty: bool,
    /// Bounded wait for on-change or first-write; `None` = unbounded.
    pub read_timeout: Option<Duration>,
    /// How many additional iterations the same version may satisfy this
    /// consumer before being treated as stale.
    pub reuse_budget: ReuseBudget,
    /// Consecutive stale reads tolerated (each skipping the iteration)
    /// before resolution fails outright with a staleness-exhausted error.
    pub reuse_tolerance: u32,
    /// A failed optional input resolves to "absent" instead of skipping
    /// the whole iteration.
    pub optional: bool,
}

impl Default for Consumption {
    fn default() -> Self {
        Self {
            consume: false,
            on_change: false,
            allow_dirty: false,
            read_timeout: None,
            reuse_budget: ReuseBudget::Unlimited,
            reuse_tolerance: 0,
            optional: false,
        }
    }
}

impl Consumption {
    /// Exclusive consumer: waits for a fresh version and consumes it.
    ///
    /// The canonical policy for a stage that must see every hand-off from
    /// its producer exactly when it changes.
    pub fn exclusive() -> Self {
        Self {
            consume: true,
            on_change: true,
            ..Self::default()
        }
    }

    /// Shared observer: waits for changes but leaves them available.
    ///
    /// A fast poller with this policy observes every distinct version at
    /// least once without invalidating it for anyone.
    pub fn latest() -> Self {
        Self {
            consume: false,
            on_change: true,
            ..Self::default()
        }
    }

    /// Best-effort sampler: dirty read of whatever the producer currently
    /// holds. Suitable for staleness-tolerant consumers such as display
    /// rendering.
    pub fn sampled() -> Self {
        Self {
            allow_dirty: true,
            ..Self::default()
        }
    }

    /// Set a bounded read timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Set the reuse budget in additional serves of one version.
    pub fn with_reuse(mut self, serves: u32, tolerance: u32) -> Self {
        self.reuse_budget = ReuseBudget::Serves(serves);
        self.reuse_tolerance = tolerance;
        self
    }

    /// Mark this input as optional.
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Validate the policy at graph-construction time.
    ///
    /// A zero timeout would make every guarded read fail instantly, which
    /// is always a wiring mistake; dirty reads ignore timeouts, so a
    /// timeout combined with `allow_dirty` is flagged too.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(t) = self.read_timeout {
            if t.is_zero() {
                return Err("read_timeout must be nonzero".to_string());
            }
            if self.allow_dirty {
                return Err("read_timeout has no effect with allow_dirty".to_string());
            }
        }
        if self.allow_dirty && self.on_change {
            return Err("allow_dirty cannot wait on_change".to_string());
        }
        Ok(())
    }
}
