//! Frame/interval pacing with slip correction.
//!
//! A [`Pacer`] computes how long a periodic activity must wait before its
//! next iteration. Periodic mode preserves long-run phase by skipping
//! missed ticks rather than bursting to catch up; min-spacing mode only
//! guarantees a lower bound between consecutive calls.

use std::time::{Duration, Instant};

/// Wall-clock sleep granularity assumed for `thread::sleep`.
///
/// The pacer suspends for `wait - SCHEDULING_OVERHEAD` and covers the
/// remainder by yielding until the target, so sub-granularity intervals
/// still pace accurately.
pub const SCHEDULING_OVERHEAD: Duration = Duration::from_millis(15);

/// Pacing mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PaceMode {
    /// Fixed period; late arrivals skip whole missed intervals.
    Interval(Duration),
    /// Minimum spacing between consecutive calls; no phase preservation.
    MinSpacing(Duration),
    /// No pacing; `synchronize` returns immediately.
    Unpaced,
}

/// Computes and performs the wait before the next tick of a periodic
/// activity, correcting for drift.
///
/// Not shared across workers: each worker owns its pacer and is the only
/// mutator of its target time.
#[derive(Clone, Debug)]
pub struct Pacer {
    mode: PaceMode,
    /// Next scheduled wall-clock target; `None` until the first call.
    target: Option<Instant>,
}

impl Pacer {
    /// Fixed-interval (periodic) pacing.
    pub fn interval(period: Duration) -> Self {
        Self {
            mode: PaceMode::Interval(period),
            target: None,
        }
    }

    /// Best-effort pacing: guarantee at least `minimum` between calls.
    pub fn min_spacing(minimum: Duration) -> Self {
        Self {
            mode: PaceMode::MinSpacing(minimum),
            target: None,
        }
    }

    /// No pacing at all.
    pub fn unpaced() -> Self {
        Self {
            mode: PaceMode::Unpaced,
            target: None,
        }
    }

    /// The configured interval, if periodic.
    ///
    /// Workers use this as the per-iteration deadline when reporting
    /// `deadline_met`.
    pub fn deadline_hint(&self) -> Option<Duration> {
        match self.mode {
            PaceMode::Interval(d) => Some(d),
            _ => None,
        }
    }

    /// Whether this pacer imposes any wait at all.
    pub fn is_unpaced(&self) -> bool {
        self.mode == PaceMode::Unpaced
    }

    /// The configured period or spacing, if any. Zero is invalid and is
    /// rejected at graph-construction time.
    pub(crate) fn bound(&self) -> Option<Duration> {
        match self.mode {
            PaceMode::Interval(d) | PaceMode::MinSpacing(d) => Some(d),
            PaceMode::Unpaced => None,
        }
    }

    /// Forget the current target, as if never called.
    ///
    /// Used by `Restart` so the fresh run re-bases its phase on "now".
    pub fn reset(&mut self) {
        self.target = None;
    }

    /// Shift the target forward by `paused`.
    ///
    /// Called after a pause/resume cycle so the suspended wall-clock time
    /// is not misread as slip.
    pub fn defer(&mut self, paused: Duration) {
        if let Some(t) = self.target.as_mut() {
            *t += paused;
        }
    }

    /// Compute the wait for the current period and advance the target.
    ///
    /// Pure scheduling arithmetic; does not sleep. The returned duration
    /// is zero when the caller is already at or past its target.
    pub fn next_wait(&mut self, now: Instant) -> Duration {
        match self.mode {
            PaceMode::Unpaced => Duration::ZERO,
            PaceMode::Interval(period) => {
                if period.is_zero() {
                    // Degenerate configuration; rejected by the step
                    // builder, tolerated here to keep the arithmetic total.
                    return Duration::ZERO;
                }
                let target = *self.target.get_or_insert(now);
                if now <= target {
                    self.target = Some(target + period);
                    target - now
                } else {
                    // Overran the target: skip whole missed intervals
                    // rather than bursting to catch up.
                    let overrun = now - target;
                    let slip = overrun.as_nanos().div_ceil(period.as_nanos()).max(1);
                    let slipped = checked_mul(period, slip);
                    let new_target = target + slipped;
                    self.target = Some(new_target + period);
                    new_target.saturating_duration_since(now)
                }
            }
            PaceMode::MinSpacing(minimum) => {
                let target = *self.target.get_or_insert(now);
                if now < target {
                    self.target = Some(target + minimum);
                    target - now
                } else {
                    // Spacing only: re-base on now, no phase to preserve.
                    self.target = Some(now + minimum);
                    Duration::ZERO
                }
            }
        }
    }

    /// Block the caller for the remainder of the current period.
    ///
    /// Returns the duration actually waited, for diagnostics. Sleeps
    /// `wait - SCHEDULING_OVERHEAD`, then yields until the target so the
    /// wait is not cut short by sleep granularity.
    pub fn synchronize(&mut self) -> Duration {
        let start = Instant::now();
        let wait = self.next_wait(start);
        if wait.is_zero() {
            return Duration::ZERO;
        }
        sleep_until(start + wait);
        start.elapsed()
    }
}

/// Sleep until `deadline`, compensating for scheduler granularity.
pub(crate) fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if let Some(wait) = deadline.checked_duration_since(now) {
        if wait > SCHEDULING_OVERHEAD {
            std::thread::sleep(wait - SCHEDULING_OVERHEAD);
        }
        while Instant::now() < deadline {
            std::thread::yield_now();
        }
    }
}

/// `period * factor` saturating at the maximum representable duration.
///
/// `Duration::mul` panics on overflow and `factor` here comes from a
/// wall-clock division, so an explicit saturating form is required.
fn checked_mul(period: Duration, factor: u128) -> Duration {
    u32::try_from(factor)
        .ok()
        .and_then(|f| period.checked_mul(f))
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TICK: Duration = Duration::from_millis(20);

    #[test]
    fn unpaced_returns_immediately() {
        let mut pacer = Pacer::unpaced();
        assert_eq!(pacer.synchronize(), Duration::ZERO);
        assert_eq!(pacer.next_wait(Instant::now()), Duration::ZERO);
        assert!(pacer.deadline_hint().is_none());
    }

    #[test]
    fn first_call_establishes_phase_without_waiting() {
        let mut pacer = Pacer::interval(TICK);
        let now = Instant::now();
        assert_eq!(pacer.next_wait(now), Duration::ZERO);
        // Second call, same instant: one full period.
        assert_eq!(pacer.next_wait(now), TICK);
    }

    #[test]
    fn burst_of_instant_calls_spans_whole_periods() {
        let mut pacer = Pacer::interval(TICK);
        let now = Instant::now();
        let mut total = Duration::ZERO;
        for _ in 0..5 {
            total += pacer.next_wait(now);
        }
        // N instantaneous ticks must span at least (N-1) periods.
        assert!(total >= TICK * 4, "burst span {total:?} < {:?}", TICK * 4);
    }

    #[test]
    fn overrun_skips_whole_intervals_without_negative_wait() {
        let mut pacer = Pacer::interval(TICK);
        let start = Instant::now();
        pacer.next_wait(start); // target = start + TICK
        // Arrive 2.5 intervals late.
        let late = start + TICK * 3 + TICK / 2;
        let wait = pacer.next_wait(late);
        // Slip correction: ceil(2.5) = 3 intervals skipped, so the
        // adjusted target is start + 4*TICK, half a tick ahead of "late".
        assert_eq!(wait, TICK / 2);
    }

    #[test]
    fn overrun_on_exact_boundary_waits_zero() {
        let mut pacer = Pacer::interval(TICK);
        let start = Instant::now();
        pacer.next_wait(start);
        // Arrive exactly 2 intervals late: slip = 2, remainder zero.
        let late = start + TICK * 3;
        let wait = pacer.next_wait(late);
        assert_eq!(wait, Duration::ZERO);
        // The following call is one whole period out from the new target.
        assert_eq!(pacer.next_wait(late), TICK);
    }

    #[test]
    fn target_never_regresses_under_overrun() {
        let mut pacer = Pacer::interval(TICK);
        let start = Instant::now();
        pacer.next_wait(start);
        let mut previous = pacer.target.unwrap();
        let mut now = start;
        for i in 1..20u32 {
            // Alternate punctual and badly late arrivals.
            now = if i % 3 == 0 { now + TICK * 4 } else { now + TICK };
            pacer.next_wait(now);
            let target = pacer.target.unwrap();
            assert!(target >= previous, "target regressed at iteration {i}");
            previous = target;
        }
    }

    #[test]
    fn min_spacing_enforces_lower_bound_only() {
        let mut pacer = Pacer::min_spacing(TICK);
        let now = Instant::now();
        assert_eq!(pacer.next_wait(now), Duration::ZERO);
        // Immediate re-call: must wait out the spacing.
        assert_eq!(pacer.next_wait(now), TICK);
        // Arriving long after the target: no wait, re-based on now.
        let later = now + TICK * 10;
        assert_eq!(pacer.next_wait(later), Duration::ZERO);
        assert_eq!(pacer.next_wait(later), TICK);
    }

    #[test]
    fn synchronize_waits_out_the_period() {
        let mut pacer = Pacer::interval(Duration::from_millis(30));
        pacer.synchronize(); // establish phase
        let start = Instant::now();
        let waited = pacer.synchronize();
        let elapsed = start.elapsed();
        assert!(
            elapsed >= Duration::from_millis(29),
            "synchronize returned after only {elapsed:?}"
        );
        assert!(waited >= Duration::from_millis(29));
    }

    #[test]
    fn reset_forgets_phase() {
        let mut pacer = Pacer::interval(TICK);
        let now = Instant::now();
        pacer.next_wait(now);
        pacer.reset();
        // After reset the next call is a fresh first call: no wait.
        assert_eq!(pacer.next_wait(now + TICK * 7), Duration::ZERO);
    }

    #[test]
    fn defer_absorbs_a_pause() {
        let mut pacer = Pacer::interval(TICK);
        let now = Instant::now();
        pacer.next_wait(now); // target = now + TICK
        let pause = TICK * 5;
        pacer.defer(pause);
        // Resuming after the pause sees a full period remaining, not slip.
        assert_eq!(pacer.next_wait(now + pause), TICK);
    }

    #[test]
    fn deadline_hint_reports_interval() {
        assert_eq!(Pacer::interval(TICK).deadline_hint(), Some(TICK));
        assert!(Pacer::min_spacing(TICK).deadline_hint().is_none());
    }
}
