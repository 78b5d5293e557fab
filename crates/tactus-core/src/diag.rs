//! Per-iteration diagnostics delivered to step callbacks.

use std::time::Duration;

use crate::error::ResolveError;
use crate::id::IterationId;

/// What an iteration of a step ultimately did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Prerequisites resolved, the body ran, and any output was applied.
    Completed,
    /// A required prerequisite failed; the body did not run and nothing
    /// was written.
    Skipped(ResolveError),
    /// The body ran but the output write was dropped (occupied slot with
    /// overwrite disabled, or the write-skip throttle).
    OutputDropped,
}

impl IterationOutcome {
    /// Whether the step body executed this iteration.
    pub fn body_ran(&self) -> bool {
        !matches!(self, Self::Skipped(_))
    }
}

/// Timing diagnostics for one iteration of an evaluation step.
///
/// Created fresh each iteration, handed to the step's callback, then
/// discarded. All durations are wall-clock.
#[derive(Clone, Debug)]
pub struct EvalReport {
    /// Which iteration of the worker this report describes.
    pub iteration: IterationId,
    /// No read timeout fired during prerequisite resolution.
    pub punctual: bool,
    /// The whole iteration fit within the pacer's interval (always `true`
    /// for unpaced and min-spacing steps).
    pub deadline_met: bool,
    /// Time spent suspended by the pacer before the iteration body.
    pub pace_wait: Duration,
    /// Total time spent resolving prerequisites.
    pub resolve_time: Duration,
    /// Portion of `resolve_time` spent blocked waiting for a version
    /// change.
    pub change_wait: Duration,
    /// Time spent inside the generator and evaluator/calculator.
    pub exclusive_time: Duration,
    /// End-to-end iteration time, pacing included.
    pub total_time: Duration,
    /// What the iteration did.
    pub outcome: IterationOutcome,
}

impl EvalReport {
    /// A blank report for the given iteration; the worker fills in the
    /// fields as the iteration progresses.
    pub fn begin(iteration: IterationId) -> Self {
        Self {
            iteration,
            punctual: true,
            deadline_met: true,
            pace_wait: Duration::ZERO,
            resolve_time: Duration::ZERO,
            change_wait: Duration::ZERO,
            exclusive_time: Duration::ZERO,
            total_time: Duration::ZERO,
            outcome: IterationOutcome::Completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn begin_is_punctual_and_completed() {
        let report = EvalReport::begin(IterationId(3));
        assert!(report.punctual);
        assert!(report.deadline_met);
        assert_eq!(report.iteration, IterationId(3));
        assert!(report.outcome.body_ran());
    }

    #[test]
    fn skipped_outcome_means_no_body() {
        let outcome = IterationOutcome::Skipped(ResolveError::NeverWritten {
            buffer: "positions".into(),
        });
        assert!(!outcome.body_ran());
        assert!(IterationOutcome::OutputDropped.body_ran());
    }
}
