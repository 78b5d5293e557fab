//! Error types for the Tactus dataflow engine.
//!
//! Organized by subsystem: prerequisite resolution (non-fatal, skips an
//! iteration) and step evaluation (fatal to the owning runnable).

use std::error::Error;
use std::fmt;
use std::time::Duration;

/// A prerequisite read failed to satisfy its consumption policy.
///
/// Resolution errors are non-fatal: the worker skips the iteration, records
/// the failure in that iteration's diagnostics, and continues. They are
/// expected during warm-up (producers not yet started) and under slow
/// producers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResolveError {
    /// No satisfying version arrived within the read timeout.
    Timeout {
        /// Name of the buffer being read.
        buffer: String,
        /// How long the consumer actually waited.
        waited: Duration,
    },
    /// The buffer has never been written.
    NeverWritten {
        /// Name of the buffer being read.
        buffer: String,
    },
    /// The same version has exhausted its reuse budget; the stale serve
    /// was skipped but remains within the consumer's tolerance.
    Stale {
        /// Name of the buffer being read.
        buffer: String,
        /// The version that went stale.
        version: u64,
        /// Consecutive times this version was served before going stale.
        serves: u32,
    },
    /// Consecutive stale reads exceeded the consumer's tolerance.
    StaleExhausted {
        /// Name of the buffer being read.
        buffer: String,
        /// The version that went stale.
        version: u64,
        /// Consecutive stale reads, including this one.
        strikes: u32,
    },
    /// The wait was abandoned because the consumer left the running
    /// state. Never reported to diagnostics; the worker's loop re-checks
    /// its lifecycle instead.
    Interrupted {
        /// Name of the buffer being read.
        buffer: String,
    },
}

impl ResolveError {
    /// Name of the buffer whose read failed.
    pub fn buffer(&self) -> &str {
        match self {
            Self::Timeout { buffer, .. }
            | Self::NeverWritten { buffer }
            | Self::Stale { buffer, .. }
            | Self::StaleExhausted { buffer, .. }
            | Self::Interrupted { buffer } => buffer,
        }
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout { buffer, waited } => {
                write!(f, "read of '{buffer}' timed out after {waited:?}")
            }
            Self::NeverWritten { buffer } => {
                write!(f, "buffer '{buffer}' has never been written")
            }
            Self::Stale { buffer, version, serves } => {
                write!(
                    f,
                    "version {version} of '{buffer}' is stale after {serves} serves"
                )
            }
            Self::StaleExhausted { buffer, version, strikes } => {
                write!(
                    f,
                    "version {version} of '{buffer}' exhausted staleness tolerance \
                     ({strikes} consecutive stale reads)"
                )
            }
            Self::Interrupted { buffer } => {
                write!(f, "read of '{buffer}' interrupted by a lifecycle transition")
            }
        }
    }
}

impl Error for ResolveError {}

/// A step body failed, or resolved inputs were accessed incorrectly.
///
/// Evaluation errors are fatal to the owning runnable: the worker logs the
/// fault, marks itself Stopped with an end timestamp, and stops iterating.
/// Other runnables are unaffected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EvalError {
    /// The generator, calculator, or evaluator itself failed.
    Failed {
        /// Name of the failing step.
        step: String,
        /// Human-readable description of the failure.
        reason: String,
    },
    /// A resolved input was requested at a type it does not hold.
    InputType {
        /// Position of the input in the step's prerequisite list.
        index: usize,
        /// The requested type name.
        expected: &'static str,
    },
    /// A resolved input was requested at an out-of-range position, or a
    /// required input carried no value.
    InputMissing {
        /// Position of the input in the step's prerequisite list.
        index: usize,
    },
}

impl EvalError {
    /// Shorthand for a body failure.
    pub fn failed(step: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            step: step.into(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { step, reason } => write!(f, "step '{step}' failed: {reason}"),
            Self::InputType { index, expected } => {
                write!(f, "input {index} does not hold a value of type {expected}")
            }
            Self::InputMissing { index } => write!(f, "input {index} carries no value"),
        }
    }
}

impl Error for EvalError {}
