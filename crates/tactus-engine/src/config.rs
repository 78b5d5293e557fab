//! Graph-construction validation and error types.
//!
//! Fatal configuration errors are detected when a step is built or
//! registered, before any worker starts; nothing here is reachable from a
//! running pipeline.

use std::error::Error;
use std::fmt;

/// Errors detected while building a step or wiring the engine graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// The step name is empty.
    EmptyStepName,
    /// Two registered steps share a name.
    DuplicateStep {
        /// The offending name.
        name: String,
    },
    /// A periodic or min-spacing pacer was configured with a zero bound.
    ZeroInterval {
        /// Name of the offending step.
        step: String,
    },
    /// A consumption policy failed validation.
    InvalidPolicy {
        /// Name of the offending step.
        step: String,
        /// Name of the buffer the policy reads.
        buffer: String,
        /// Which invariant was violated.
        reason: String,
    },
    /// The step-level default read timeout is zero.
    ZeroTimeout {
        /// Name of the offending step.
        step: String,
    },
    /// A calculator step has no output buffer to write to.
    MissingOutput {
        /// Name of the offending step.
        step: String,
    },
    /// The step has no generator, no prerequisites, and no initializer;
    /// its iterations could never do anything.
    IdleStep {
        /// Name of the offending step.
        step: String,
    },
    /// A worker thread could not be spawned.
    ThreadSpawnFailed {
        /// Description of which thread failed.
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyStepName => write!(f, "step name must not be empty"),
            Self::DuplicateStep { name } => {
                write!(f, "a step named '{name}' is already registered")
            }
            Self::ZeroInterval { step } => {
                write!(f, "step '{step}' has a zero pacer interval")
            }
            Self::InvalidPolicy { step, buffer, reason } => {
                write!(f, "step '{step}', input '{buffer}': {reason}")
            }
            Self::ZeroTimeout { step } => {
                write!(f, "step '{step}' has a zero default read timeout")
            }
            Self::MissingOutput { step } => {
                write!(f, "calculator step '{step}' has no output buffer")
            }
            Self::IdleStep { step } => {
                write!(
                    f,
                    "step '{step}' has no generator, prerequisites, or initializer"
                )
            }
            Self::ThreadSpawnFailed { reason } => {
                write!(f, "thread spawn failed: {reason}")
            }
        }
    }
}

impl Error for ConfigError {}
