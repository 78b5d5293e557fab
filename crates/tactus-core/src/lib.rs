//! Core types for the Tactus dataflow engine.
//!
//! Defines the strongly-typed identifiers, the consumption-policy
//! descriptor, per-iteration diagnostics, and the error taxonomy shared
//! by the engine and its collaborators.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod diag;
pub mod error;
pub mod id;
pub mod policy;

pub use diag::{EvalReport, IterationOutcome};
pub use error::{EvalError, ResolveError};
pub use id::{same_runnable, Identified, IterationId, RunnableId};
pub use policy::{Consumption, ReuseBudget};
