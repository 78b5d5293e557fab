//! Paced dataflow execution engine.
//!
//! Provides the synchronized buffer, prerequisite resolution, evaluation
//! steps, lifecycle-controlled workers, and the top-level [`Engine`] that
//! runs a set of independently-paced pipeline stages.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod engine;
pub mod pacer;
pub mod step;
pub mod worker;

pub use buffer::{ReadCursor, ReadReceipt, SyncBuffer, WriteOutcome};
pub use config::ConfigError;
pub use engine::{Engine, ShutdownReport};
pub use pacer::Pacer;
pub use step::{EvalStep, ResolvedInputs, StepBuilder};
pub use worker::{RunReport, RunnableState, WorkerHandle};
