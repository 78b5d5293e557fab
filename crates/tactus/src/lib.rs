//! Tactus: a real-time dataflow execution engine.
//!
//! Named evaluation steps read shared, versioned buffers under
//! per-consumer consumption policies and write results to output buffers,
//! each step driven by its own lifecycle-controlled worker thread paced by
//! a frame/interval pacer. Hand-off between independently-paced stages —
//! a physics step producing positions, a rasterizer consuming them, a
//! renderer sampling rasterized output — needs no external orchestration
//! and tolerates slow producers, slow consumers, and timing jitter.
//!
//! This is the top-level facade crate re-exporting the public API of the
//! Tactus sub-crates; adding `tactus` as a single dependency is enough.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tactus::prelude::*;
//!
//! // Shared hand-off buffer between the two stages.
//! let positions = Arc::new(SyncBuffer::new("positions"));
//! let doubled = Arc::new(SyncBuffer::new("doubled"));
//!
//! // A source step: generates a fresh value each iteration.
//! let mut n = 0u64;
//! let physics = EvalStep::source("physics", move || {
//!     n += 1;
//!     Ok(n)
//! })
//! .output(&positions)
//! .pacer(Pacer::interval(Duration::from_millis(5)))
//! .build()
//! .unwrap();
//!
//! // A transform step: waits for each fresh position and doubles it.
//! let scale = EvalStep::calculate("scale", |inputs| {
//!     Ok(*inputs.get::<u64>(0)? * 2)
//! })
//! .reads(
//!     &positions,
//!     Consumption::exclusive().with_timeout(Duration::from_millis(250)),
//! )
//! .output(&doubled)
//! .build()
//! .unwrap();
//!
//! let mut engine = Engine::new();
//! engine.register(physics).unwrap();
//! engine.register(scale).unwrap();
//! engine.start_all();
//!
//! // Sample the pipeline's output, then shut everything down.
//! let deadline = std::time::Instant::now() + Duration::from_secs(2);
//! while doubled.is_empty() && std::time::Instant::now() < deadline {
//!     std::thread::yield_now();
//! }
//! let (value, version) = doubled.peek().expect("pipeline produced output");
//! assert_eq!(value % 2, 0);
//! assert!(version >= 1);
//! let report = engine.shutdown();
//! assert!(report.clean());
//! ```
//!
//! # Modules
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tactus-core` | IDs, consumption policies, diagnostics, errors |
//! | [`engine`] | `tactus-engine` | Buffers, pacers, steps, workers, the engine |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, policies, diagnostics, and errors (`tactus-core`).
pub use tactus_core as types;

/// Buffers, pacers, steps, workers, and the engine (`tactus-engine`).
pub use tactus_engine as engine;

/// Common imports for typical Tactus usage.
///
/// ```rust
/// use tactus::prelude::*;
/// ```
pub mod prelude {
    // Policies, diagnostics, and identity
    pub use tactus_core::{
        same_runnable, Consumption, EvalError, EvalReport, Identified, IterationId,
        IterationOutcome, ResolveError, ReuseBudget, RunnableId,
    };

    // The engine surface
    pub use tactus_engine::{
        ConfigError, Engine, EvalStep, Pacer, ReadCursor, ReadReceipt, ResolvedInputs, RunReport,
        RunnableState, ShutdownReport, StepBuilder, SyncBuffer, WorkerHandle, WriteOutcome,
    };
}
