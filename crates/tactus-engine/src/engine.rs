//! The engine: owns the set of workers and runs them as a group.
//!
//! The engine is the only component with a view of the whole step graph —
//! implicit, via each step's prerequisite list pointing at other steps'
//! output buffers. Buffers themselves are `Arc`-shared by the host and
//! threaded through step builders; the engine only registers the steps
//! and fans lifecycle controls out to their workers.

use std::time::Instant;

use indexmap::IndexMap;

use tactus_core::{EvalError, Identified, RunnableId};

use crate::config::ConfigError;
use crate::step::EvalStep;
use crate::worker::{RunReport, WorkerHandle};

/// Accounting from [`Engine::shutdown`].
#[derive(Debug)]
pub struct ShutdownReport {
    /// Workers the engine owned at shutdown.
    pub total: usize,
    /// Workers that were still live and got stopped.
    pub stopped: usize,
    /// Worker threads joined cleanly.
    pub joined: usize,
    /// Run reports of workers that ended on an evaluator fault.
    pub faults: Vec<RunReport>,
    /// Total shutdown time in milliseconds.
    pub total_ms: u64,
}

impl ShutdownReport {
    /// Whether every worker joined and none faulted.
    pub fn clean(&self) -> bool {
        self.joined == self.total && self.faults.is_empty()
    }

    /// The collected faults as (step name, error) pairs.
    pub fn faulted(&self) -> impl Iterator<Item = (&str, &EvalError)> {
        self.faults
            .iter()
            .filter_map(|r| r.fault.as_ref().map(|f| (r.name.as_str(), f)))
    }
}

/// Owns one worker per registered evaluation step.
///
/// Steps are registered in insertion order, which is also the order group
/// controls fan out in. Dropping the engine shuts it down.
#[derive(Debug, Default)]
pub struct Engine {
    workers: IndexMap<RunnableId, WorkerHandle>,
}

impl Engine {
    /// An engine with no steps registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a step and spawn its worker in the `Created` state.
    ///
    /// The worker does not iterate until started. Step names must be
    /// unique within one engine; the name is the wiring-time handle for
    /// [`by_name`](Self::by_name) and the label in logs and diagnostics.
    pub fn register<G, O>(&mut self, step: EvalStep<G, O>) -> Result<RunnableId, ConfigError>
    where
        G: Send + 'static,
        O: Clone + Send + 'static,
    {
        if self.by_name(step.name()).is_some() {
            return Err(ConfigError::DuplicateStep {
                name: step.name().to_string(),
            });
        }
        let worker = WorkerHandle::spawn(step)?;
        let id = worker.runnable_id();
        log::debug!("registered step '{}' as runnable {id}", worker.name());
        self.workers.insert(id, worker);
        Ok(id)
    }

    /// Number of registered steps.
    pub fn len(&self) -> usize {
        self.workers.len()
    }

    /// Whether no step has been registered.
    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// The worker for a runnable ID.
    pub fn handle(&self, id: RunnableId) -> Option<&WorkerHandle> {
        self.workers.get(&id)
    }

    /// The worker for a step name.
    pub fn by_name(&self, name: &str) -> Option<&WorkerHandle> {
        self.workers.values().find(|w| w.name() == name)
    }

    /// All workers, in registration order.
    pub fn handles(&self) -> impl Iterator<Item = &WorkerHandle> {
        self.workers.values()
    }

    /// Start every created worker. Returns how many transitions applied.
    pub fn start_all(&self) -> usize {
        self.workers.values().filter(|w| w.start()).count()
    }

    /// Pause every running worker.
    pub fn pause_all(&self) -> usize {
        self.workers.values().filter(|w| w.pause()).count()
    }

    /// Resume every paused worker.
    pub fn resume_all(&self) -> usize {
        self.workers.values().filter(|w| w.resume()).count()
    }

    /// Stop every live worker. Cooperative, per worker.
    pub fn stop_all(&self) -> usize {
        self.workers.values().filter(|w| w.stop()).count()
    }

    /// Stop, dispose, and join every worker, with per-phase accounting.
    ///
    /// Stops fan out first so all loops wind down concurrently, then each
    /// thread is disposed and joined. Idempotent: a second call reports
    /// zero workers.
    pub fn shutdown(&mut self) -> ShutdownReport {
        let start = Instant::now();
        let total = self.workers.len();

        let stopped = self.stop_all();
        for worker in self.workers.values() {
            worker.dispose();
        }

        let mut joined = 0;
        let mut faults = Vec::new();
        for (_, mut worker) in self.workers.drain(..) {
            if let Some(report) = worker.join() {
                joined += 1;
                if report.fault.is_some() {
                    faults.push(report);
                }
            }
        }

        let report = ShutdownReport {
            total,
            stopped,
            joined,
            faults,
            total_ms: start.elapsed().as_millis() as u64,
        };
        log::debug!(
            "engine shutdown: {}/{} joined, {} stopped, {} faulted",
            report.joined,
            report.total,
            report.stopped,
            report.faults.len()
        );
        report
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.shutdown();
        }
    }
}
