//! Runnable worker: the lifecycle state machine driving one step's loop.
//!
//! Each registered step runs on its own OS thread. The thread owns its
//! [`EvalStep`] exclusively (moved in via `thread::spawn`); the
//! [`WorkerHandle`] left behind carries the shared lifecycle cell and a
//! crossbeam nudge channel that wakes the thread out of any park or paced
//! wait. Lifecycle transitions are applied by the handle under the cell's
//! guard and observed by the thread at the next safe point, so `stop` is
//! cooperative and never pre-empts an in-flight body.
//!
//! Disposing the worker (or dropping its handle) exits the thread, which
//! returns a [`RunReport`] through its `JoinHandle` so the engine can
//! recover iteration counts and faults on shutdown.

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use tactus_core::diag::IterationOutcome;
use tactus_core::{EvalError, EvalReport, Identified, IterationId, ResolveError, RunnableId};

use crate::config::ConfigError;
use crate::step::{EvalStep, ResolvedInputs, StepBody};

/// Lifecycle state of a runnable worker.
///
/// `Created → Running ⇄ Paused → Stopped`, with `Disposed` reachable from
/// any state. `Stopped` is re-armable via [`WorkerHandle::restart`];
/// `Disposed` exits the worker thread and is final.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunnableState {
    /// Spawned but never started.
    Created,
    /// Iterating.
    Running,
    /// Idle without advancing the pacer's target.
    Paused,
    /// Not iterating; the thread is parked awaiting restart or dispose.
    Stopped,
    /// The thread has been released.
    Disposed,
}

impl RunnableState {
    /// Whether the worker is no longer iterating.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Disposed)
    }
}

impl fmt::Display for RunnableState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Disposed => "disposed",
        };
        write!(f, "{name}")
    }
}

/// What a worker thread did over its whole lifetime, returned on join.
#[derive(Debug)]
pub struct RunReport {
    /// The worker's stable identity.
    pub id: RunnableId,
    /// The step's name.
    pub name: String,
    /// Iterations begun, including skipped ones, across all runs.
    pub iterations: u64,
    /// The fault that stopped the runnable, if any.
    pub fault: Option<EvalError>,
}

/// Lifecycle fields shared between the handle and the worker thread.
///
/// The handle is the only transition initiator except for evaluator
/// faults, which the thread applies itself.
struct Lifecycle {
    state: RunnableState,
    started_at: Option<Instant>,
    ended_at: Option<Instant>,
    /// Set by `restart`; consumed by the thread before its next iteration
    /// to reset the pacer's target and all read cursors.
    reset_pending: bool,
}

struct Shared {
    cell: Mutex<Lifecycle>,
}

impl Shared {
    fn state(&self) -> RunnableState {
        self.cell.lock().unwrap().state
    }
}

// ── WorkerHandle ─────────────────────────────────────────────────

/// Control handle for one runnable worker.
///
/// Exposes the start/pause/resume/stop/restart lifecycle controls. Each
/// control returns `true` when the transition applied and `false` when
/// the current state does not permit it (controlling a disposed worker is
/// never an error, just a no-op).
///
/// Dropping the handle disposes the worker and joins its thread.
pub struct WorkerHandle {
    id: RunnableId,
    name: String,
    shared: Arc<Shared>,
    nudge_tx: Sender<()>,
    thread: Option<JoinHandle<RunReport>>,
}

impl WorkerHandle {
    /// Spawn a worker thread in the `Created` state, owning `step`.
    ///
    /// The thread idles until [`start`](Self::start) and exits on
    /// [`dispose`](Self::dispose) or handle drop.
    pub fn spawn<G, O>(step: EvalStep<G, O>) -> Result<Self, ConfigError>
    where
        G: Send + 'static,
        O: Clone + Send + 'static,
    {
        let id = RunnableId::next();
        let name = step.name().to_string();
        let shared = Arc::new(Shared {
            cell: Mutex::new(Lifecycle {
                state: RunnableState::Created,
                started_at: None,
                ended_at: None,
                reset_pending: false,
            }),
        });
        let (nudge_tx, nudge_rx) = crossbeam_channel::unbounded();

        let body = WorkerBody {
            id,
            name: name.clone(),
            step,
            shared: Arc::clone(&shared),
            nudges: nudge_rx,
            iterations: 0,
            fault: None,
            initialized: false,
        };
        let thread = thread::Builder::new()
            .name(format!("tactus-{name}"))
            .spawn(move || body.run())
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: e.to_string(),
            })?;

        Ok(Self {
            id,
            name,
            shared,
            nudge_tx,
            thread: Some(thread),
        })
    }

    /// The step's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current lifecycle state.
    pub fn state(&self) -> RunnableState {
        self.shared.state()
    }

    /// When the worker was last started, if ever.
    pub fn started_at(&self) -> Option<Instant> {
        self.shared.cell.lock().unwrap().started_at
    }

    /// When the worker was stopped or disposed, if it has been.
    pub fn ended_at(&self) -> Option<Instant> {
        self.shared.cell.lock().unwrap().ended_at
    }

    /// `Created → Running`.
    pub fn start(&self) -> bool {
        self.launch(RunnableState::Running)
    }

    /// `Created → Paused`: arm the worker without iterating yet.
    pub fn start_paused(&self) -> bool {
        self.launch(RunnableState::Paused)
    }

    fn launch(&self, into: RunnableState) -> bool {
        self.transition(|cell| {
            if cell.state != RunnableState::Created {
                return false;
            }
            cell.state = into;
            cell.started_at = Some(Instant::now());
            true
        })
    }

    /// `Running → Paused`. The pacer's target is snapshot across the
    /// pause, so resuming manufactures no artificial slip.
    pub fn pause(&self) -> bool {
        self.transition(|cell| {
            if cell.state != RunnableState::Running {
                return false;
            }
            cell.state = RunnableState::Paused;
            true
        })
    }

    /// `Paused → Running`.
    pub fn resume(&self) -> bool {
        self.transition(|cell| {
            if cell.state != RunnableState::Paused {
                return false;
            }
            cell.state = RunnableState::Running;
            true
        })
    }

    /// Any non-terminal state `→ Stopped`.
    ///
    /// Cooperative: the loop exits at its next safe point, after the
    /// current iteration's write, never mid-write.
    pub fn stop(&self) -> bool {
        self.transition(|cell| {
            if cell.state.is_terminal() {
                return false;
            }
            cell.state = RunnableState::Stopped;
            cell.ended_at = Some(Instant::now());
            true
        })
    }

    /// Stop followed by a fresh start: the pacer's target and every
    /// per-consumer reuse cursor are reset before the next iteration.
    pub fn restart(&self) -> bool {
        self.transition(|cell| {
            if cell.state == RunnableState::Disposed {
                return false;
            }
            cell.state = RunnableState::Running;
            cell.started_at = Some(Instant::now());
            cell.ended_at = None;
            cell.reset_pending = true;
            true
        })
    }

    /// Release the worker: the thread exits at its next safe point. Final.
    pub fn dispose(&self) -> bool {
        self.transition(|cell| {
            if cell.state == RunnableState::Disposed {
                return false;
            }
            cell.state = RunnableState::Disposed;
            if cell.ended_at.is_none() {
                cell.ended_at = Some(Instant::now());
            }
            true
        })
    }

    /// Join the worker thread, recovering its [`RunReport`].
    ///
    /// Call after [`dispose`](Self::dispose); joins at most once. Returns
    /// `None` if already joined or the thread panicked.
    pub fn join(&mut self) -> Option<RunReport> {
        let report = self.thread.take()?.join().ok();
        if report.is_none() {
            log::error!("worker '{}' panicked", self.name);
        }
        report
    }

    fn transition(&self, apply: impl FnOnce(&mut Lifecycle) -> bool) -> bool {
        let applied = {
            let mut cell = self.shared.cell.lock().unwrap();
            let before = cell.state;
            let applied = apply(&mut cell);
            if applied {
                log::debug!("worker '{}': {before} -> {}", self.name, cell.state);
            }
            applied
        };
        if applied {
            // Wake the thread out of any park or paced wait. The thread
            // may already have exited; a closed channel is fine.
            let _ = self.nudge_tx.send(());
        }
        applied
    }
}

impl Identified for WorkerHandle {
    fn runnable_id(&self) -> RunnableId {
        self.id
    }
}

impl PartialEq for WorkerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for WorkerHandle {}

impl fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.dispose();
            let _ = self.join();
        }
    }
}

// ── Worker thread ────────────────────────────────────────────────

/// State owned by the worker thread's main loop.
struct WorkerBody<G, O> {
    id: RunnableId,
    name: String,
    step: EvalStep<G, O>,
    shared: Arc<Shared>,
    nudges: Receiver<()>,
    iterations: u64,
    fault: Option<EvalError>,
    initialized: bool,
}

impl<G: Send + 'static, O: Clone + Send + 'static> WorkerBody<G, O> {
    /// Main worker loop. Runs until disposed, then returns the report.
    fn run(mut self) -> RunReport {
        loop {
            match self.shared.state() {
                RunnableState::Created | RunnableState::Stopped => {
                    if !self.park() {
                        break;
                    }
                }
                RunnableState::Paused => self.paused_park(),
                RunnableState::Running => self.iterate(),
                RunnableState::Disposed => break,
            }
        }
        log::debug!("worker '{}' exiting after {} iterations", self.name, self.iterations);
        RunReport {
            id: self.id,
            name: self.name,
            iterations: self.iterations,
            fault: self.fault,
        }
    }

    /// Park until a transition nudge. Returns `false` when the handle is
    /// gone and the thread should exit.
    fn park(&self) -> bool {
        self.nudges.recv().is_ok()
    }

    /// Idle while paused, then shift the pacer's target by the time
    /// spent suspended so the resume does not read as slip.
    fn paused_park(&mut self) {
        let paused_at = Instant::now();
        while self.shared.state() == RunnableState::Paused {
            if self.nudges.recv().is_err() {
                return;
            }
        }
        if self.shared.state() == RunnableState::Running {
            self.step.pacer.defer(paused_at.elapsed());
        }
    }

    /// One iteration of the step.
    fn iterate(&mut self) {
        if self.take_reset() {
            self.step.reset();
        }
        if !self.initialized {
            self.initialized = true;
            if let Some(init) = self.step.initializer.take() {
                if let Err(err) = init() {
                    self.apply_fault(err);
                    return;
                }
            }
        }

        self.iterations += 1;
        let iteration = IterationId(self.iterations);
        let iter_start = Instant::now();
        let mut report = EvalReport::begin(iteration);

        // Pace. The wait is cut short by any lifecycle nudge so stop and
        // pause need not ride out a long interval.
        let wait = self.step.pacer.next_wait(iter_start);
        report.pace_wait = self.interruptible_wait(wait);
        if self.shared.state() != RunnableState::Running {
            return;
        }

        let resolve_start = Instant::now();
        // Blocked reads wait only while this worker stays Running, so a
        // stop or dispose can never be stranded behind an unbounded read.
        let shared = Arc::clone(&self.shared);
        let running = move || shared.state() == RunnableState::Running;
        let outcome = self.step.resolve_inputs(&running);
        report.resolve_time = resolve_start.elapsed();
        report.change_wait = outcome.change_wait;

        match outcome.failure {
            Some(ResolveError::Interrupted { .. }) => {
                // Lifecycle moved mid-read; the main loop re-checks state.
                return;
            }
            Some(err) => {
                log::trace!("step '{}': iteration {iteration} skipped: {err}", self.name);
                report.punctual = false;
                report.outcome = IterationOutcome::Skipped(err);
            }
            None => {
                let exclusive_start = Instant::now();
                let raw = match self.step.generator.as_mut() {
                    Some(generate) => match generate() {
                        Ok(value) => Some(value),
                        Err(err) => {
                            self.apply_fault(err);
                            return;
                        }
                    },
                    None => None,
                };
                let produced = {
                    let step = &mut self.step;
                    let inputs = ResolvedInputs::over(&step.inputs);
                    match &mut step.body {
                        StepBody::Calculate(calc) => calc(raw, &inputs).map(Some),
                        StepBody::Evaluate(eval) => eval(raw, &inputs).map(|()| None),
                    }
                };
                report.exclusive_time = exclusive_start.elapsed();
                match produced {
                    Err(err) => {
                        self.apply_fault(err);
                        return;
                    }
                    Ok(Some(value)) => {
                        if let Some(port) = &self.step.output {
                            if !port.publish(value).applied() {
                                report.outcome = IterationOutcome::OutputDropped;
                            }
                        }
                    }
                    Ok(None) => {}
                }
            }
        }

        report.total_time = iter_start.elapsed();
        if let Some(deadline) = self.step.pacer.deadline_hint() {
            // Deadline is judged on work time; the pace wait itself is
            // the period being kept, not time overrun.
            let worked = report.total_time.saturating_sub(report.pace_wait);
            report.deadline_met = worked <= deadline;
        }

        if let Some(on_report) = self.step.on_report.as_mut() {
            on_report(&report);
        }
    }

    /// Wait out `wait`, returning early if a lifecycle nudge moves the
    /// worker out of `Running`. Returns the time actually waited.
    fn interruptible_wait(&self, wait: Duration) -> Duration {
        if wait.is_zero() {
            return Duration::ZERO;
        }
        let start = Instant::now();
        let deadline = start + wait;
        loop {
            let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                break;
            };
            match self.nudges.recv_timeout(remaining) {
                Ok(()) => {
                    if self.shared.state() != RunnableState::Running {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        start.elapsed()
    }

    fn take_reset(&mut self) -> bool {
        let mut cell = self.shared.cell.lock().unwrap();
        std::mem::take(&mut cell.reset_pending)
    }

    /// An evaluator fault stops this runnable; other workers continue.
    fn apply_fault(&mut self, err: EvalError) {
        log::error!("worker '{}' faulted: {err}", self.name);
        self.fault = Some(err);
        let mut cell = self.shared.cell.lock().unwrap();
        if cell.state != RunnableState::Disposed {
            cell.state = RunnableState::Stopped;
            cell.ended_at = Some(Instant::now());
        }
    }
}
