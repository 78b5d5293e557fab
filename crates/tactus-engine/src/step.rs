//! Evaluation steps: one pipeline stage each.
//!
//! An [`EvalStep`] declares an optional one-time initializer, an optional
//! per-iteration generator (fresh raw input, no dependencies), a
//! calculator or evaluator body, an ordered list of prerequisites, an
//! output port, a pacer, and a per-iteration report callback. The worker
//! (see [`crate::worker`]) drives its iteration loop.
//!
//! Prerequisites are typed [`SyncBuffer`] reads stored behind the
//! object-safe `InputSlot` trait; step bodies recover the concrete types
//! through [`ResolvedInputs`] with a downcast at use. This keeps a step's
//! input list uniform without erasing the buffers themselves.

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use smallvec::SmallVec;

use tactus_core::policy::Consumption;
use tactus_core::{EvalError, EvalReport, ResolveError};

use crate::buffer::{SyncBuffer, WriteOutcome};
use crate::buffer::ReadCursor;
use crate::config::ConfigError;
use crate::pacer::Pacer;

/// One-time initializer, run before the first iteration.
pub(crate) type Initializer = Box<dyn FnOnce() -> Result<(), EvalError> + Send>;

/// Per-iteration generator: fresh raw input with no dependencies.
pub(crate) type Generator<G> = Box<dyn FnMut() -> Result<G, EvalError> + Send>;

/// Per-iteration report callback.
pub(crate) type ReportFn = Box<dyn FnMut(&EvalReport) + Send>;

/// The computation a step performs each iteration.
pub(crate) enum StepBody<G, O> {
    /// Pure transform; the result is written to the output port.
    Calculate(Box<dyn FnMut(Option<G>, &ResolvedInputs<'_>) -> Result<O, EvalError> + Send>),
    /// Side-effecting consumer; nothing is written.
    Evaluate(Box<dyn FnMut(Option<G>, &ResolvedInputs<'_>) -> Result<(), EvalError> + Send>),
}

impl<G, O> StepBody<G, O> {
    fn is_calculate(&self) -> bool {
        matches!(self, Self::Calculate(_))
    }
}

// ── Prerequisites ────────────────────────────────────────────────

/// Object-safe view of one typed prerequisite.
///
/// Implemented only by `Input<T>`; erases `T` so a step can hold a
/// uniform ordered list. The resolved value is recovered by downcast
/// through [`ResolvedInputs`].
pub(crate) trait InputSlot: Send {
    /// Name of the buffer this slot reads.
    fn buffer_name(&self) -> &str;
    /// The slot's consumption policy.
    fn policy(&self) -> &Consumption;
    /// Read the buffer per policy within `budget`, waiting only while
    /// `keep_waiting` holds; stores the value on success and returns the
    /// time spent blocked waiting for a change.
    fn resolve(
        &mut self,
        budget: Option<Duration>,
        keep_waiting: &dyn Fn() -> bool,
    ) -> Result<Duration, ResolveError>;
    /// Drop any resolved value ahead of the next iteration.
    fn clear(&mut self);
    /// Forget all per-consumer bookkeeping, as on a restart.
    fn reset(&mut self);
    /// The resolved value, type-erased.
    fn resolved(&self) -> Option<&dyn Any>;
}

/// A typed prerequisite: one buffer, one policy, one consumer's cursor.
struct Input<T> {
    buffer: Arc<SyncBuffer<T>>,
    policy: Consumption,
    cursor: ReadCursor,
    value: Option<T>,
}

impl<T: Clone + Send + 'static> InputSlot for Input<T> {
    fn buffer_name(&self) -> &str {
        self.buffer.name()
    }

    fn policy(&self) -> &Consumption {
        &self.policy
    }

    fn resolve(
        &mut self,
        budget: Option<Duration>,
        keep_waiting: &dyn Fn() -> bool,
    ) -> Result<Duration, ResolveError> {
        let receipt =
            self.buffer
                .read_while(&self.policy, &mut self.cursor, budget, keep_waiting)?;
        self.value = Some(receipt.value);
        Ok(receipt.waited)
    }

    fn clear(&mut self) {
        self.value = None;
    }

    fn reset(&mut self) {
        self.value = None;
        self.cursor.reset();
    }

    fn resolved(&self) -> Option<&dyn Any> {
        self.value.as_ref().map(|v| v as &dyn Any)
    }
}

/// Resolved prerequisite values, indexed in declaration order.
///
/// Handed to the step body each iteration. Values are recovered at their
/// concrete types; a wrong type or index is an [`EvalError`], which is
/// fatal to the runnable (it is a wiring bug, not a runtime condition).
pub struct ResolvedInputs<'a> {
    slots: &'a [Box<dyn InputSlot>],
}

impl<'a> ResolvedInputs<'a> {
    /// View over an already-resolved slot list.
    pub(crate) fn over(slots: &'a [Box<dyn InputSlot>]) -> Self {
        Self { slots }
    }

    /// The value of the `index`-th prerequisite.
    ///
    /// Fails if the index is out of range, the input carries no value
    /// (possible only for optional inputs), or `T` is not the buffer's
    /// value type.
    pub fn get<T: 'static>(&self, index: usize) -> Result<&T, EvalError> {
        let slot = self
            .slots
            .get(index)
            .ok_or(EvalError::InputMissing { index })?;
        let value = slot
            .resolved()
            .ok_or(EvalError::InputMissing { index })?;
        value
            .downcast_ref::<T>()
            .ok_or(EvalError::InputType {
                index,
                expected: std::any::type_name::<T>(),
            })
    }

    /// The value of an optional prerequisite, absent if its resolution
    /// failed this iteration.
    pub fn try_get<T: 'static>(&self, index: usize) -> Option<&T> {
        self.slots
            .get(index)
            .and_then(|slot| slot.resolved())
            .and_then(|value| value.downcast_ref::<T>())
    }

    /// Number of declared prerequisites.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the step declares no prerequisites.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

// ── Output port ──────────────────────────────────────────────────

/// A step's output buffer plus its write policy.
pub(crate) struct OutputPort<O> {
    buffer: Arc<SyncBuffer<O>>,
    overwrite: bool,
    skip: u32,
}

impl<O: Clone> OutputPort<O> {
    /// Write one produced value under the step's overwrite/skip policy.
    pub(crate) fn publish(&self, value: O) -> WriteOutcome {
        self.buffer.write(value, self.overwrite, self.skip)
    }
}

// ── Resolution ───────────────────────────────────────────────────

/// Aggregate result of resolving all of a step's prerequisites.
pub(crate) struct ResolveOutcome {
    /// Total time spent blocked waiting for version changes.
    pub change_wait: Duration,
    /// The first required-input failure, if any; the iteration is
    /// skipped when present.
    pub failure: Option<ResolveError>,
}

// ── EvalStep ─────────────────────────────────────────────────────

/// A declared pipeline stage, ready to be registered with the engine.
///
/// `G` is the generator's value type (`()` when there is no generator);
/// `O` is the output value type (`()` for evaluator sinks). Construct via
/// [`EvalStep::source`], [`EvalStep::calculate`], [`EvalStep::evaluate`],
/// or [`EvalStep::generate`].
pub struct EvalStep<G = (), O = ()> {
    pub(crate) name: String,
    pub(crate) initializer: Option<Initializer>,
    pub(crate) generator: Option<Generator<G>>,
    pub(crate) body: StepBody<G, O>,
    pub(crate) inputs: Vec<Box<dyn InputSlot>>,
    pub(crate) output: Option<OutputPort<O>>,
    pub(crate) read_timeout: Option<Duration>,
    pub(crate) pacer: Pacer,
    pub(crate) on_report: Option<ReportFn>,
}

impl<G, O> std::fmt::Debug for EvalStep<G, O> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalStep")
            .field("name", &self.name)
            .field("inputs", &self.inputs.len())
            .field("has_output", &self.output.is_some())
            .finish_non_exhaustive()
    }
}

impl<O: Clone + Send + 'static> EvalStep<O, O> {
    /// A source step: the generator's value is the step's result.
    pub fn source<F>(name: impl Into<String>, mut generator: F) -> StepBuilder<O, O>
    where
        F: FnMut() -> Result<O, EvalError> + Send + 'static,
    {
        let gen: Generator<O> = Box::new(move || generator());
        StepBuilder::new(
            name,
            Some(gen),
            StepBody::Calculate(Box::new(|raw, _| match raw {
                Some(value) => Ok(value),
                None => Err(EvalError::InputMissing { index: 0 }),
            })),
        )
    }
}

impl<O: Clone + Send + 'static> EvalStep<(), O> {
    /// A transform step: a pure calculator over resolved prerequisites.
    pub fn calculate<F>(name: impl Into<String>, mut body: F) -> StepBuilder<(), O>
    where
        F: FnMut(&ResolvedInputs<'_>) -> Result<O, EvalError> + Send + 'static,
    {
        StepBuilder::new(
            name,
            None,
            StepBody::Calculate(Box::new(move |_, inputs| body(inputs))),
        )
    }
}

impl EvalStep<(), ()> {
    /// A sink step: a side-effecting evaluator with no output buffer.
    pub fn evaluate<F>(name: impl Into<String>, mut body: F) -> StepBuilder<(), ()>
    where
        F: FnMut(&ResolvedInputs<'_>) -> Result<(), EvalError> + Send + 'static,
    {
        StepBuilder::new(
            name,
            None,
            StepBody::Evaluate(Box::new(move |_, inputs| body(inputs))),
        )
    }
}

impl<G: Send + 'static, O: Clone + Send + 'static> EvalStep<G, O> {
    /// The full form: a generator feeding a calculator alongside resolved
    /// prerequisites.
    pub fn generate<Gen, F>(
        name: impl Into<String>,
        generator: Gen,
        body: F,
    ) -> StepBuilder<G, O>
    where
        Gen: FnMut() -> Result<G, EvalError> + Send + 'static,
        F: FnMut(Option<G>, &ResolvedInputs<'_>) -> Result<O, EvalError> + Send + 'static,
    {
        StepBuilder::new(
            name,
            Some(Box::new(generator)),
            StepBody::Calculate(Box::new(body)),
        )
    }

    /// The step's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve every prerequisite, honoring the step's overall deadline.
    ///
    /// The overall deadline is the minimum of the read timeouts still
    /// outstanding across guarded inputs; each input's own wait is bounded
    /// by the smaller of its policy timeout (or the step default) and the
    /// remaining overall budget. Dirty inputs never block. A failed
    /// optional input resolves to absent. `keep_waiting` bounds every
    /// blocked wait: the worker passes its lifecycle state so an
    /// unbounded read cannot outlive a stop or dispose.
    pub(crate) fn resolve_inputs(&mut self, keep_waiting: &dyn Fn() -> bool) -> ResolveOutcome {
        let step_default = self.read_timeout;
        let overall: Option<Duration> = self
            .inputs
            .iter()
            .filter(|slot| !slot.policy().allow_dirty)
            .filter_map(|slot| slot.policy().read_timeout.or(step_default))
            .min();

        let started = Instant::now();
        let mut change_wait = Duration::ZERO;
        // Failures of optional inputs, kept only for trace logging.
        let mut soft: SmallVec<[ResolveError; 2]> = SmallVec::new();

        for slot in &mut self.inputs {
            slot.clear();
            let own = slot.policy().read_timeout.or(step_default);
            let remaining = overall.map(|o| o.saturating_sub(started.elapsed()));
            let budget = match (own, remaining) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, b) => b,
            };
            match slot.resolve(budget, keep_waiting) {
                Ok(waited) => change_wait += waited,
                // An interrupted wait aborts the whole resolution, even on
                // an optional input: the worker is leaving Running.
                Err(err) if slot.policy().optional
                    && !matches!(err, ResolveError::Interrupted { .. }) =>
                {
                    soft.push(err)
                }
                Err(err) => {
                    return ResolveOutcome {
                        change_wait,
                        failure: Some(err),
                    }
                }
            }
        }
        for err in &soft {
            log::trace!("step '{}': optional input unresolved: {err}", self.name);
        }
        ResolveOutcome {
            change_wait,
            failure: None,
        }
    }

    #[cfg(test)]
    fn resolved(&self) -> ResolvedInputs<'_> {
        ResolvedInputs::over(&self.inputs)
    }

    /// Reset cursors and resolved values, as on a restart.
    pub(crate) fn reset(&mut self) {
        for slot in &mut self.inputs {
            slot.reset();
        }
        self.pacer.reset();
    }
}

// ── StepBuilder ──────────────────────────────────────────────────

/// Builder for [`EvalStep`]; finished by [`build`](StepBuilder::build),
/// which performs all graph-construction validation.
pub struct StepBuilder<G, O> {
    name: String,
    initializer: Option<Initializer>,
    generator: Option<Generator<G>>,
    body: StepBody<G, O>,
    inputs: Vec<Box<dyn InputSlot>>,
    output: Option<OutputPort<O>>,
    read_timeout: Option<Duration>,
    pacer: Pacer,
    on_report: Option<ReportFn>,
}

impl<G, O> StepBuilder<G, O> {
    fn new(name: impl Into<String>, generator: Option<Generator<G>>, body: StepBody<G, O>) -> Self {
        Self {
            name: name.into(),
            initializer: None,
            generator,
            body,
            inputs: Vec::new(),
            output: None,
            read_timeout: None,
            pacer: Pacer::unpaced(),
            on_report: None,
        }
    }

    /// One-time initializer, run before the first iteration.
    pub fn initializer<F>(mut self, init: F) -> Self
    where
        F: FnOnce() -> Result<(), EvalError> + Send + 'static,
    {
        self.initializer = Some(Box::new(init));
        self
    }

    /// Declare a prerequisite: read `buffer` under `policy`.
    ///
    /// Prerequisites resolve in declaration order; step bodies index
    /// [`ResolvedInputs`] in the same order.
    pub fn reads<T: Clone + Send + 'static>(
        mut self,
        buffer: &Arc<SyncBuffer<T>>,
        policy: Consumption,
    ) -> Self {
        self.inputs.push(Box::new(Input {
            buffer: Arc::clone(buffer),
            policy,
            cursor: ReadCursor::new(),
            value: None,
        }));
        self
    }

    /// Declare the output buffer (overwrite enabled, no write skip).
    pub fn output(mut self, buffer: &Arc<SyncBuffer<O>>) -> Self
    where
        O: Clone + Send + 'static,
    {
        self.output = Some(OutputPort {
            buffer: Arc::clone(buffer),
            overwrite: true,
            skip: 0,
        });
        self
    }

    /// Disable overwrite: writes to an occupied slot are dropped.
    pub fn keep_first(mut self) -> Self {
        if let Some(port) = self.output.as_mut() {
            port.overwrite = false;
        }
        self
    }

    /// Throttle the output: drop `skip` produced values between applied
    /// writes.
    pub fn skip(mut self, skip: u32) -> Self {
        if let Some(port) = self.output.as_mut() {
            port.skip = skip;
        }
        self
    }

    /// Default read timeout for prerequisites without their own.
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = Some(timeout);
        self
    }

    /// Pace the iteration loop.
    pub fn pacer(mut self, pacer: Pacer) -> Self {
        self.pacer = pacer;
        self
    }

    /// Per-iteration diagnostics callback.
    pub fn on_report<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&EvalReport) + Send + 'static,
    {
        self.on_report = Some(Box::new(callback));
        self
    }

    /// Validate and finish the step.
    pub fn build(self) -> Result<EvalStep<G, O>, ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyStepName);
        }
        if self.pacer.bound().is_some_and(|b| b.is_zero()) {
            return Err(ConfigError::ZeroInterval {
                step: self.name,
            });
        }
        if self.read_timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::ZeroTimeout { step: self.name });
        }
        for slot in &self.inputs {
            if let Err(reason) = slot.policy().validate() {
                return Err(ConfigError::InvalidPolicy {
                    step: self.name.clone(),
                    buffer: slot.buffer_name().to_string(),
                    reason,
                });
            }
        }
        if self.body.is_calculate() && self.output.is_none() {
            return Err(ConfigError::MissingOutput { step: self.name });
        }
        if self.generator.is_none() && self.inputs.is_empty() && self.initializer.is_none() {
            return Err(ConfigError::IdleStep { step: self.name });
        }
        Ok(EvalStep {
            name: self.name,
            initializer: self.initializer,
            generator: self.generator,
            body: self.body,
            inputs: self.inputs,
            output: self.output,
            read_timeout: self.read_timeout,
            pacer: self.pacer,
            on_report: self.on_report,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tactus_core::policy::ReuseBudget;

    #[test]
    fn source_step_builds() {
        let out = Arc::new(SyncBuffer::new("ticks"));
        let mut n = 0u64;
        let step = EvalStep::source("counter", move || {
            n += 1;
            Ok(n)
        })
        .output(&out)
        .build()
        .unwrap();
        assert_eq!(step.name(), "counter");
    }

    #[test]
    fn calculator_without_output_is_rejected() {
        let input = Arc::new(SyncBuffer::<u64>::new("in"));
        let err = EvalStep::calculate("double", |inputs| {
            Ok(*inputs.get::<u64>(0)? * 2)
        })
        .reads(&input, Consumption::exclusive())
        .build()
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingOutput { step: "double".into() });
    }

    #[test]
    fn empty_name_is_rejected() {
        let out = Arc::new(SyncBuffer::new("out"));
        let err = EvalStep::source("", || Ok(1u32)).output(&out).build().unwrap_err();
        assert_eq!(err, ConfigError::EmptyStepName);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let out = Arc::new(SyncBuffer::new("out"));
        let err = EvalStep::source("ticker", || Ok(1u32))
            .output(&out)
            .pacer(Pacer::interval(Duration::ZERO))
            .build()
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroInterval { step: "ticker".into() });
    }

    #[test]
    fn invalid_policy_is_rejected_with_buffer_name() {
        let input = Arc::new(SyncBuffer::<u64>::new("positions"));
        let err = EvalStep::evaluate("render", |_| Ok(()))
            .reads(
                &input,
                Consumption::exclusive().with_timeout(Duration::ZERO),
            )
            .build()
            .unwrap_err();
        match err {
            ConfigError::InvalidPolicy { step, buffer, .. } => {
                assert_eq!(step, "render");
                assert_eq!(buffer, "positions");
            }
            other => panic!("expected InvalidPolicy, got {other:?}"),
        }
    }

    #[test]
    fn idle_step_is_rejected() {
        let err = EvalStep::evaluate("noop", |_| Ok(())).build().unwrap_err();
        assert_eq!(err, ConfigError::IdleStep { step: "noop".into() });
    }

    #[test]
    fn resolution_captures_values_in_declaration_order() {
        let a = Arc::new(SyncBuffer::new("a"));
        let b = Arc::new(SyncBuffer::new("b"));
        a.write(3u64, true, 0);
        b.write(vec![1.0f32, 2.0], true, 0);

        let out = Arc::new(SyncBuffer::new("out"));
        let mut step = EvalStep::calculate("combine", |inputs| {
            let scale = *inputs.get::<u64>(0)?;
            let data = inputs.get::<Vec<f32>>(1)?;
            Ok(data.iter().map(|v| v * scale as f32).collect::<Vec<_>>())
        })
        .reads(&a, Consumption::default())
        .reads(&b, Consumption::default())
        .output(&out)
        .build()
        .unwrap();

        let outcome = step.resolve_inputs(&|| true);
        assert!(outcome.failure.is_none());
        let inputs = step.resolved();
        assert_eq!(*inputs.get::<u64>(0).unwrap(), 3);
        assert_eq!(inputs.get::<Vec<f32>>(1).unwrap(), &vec![1.0, 2.0]);
    }

    #[test]
    fn wrong_type_downcast_is_an_eval_error() {
        let a = Arc::new(SyncBuffer::new("a"));
        a.write(1u64, true, 0);
        let mut step = EvalStep::evaluate("sink", |_| Ok(()))
            .reads(&a, Consumption::default())
            .build()
            .unwrap();
        step.resolve_inputs(&|| true);
        let inputs = step.resolved();
        assert!(matches!(
            inputs.get::<String>(0),
            Err(EvalError::InputType { index: 0, .. })
        ));
        assert!(matches!(
            inputs.get::<u64>(5),
            Err(EvalError::InputMissing { index: 5 })
        ));
    }

    #[test]
    fn required_failure_skips_optional_succeeds() {
        let present = Arc::new(SyncBuffer::new("present"));
        let absent = Arc::new(SyncBuffer::<u64>::new("absent"));
        present.write(1u64, true, 0);

        // Optional missing input: resolution still succeeds.
        let mut step = EvalStep::evaluate("sink", |_| Ok(()))
            .reads(&present, Consumption::default())
            .reads(&absent, Consumption::sampled().optional())
            .build()
            .unwrap();
        let outcome = step.resolve_inputs(&|| true);
        assert!(outcome.failure.is_none());
        assert!(step.resolved().try_get::<u64>(1).is_none());

        // Required missing input: resolution fails.
        let mut step = EvalStep::evaluate("sink2", |_| Ok(()))
            .reads(&absent, Consumption::sampled())
            .build()
            .unwrap();
        let outcome = step.resolve_inputs(&|| true);
        assert!(matches!(
            outcome.failure,
            Some(ResolveError::NeverWritten { .. })
        ));
    }

    #[test]
    fn overall_deadline_is_minimum_of_outstanding_timeouts() {
        // Two never-written buffers: the first read consumes the overall
        // 40ms budget, so the second (with its own 200ms timeout) must be
        // cut off by the remaining overall budget, not its own.
        let x = Arc::new(SyncBuffer::<u64>::new("x"));
        let y = Arc::new(SyncBuffer::<u64>::new("y"));
        let mut step = EvalStep::evaluate("sink", |_| Ok(()))
            .reads(&x, Consumption::exclusive().with_timeout(Duration::from_millis(40)))
            .reads(&y, Consumption::exclusive().with_timeout(Duration::from_millis(200)))
            .build()
            .unwrap();

        let start = Instant::now();
        let outcome = step.resolve_inputs(&|| true);
        let elapsed = start.elapsed();
        assert!(outcome.failure.is_some());
        assert!(
            elapsed < Duration::from_millis(150),
            "resolution overran the overall deadline: {elapsed:?}"
        );
    }

    #[test]
    fn reset_clears_cursors() {
        let a = Arc::new(SyncBuffer::new("a"));
        a.write(1u64, true, 0);
        let policy = Consumption {
            reuse_budget: ReuseBudget::Serves(0),
            reuse_tolerance: 0,
            ..Consumption::default()
        };
        let mut step = EvalStep::evaluate("sink", |_| Ok(()))
            .reads(&a, policy)
            .build()
            .unwrap();

        assert!(step.resolve_inputs(&|| true).failure.is_none());
        // Second serve of the same version: stale.
        assert!(step.resolve_inputs(&|| true).failure.is_some());
        // A restart forgets the reuse bookkeeping.
        step.reset();
        assert!(step.resolve_inputs(&|| true).failure.is_none());
    }
}
