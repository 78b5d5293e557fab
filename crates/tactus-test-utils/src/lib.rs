//! Test utilities and stock fixtures for Tactus development.
//!
//! Provides ready-made generators, sinks, and diagnostics collectors for
//! wiring small pipelines in integration tests: a [`counter`] source, a
//! [`RecordingSink`] for captured values, and a [`ReportCollector`] that
//! funnels per-iteration [`EvalReport`]s across threads.

#![forbid(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

use tactus_core::policy::Consumption;
use tactus_core::{EvalError, EvalReport};
use tactus_engine::{EvalStep, Pacer, SyncBuffer};

/// A monotone `u64` generator closure: yields 1, 2, 3, …
///
/// The canonical source body for pipeline tests.
pub fn counter() -> impl FnMut() -> Result<u64, EvalError> + Send + 'static {
    let mut n = 0u64;
    move || {
        n += 1;
        Ok(n)
    }
}

/// A generator that fails on its `n`-th call and counts up until then.
pub fn failing_counter(
    fail_at: u64,
    step_name: &str,
) -> impl FnMut() -> Result<u64, EvalError> + Send + 'static {
    let name = step_name.to_string();
    let mut n = 0u64;
    move || {
        n += 1;
        if n >= fail_at {
            Err(EvalError::failed(&name, format!("planned fault at call {n}")))
        } else {
            Ok(n)
        }
    }
}

/// Collects values received by a sink step, for later assertion.
///
/// Clone the handle into the step body; read back with
/// [`snapshot`](RecordingSink::snapshot) from the test thread.
#[derive(Clone)]
pub struct RecordingSink<T> {
    values: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for RecordingSink<T> {
    fn default() -> Self {
        Self {
            values: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> RecordingSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one received value.
    pub fn record(&self, value: T) {
        self.values.lock().unwrap().push(value);
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<T> {
        self.values.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.values.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A ready-built counter source step writing to `out` every `period`.
pub fn counter_source(
    name: &str,
    out: &Arc<SyncBuffer<u64>>,
    period: Duration,
) -> EvalStep<u64, u64> {
    EvalStep::source(name, counter())
        .output(out)
        .pacer(Pacer::interval(period))
        .build()
        .expect("counter source step")
}

/// A ready-built sink step recording everything it reads from `input`.
pub fn recording_sink_step<T: Clone + Send + 'static>(
    name: &str,
    input: &Arc<SyncBuffer<T>>,
    policy: Consumption,
    sink: &RecordingSink<T>,
) -> EvalStep<(), ()> {
    let sink = sink.clone();
    EvalStep::evaluate(name, move |inputs| {
        sink.record(inputs.get::<T>(0)?.clone());
        Ok(())
    })
    .reads(input, policy)
    .build()
    .expect("recording sink step")
}

/// Funnels [`EvalReport`]s from step callbacks to the test thread.
///
/// The sender side is cheap to clone into an `on_report` callback; the
/// collector end drains with a bounded wait so a stalled pipeline fails
/// the test instead of hanging it.
pub struct ReportCollector {
    tx: Sender<EvalReport>,
    rx: Receiver<EvalReport>,
}

impl ReportCollector {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// An `on_report` callback feeding this collector.
    pub fn callback(&self) -> impl FnMut(&EvalReport) + Send + 'static {
        let tx = self.tx.clone();
        move |report| {
            let _ = tx.send(report.clone());
        }
    }

    /// Next report, waiting up to `timeout`.
    pub fn recv(&self, timeout: Duration) -> Option<EvalReport> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Everything currently queued, without waiting.
    pub fn drain(&self) -> Vec<EvalReport> {
        self.rx.try_iter().collect()
    }

    /// Wait until a report matching `pred` arrives, up to `timeout` in
    /// total. Reports that do not match are discarded.
    pub fn wait_for(
        &self,
        timeout: Duration,
        mut pred: impl FnMut(&EvalReport) -> bool,
    ) -> Option<EvalReport> {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.checked_duration_since(std::time::Instant::now())?;
            let report = self.rx.recv_timeout(remaining).ok()?;
            if pred(&report) {
                return Some(report);
            }
        }
    }
}

impl Default for ReportCollector {
    fn default() -> Self {
        Self::new()
    }
}
