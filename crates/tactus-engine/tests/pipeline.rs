//! End-to-end pipeline scenarios: physics → raster → render style graphs
//! with mixed consumption policies, timeout and staleness handling, write
//! throttling, and lifecycle control across a whole engine.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tactus_core::policy::{Consumption, ReuseBudget};
use tactus_core::{EvalError, IterationOutcome, ResolveError};
use tactus_engine::{Engine, EvalStep, Pacer, RunnableState, SyncBuffer};
use tactus_test_utils::{counter_source, recording_sink_step, RecordingSink, ReportCollector};

const TICK: Duration = Duration::from_millis(5);

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn three_stage_pipeline_flows_end_to_end() {
    // physics: emits position vectors at a fixed rate.
    // raster: consumes each fresh position set exclusively, scales it.
    // render: best-effort samples whatever the rasterizer last produced.
    let positions = Arc::new(SyncBuffer::new("positions"));
    let frame = Arc::new(SyncBuffer::new("frame"));
    let rendered: RecordingSink<Vec<f32>> = RecordingSink::new();

    let mut engine = Engine::new();

    let mut t = 0.0f32;
    engine
        .register(
            EvalStep::source("physics", move || {
                t += 1.0;
                Ok(vec![t, t * 2.0])
            })
            .output(&positions)
            .pacer(Pacer::interval(TICK))
            .build()
            .unwrap(),
        )
        .unwrap();

    engine
        .register(
            EvalStep::calculate("raster", |inputs| {
                let pos = inputs.get::<Vec<f32>>(0)?;
                Ok(pos.iter().map(|p| p * 10.0).collect::<Vec<f32>>())
            })
            .reads(
                &positions,
                Consumption::exclusive().with_timeout(Duration::from_millis(500)),
            )
            .output(&frame)
            .build()
            .unwrap(),
        )
        .unwrap();

    engine
        .register(recording_sink_step(
            "render",
            &frame,
            Consumption::sampled(),
            &rendered,
        ))
        .unwrap();

    // Render pacing keeps the dirty sampler from spinning hot.
    // (The sink step from test-utils is unpaced; give the pipeline a
    // moment and check the data that flowed through.)
    engine.start_all();
    wait_until("rendered frames", || rendered.len() >= 5);
    engine.stop_all();

    // Every rendered frame is a scaled physics emission: [10t, 20t].
    for frame in rendered.snapshot() {
        assert_eq!(frame.len(), 2);
        assert!((frame[1] - frame[0] * 2.0).abs() < f32::EPSILON * 100.0);
    }
    let report = engine.shutdown();
    assert!(report.clean(), "unexpected faults: {:?}", report.faults);
}

#[test]
fn exclusive_consumer_sees_each_version_once_in_order() {
    let feed = Arc::new(SyncBuffer::new("feed"));
    let seen: RecordingSink<u64> = RecordingSink::new();

    // Consumer registered (and so started) first: it pends on the empty
    // buffer before the producer's first write can race past it.
    let mut engine = Engine::new();
    engine
        .register(recording_sink_step(
            "drain",
            &feed,
            Consumption::exclusive().with_timeout(Duration::from_millis(500)),
            &seen,
        ))
        .unwrap();
    engine.register(counter_source("ticker", &feed, TICK)).unwrap();

    engine.by_name("drain").unwrap().start();
    thread::sleep(Duration::from_millis(20));
    engine.by_name("ticker").unwrap().start();
    wait_until("ten values", || seen.len() >= 10);
    engine.stop_all();

    // Strictly increasing: exclusive consumption never re-serves a
    // version; an on-change poller faster than the producer drops none.
    let values = seen.snapshot();
    for pair in values.windows(2) {
        assert!(pair[0] < pair[1], "out of order or re-served: {values:?}");
    }
    assert_eq!(values[0], 1, "warm-up lost the first version");
}

#[test]
fn read_timeout_skips_iteration_and_reports_non_punctual() {
    let silent: Arc<SyncBuffer<u64>> = Arc::new(SyncBuffer::new("silent"));
    let reports = ReportCollector::new();

    let step = EvalStep::evaluate("starved", |_| Ok(()))
        .reads(
            &silent,
            Consumption::exclusive().with_timeout(Duration::from_millis(50)),
        )
        .on_report(reports.callback())
        .build()
        .unwrap();

    let mut engine = Engine::new();
    engine.register(step).unwrap();
    engine.start_all();

    let report = reports
        .recv(Duration::from_secs(2))
        .expect("a report despite the starved input");
    assert!(!report.punctual);
    match &report.outcome {
        IterationOutcome::Skipped(ResolveError::Timeout { buffer, waited }) => {
            assert_eq!(buffer, "silent");
            assert!(*waited >= Duration::from_millis(50));
            assert!(*waited < Duration::from_millis(500), "waited {waited:?}");
        }
        other => panic!("expected a timeout skip, got {other:?}"),
    }
    // Non-fatal: the worker keeps iterating (and keeps timing out).
    assert!(reports.recv(Duration::from_secs(2)).is_some());
    assert_eq!(
        engine.by_name("starved").unwrap().state(),
        RunnableState::Running
    );
}

#[test]
fn reuse_budget_caps_consecutive_serves_of_one_version() {
    let feed = Arc::new(SyncBuffer::new("feed"));
    feed.write(7u64, true, 0);

    let seen: RecordingSink<u64> = RecordingSink::new();
    let policy = Consumption {
        reuse_budget: ReuseBudget::Serves(1),
        reuse_tolerance: u32::MAX,
        ..Consumption::default()
    };

    let sink = seen.clone();
    let step = EvalStep::evaluate("sampler", move |inputs| {
        sink.record(*inputs.get::<u64>(0)?);
        Ok(())
    })
    .reads(&feed, policy)
    .pacer(Pacer::interval(TICK))
    .build()
    .unwrap();

    let mut engine = Engine::new();
    engine.register(step).unwrap();
    engine.start_all();

    // Serves(1): version 1 satisfies at most 2 consecutive iterations.
    thread::sleep(TICK * 12);
    assert_eq!(seen.snapshot(), vec![7, 7]);

    // A fresh version resets the accounting.
    feed.write(8u64, true, 0);
    wait_until("fresh serves", || seen.len() >= 4);
    engine.stop_all();
    assert_eq!(seen.snapshot(), vec![7, 7, 8, 8]);
}

#[test]
fn restart_resets_reuse_cursors_and_serves_again() {
    let feed = Arc::new(SyncBuffer::new("feed"));
    feed.write(3u64, true, 0);

    let seen: RecordingSink<u64> = RecordingSink::new();
    let policy = Consumption {
        reuse_budget: ReuseBudget::Serves(0),
        reuse_tolerance: u32::MAX,
        ..Consumption::default()
    };

    let sink = seen.clone();
    let step = EvalStep::evaluate("sampler", move |inputs| {
        sink.record(*inputs.get::<u64>(0)?);
        Ok(())
    })
    .reads(&feed, policy)
    .pacer(Pacer::interval(TICK))
    .build()
    .unwrap();

    let mut engine = Engine::new();
    let id = engine.register(step).unwrap();
    engine.start_all();

    // Serves(0): exactly one serve, then stale skips.
    wait_until("first serve", || seen.len() == 1);
    thread::sleep(TICK * 8);
    assert_eq!(seen.len(), 1);

    // Restart forgets the cursor: the same version serves once more.
    let worker = engine.handle(id).unwrap();
    assert!(worker.restart());
    wait_until("post-restart serve", || seen.len() == 2);
    engine.stop_all();
    assert_eq!(seen.snapshot(), vec![3, 3]);
}

#[test]
fn output_skip_throttles_every_run_of_writes() {
    let out = Arc::new(SyncBuffer::new("thinned"));

    // Producer emits every tick, output skips 2 of every 3 writes.
    let mut n = 0u64;
    let step = EvalStep::source("dense", move || {
        n += 1;
        Ok(n)
    })
    .output(&out)
    .skip(2)
    .pacer(Pacer::interval(TICK))
    .build()
    .unwrap();

    let mut engine = Engine::new();
    engine.register(step).unwrap();
    engine.start_all();
    wait_until("two applied writes", || out.version() >= 2);
    engine.stop_all();

    // First applied value is the third produced one.
    let (value, version) = out.peek().unwrap();
    assert_eq!(value % 3, 0, "throttle applied a non-third write: {value}");
    assert!(version < value, "more versions than produced values");
}

#[test]
fn dirty_sampler_warms_up_after_producer_starts() {
    let frame: Arc<SyncBuffer<u64>> = Arc::new(SyncBuffer::new("frame"));
    let reports = ReportCollector::new();
    let seen: RecordingSink<u64> = RecordingSink::new();

    let sink = seen.clone();
    let step = EvalStep::evaluate("render", move |inputs| {
        sink.record(*inputs.get::<u64>(0)?);
        Ok(())
    })
    .reads(&frame, Consumption::sampled())
    .pacer(Pacer::interval(TICK))
    .on_report(reports.callback())
    .build()
    .unwrap();

    let mut engine = Engine::new();
    engine.register(step).unwrap();
    engine.start_all();

    // Warm-up: the buffer has never been written, so iterations skip
    // with NeverWritten — expected and non-fatal.
    let warmup = reports
        .wait_for(Duration::from_secs(2), |r| !r.punctual)
        .expect("warm-up skip report");
    assert!(matches!(
        warmup.outcome,
        IterationOutcome::Skipped(ResolveError::NeverWritten { .. })
    ));

    frame.write(42, true, 0);
    wait_until("first rendered sample", || !seen.is_empty());
    engine.stop_all();
    assert_eq!(seen.snapshot()[0], 42);
}

#[test]
fn evaluator_fault_is_isolated_from_the_rest_of_the_graph() {
    let healthy_out = Arc::new(SyncBuffer::new("healthy"));
    let doomed_out: Arc<SyncBuffer<u64>> = Arc::new(SyncBuffer::new("doomed"));

    let mut engine = Engine::new();
    engine
        .register(counter_source("healthy", &healthy_out, TICK))
        .unwrap();

    let mut n = 0u64;
    engine
        .register(
            EvalStep::source("doomed", move || {
                n += 1;
                if n >= 2 {
                    Err(EvalError::failed("doomed", "second call explodes"))
                } else {
                    Ok(n)
                }
            })
            .output(&doomed_out)
            .pacer(Pacer::interval(TICK))
            .build()
            .unwrap(),
        )
        .unwrap();

    engine.start_all();
    wait_until("doomed worker to stop", || {
        engine.by_name("doomed").unwrap().state() == RunnableState::Stopped
    });

    // Other steps continue unaffected.
    let v = healthy_out.version();
    wait_until("healthy progress after the fault", || {
        healthy_out.version() > v
    });

    let report = engine.shutdown();
    assert_eq!(report.total, 2);
    assert_eq!(report.joined, 2);
    let faults: Vec<_> = report.faulted().collect();
    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].0, "doomed");
}

#[test]
fn shutdown_releases_an_unbounded_starved_consumer() {
    // Exclusive with no read timeout is the unbounded wait: nothing ever
    // writes the buffer, so the consumer blocks inside the read. Shutdown
    // must still stop, join, and report clean.
    let silent: Arc<SyncBuffer<u64>> = Arc::new(SyncBuffer::new("silent"));
    let seen: RecordingSink<u64> = RecordingSink::new();

    let mut engine = Engine::new();
    engine
        .register(recording_sink_step(
            "drain",
            &silent,
            Consumption::exclusive(),
            &seen,
        ))
        .unwrap();
    engine.start_all();
    thread::sleep(Duration::from_millis(60));

    let begun = Instant::now();
    let report = engine.shutdown();
    assert!(report.clean(), "unexpected faults: {:?}", report.faults);
    assert!(
        begun.elapsed() < Duration::from_secs(3),
        "shutdown stalled behind the starved read for {:?}",
        begun.elapsed()
    );
    assert!(seen.is_empty());
}

#[test]
fn pause_all_preserves_phase_without_slip() {
    let out = Arc::new(SyncBuffer::new("paced"));
    let reports = ReportCollector::new();

    let mut n = 0u64;
    let step = EvalStep::source("paced", move || {
        n += 1;
        Ok(n)
    })
    .output(&out)
    .pacer(Pacer::interval(Duration::from_millis(20)))
    .on_report(reports.callback())
    .build()
    .unwrap();

    let mut engine = Engine::new();
    engine.register(step).unwrap();
    engine.start_all();
    wait_until("steady state", || out.version() >= 3);

    engine.pause_all();
    thread::sleep(Duration::from_millis(120));
    reports.drain();
    engine.resume_all();

    // The pause is deferred, not treated as slip: the first post-resume
    // iterations still pace at roughly one interval, never bursting.
    let first = reports
        .recv(Duration::from_secs(2))
        .expect("post-resume report");
    let second = reports
        .recv(Duration::from_secs(2))
        .expect("second post-resume report");
    assert!(second.iteration > first.iteration);
    assert!(
        second.pace_wait >= Duration::from_millis(10),
        "post-resume burst: pace_wait {:?}",
        second.pace_wait
    );
    engine.stop_all();
}
