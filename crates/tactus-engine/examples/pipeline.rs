//! Tactus pipeline demo — a three-stage paced dataflow from scratch.
//!
//! Demonstrates:
//!   1. Creating shared versioned buffers
//!   2. Declaring a source, a transform, and a best-effort sink
//!   3. Mixing consumption policies (exclusive, dirty sample)
//!   4. Per-iteration diagnostics via the report callback
//!   5. Group lifecycle control and engine shutdown
//!
//! Run with:
//!   cargo run --example pipeline

use std::sync::Arc;
use std::time::Duration;

use tactus_core::policy::Consumption;
use tactus_engine::{Engine, EvalStep, Pacer, SyncBuffer};

// ─── Stage rates ────────────────────────────────────────────────

const PHYSICS_TICK: Duration = Duration::from_millis(16);
const RENDER_TICK: Duration = Duration::from_millis(33);
const RUN_FOR: Duration = Duration::from_secs(2);

fn main() {
    env_logger::init();

    // Hand-off buffers between the stages.
    let positions = Arc::new(SyncBuffer::new("positions"));
    let frame = Arc::new(SyncBuffer::new("frame"));

    let mut engine = Engine::new();

    // Stage 1 — physics: a toy oscillator emitting positions at ~60 Hz.
    let mut t = 0.0f64;
    engine
        .register(
            EvalStep::source("physics", move || {
                t += 0.016;
                let n = 8;
                Ok((0..n)
                    .map(|i| (t + f64::from(i) * 0.7).sin())
                    .collect::<Vec<f64>>())
            })
            .output(&positions)
            .pacer(Pacer::interval(PHYSICS_TICK))
            .build()
            .expect("physics step"),
        )
        .expect("register physics");

    // Stage 2 — raster: consumes every fresh position set exclusively
    // and quantizes it into a byte row.
    engine
        .register(
            EvalStep::calculate("raster", |inputs| {
                let pos = inputs.get::<Vec<f64>>(0)?;
                Ok(pos
                    .iter()
                    .map(|p| ((p + 1.0) * 127.5) as u8)
                    .collect::<Vec<u8>>())
            })
            .reads(
                &positions,
                Consumption::exclusive().with_timeout(Duration::from_millis(250)),
            )
            .output(&frame)
            .build()
            .expect("raster step"),
        )
        .expect("register raster");

    // Stage 3 — render: samples whatever frame the rasterizer last
    // produced at ~30 Hz, tolerating staleness, and prints diagnostics.
    engine
        .register(
            EvalStep::evaluate("render", |inputs| {
                let row = inputs.get::<Vec<u8>>(0)?;
                let line: String = row
                    .iter()
                    .map(|v| match v / 52 {
                        0 => ' ',
                        1 => '.',
                        2 => 'o',
                        3 => 'O',
                        _ => '@',
                    })
                    .collect();
                println!("frame |{line}|");
                Ok(())
            })
            .reads(&frame, Consumption::sampled())
            .pacer(Pacer::interval(RENDER_TICK))
            .on_report(|report| {
                if !report.punctual {
                    println!(
                        "render iteration {} skipped (warm-up or starved)",
                        report.iteration
                    );
                }
            })
            .build()
            .expect("render step"),
        )
        .expect("register render");

    engine.start_all();
    std::thread::sleep(RUN_FOR);

    let report = engine.shutdown();
    println!(
        "shutdown: {}/{} joined in {} ms, {} faults",
        report.joined,
        report.total,
        report.total_ms,
        report.faults.len()
    );
}
