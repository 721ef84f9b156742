//! S1: a task already running at a lower priority finishes undisturbed,
//! but tasks queued behind it dispatch in strict priority order once a
//! worker frees up.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::time::Duration;

use taskengine_core::engine::Engine;
use taskengine_core::error::TaskError;
use taskengine_core::{EngineConfig, Priority, SubmitOptions};

fn engine_with(workers: usize) -> Arc<Engine> {
    let mut config = EngineConfig::default();
    config.workers = workers;
    config.min_workers = 0;
    config.max_workers = workers.max(config.max_workers);
    config.queue_capacity_total = 64;
    let engine = Engine::new(config);
    engine.start().unwrap();
    engine
}

#[test]
fn priority_preemption_s1() {
    let engine = engine_with(1);

    let started = Arc::new(Barrier::new(2));
    let release = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let order = Arc::new(parking_lot::Mutex::new(Vec::<&'static str>::new()));

    let started_clone = Arc::clone(&started);
    let release_clone = Arc::clone(&release);
    let _t0 = engine
        .submit(
            move |_| {
                started_clone.wait();
                while !release_clone.load(Ordering::Acquire) {
                    std::thread::sleep(Duration::from_millis(2));
                }
                Ok::<(), TaskError>(())
            },
            SubmitOptions {
                priority: Priority::Normal,
                ..Default::default()
            },
        )
        .unwrap();
    started.wait();

    let o1 = Arc::clone(&order);
    let _t1 = engine
        .submit(
            move |_| {
                o1.lock().push("low");
                Ok::<(), TaskError>(())
            },
            SubmitOptions {
                priority: Priority::Low,
                ..Default::default()
            },
        )
        .unwrap();
    let o2 = Arc::clone(&order);
    let _t2 = engine
        .submit(
            move |_| {
                o2.lock().push("critical");
                Ok::<(), TaskError>(())
            },
            SubmitOptions {
                priority: Priority::Critical,
                ..Default::default()
            },
        )
        .unwrap();
    let o3 = Arc::clone(&order);
    let _t3 = engine
        .submit(
            move |_| {
                o3.lock().push("high");
                Ok::<(), TaskError>(())
            },
            SubmitOptions {
                priority: Priority::High,
                ..Default::default()
            },
        )
        .unwrap();

    release.store(true, Ordering::Release);
    std::thread::sleep(Duration::from_millis(200));

    assert_eq!(*order.lock(), vec!["critical", "high", "low"]);
    engine.stop(false, None).unwrap();
}
