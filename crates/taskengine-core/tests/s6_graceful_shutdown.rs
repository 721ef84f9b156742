//! S6: graceful shutdown drains all outstanding work.

use std::sync::Arc;
use std::time::Duration;

use taskengine_core::engine::Engine;
use taskengine_core::error::TaskError;
use taskengine_core::future::{Outcome, WaitOutcome};
use taskengine_core::{EngineConfig, SubmitOptions};

fn engine_with(workers: usize) -> Arc<Engine> {
    let mut config = EngineConfig::default();
    config.workers = workers;
    config.min_workers = 0;
    config.max_workers = workers.max(config.max_workers);
    config.queue_capacity_total = 256;
    let engine = Engine::new(config);
    engine.start().unwrap();
    engine
}

#[test]
fn graceful_shutdown_drains_all_tasks() {
    let engine = engine_with(8);
    let mut handles = Vec::new();
    for _ in 0..100 {
        let handle = engine
            .submit(
                |_| {
                    std::thread::sleep(Duration::from_millis(50));
                    Ok::<(), TaskError>(())
                },
                SubmitOptions::default(),
            )
            .unwrap();
        handles.push(handle);
    }

    engine.stop(true, Some(Duration::from_secs(10))).unwrap();

    for handle in handles {
        assert!(matches!(
            handle.wait(Some(Duration::from_millis(10))),
            WaitOutcome::Ready(Outcome::Completed(_))
        ));
    }
    assert!(engine.stats().total_tasks_processed >= 100);
}
