//! S2: FIFO within priority.

use std::sync::Arc;
use std::time::Duration;

use taskengine_core::engine::Engine;
use taskengine_core::error::TaskError;
use taskengine_core::{EngineConfig, Priority, SubmitOptions};

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
fn fifo_within_priority() {
    let engine = engine_with(1);
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for label in ["A", "B", "C"] {
        let order = Arc::clone(&order);
        let handle = engine
            .submit(
                move |_| {
                    order.lock().push(label);
                    Ok::<(), TaskError>(())
                },
                SubmitOptions {
                    priority: Priority::Normal,
                    ..Default::default()
                },
            )
            .unwrap();
        handles.push(handle);
    }

    for handle in handles {
        handle.wait(Some(Duration::from_secs(2)));
    }

    assert_eq!(*order.lock(), vec!["A", "B", "C"]);
    engine.stop(false, None).unwrap();
}
