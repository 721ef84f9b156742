//! Demo harness for the background task engine: submits a priority-mixed
//! workload and prints the resulting stats snapshot.

use std::time::Duration;

use clap::{Parser, Subcommand};
use taskengine_core::{Engine, EngineConfig, Priority, SubmitOptions, TaskError};

#[derive(Parser)]
#[command(name = "taskengine", about = "Background task engine demo CLI")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Submit a demo workload across all four priority classes and print
    /// the resulting stats snapshot.
    Run {
        /// Total number of demo tasks to submit, split evenly across
        /// CRITICAL/HIGH/NORMAL/LOW.
        #[arg(long, default_value_t = 64)]
        tasks: usize,
        /// Override the default worker count.
        #[arg(long)]
        workers: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { tasks, workers } => run_demo(tasks, workers).await?,
    }
    Ok(())
}

async fn run_demo(task_count: usize, workers: Option<usize>) -> anyhow::Result<()> {
    let mut config = EngineConfig::default();
    if let Some(workers) = workers {
        config.workers = workers;
    }
    let engine = Engine::new(config);
    engine.start()?;
    tracing::info!(tasks = task_count, "engine started");

    let mut events = engine.subscribe_events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(?event, "engine event");
        }
    });

    let priorities = [
        Priority::Critical,
        Priority::High,
        Priority::Normal,
        Priority::Low,
    ];
    let mut handles = Vec::with_capacity(task_count);
    for i in 0..task_count {
        let priority = priorities[i % priorities.len()];
        let handle = engine.submit(
            move |_token| {
                std::thread::sleep(Duration::from_millis(5));
                Ok::<usize, TaskError>(i)
            },
            SubmitOptions {
                priority,
                ..Default::default()
            },
        )?;
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.wait(Some(Duration::from_secs(10)));
    }

    let snapshot = engine.stats();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    engine.stop(true, Some(Duration::from_secs(5)))?;
    tracing::info!("engine stopped");
    Ok(())
}
