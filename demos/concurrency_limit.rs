use futures_fanout::{CancelSignal, FanoutExecutor, Task, TaskError};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::info;

async fn long_task_fn(id: usize) -> Result<String, TaskError> {
  info!("Task {} starting (concurrency test - should take 1s)", id);
  tokio::time::sleep(Duration::from_secs(1)).await;
  let result = format!("Task {} finished", id);
  info!("{}", result);
  Ok(result)
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Concurrency Limit Example (Limit: 2) ---");

  let concurrency_limit = 2;
  let executor = FanoutExecutor::<String>::new(concurrency_limit, Handle::current(), "concurrency_fanout");

  let num_tasks = 5;
  info!(
    "Registering {} tasks, each takes 1 sec. With concurrency {}, this should take ~{} secs.",
    num_tasks,
    concurrency_limit,
    (num_tasks as f32 / concurrency_limit as f32).ceil()
  );

  for i in 0..num_tasks {
    if let Err(e) = executor.register(Task::single(move || long_task_fn(i))) {
      tracing::error!("Failed to register task {}: {}", i, e);
    }
  }

  let started = Instant::now();
  let outcome = executor
    .run_all(&CancelSignal::new())
    .await
    .expect("Run could not start");

  for item in outcome.items() {
    info!("Main: Received result: {}", item);
  }
  info!(
    "All tasks processed in {:.2}s with status {:?}.",
    started.elapsed().as_secs_f32(),
    outcome.status()
  );
  info!("--- Concurrency Limit Example End ---");
}
