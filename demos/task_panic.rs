use futures_fanout::{CancelSignal, ExecutorError, FanoutExecutor, Task, TaskError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Task Panic Example ---");

  let executor = FanoutExecutor::<String>::new(1, Handle::current(), "panic_fanout");

  executor
    .register(Task::new(|| async {
      info!("Panicking Task: Starting...");
      tokio::time::sleep(Duration::from_millis(100)).await;
      if true {
        info!("Panicking Task: About to panic!");
        panic!("This task is designed to panic!");
      }
      Ok::<Vec<String>, TaskError>(Vec::new())
    }))
    .expect("Failed to register panicking task");

  executor
    .register(Task::single(|| async { Ok::<_, TaskError>("Survivor finished".to_string()) }))
    .expect("Failed to register task");

  let outcome = executor
    .run_all(&CancelSignal::new())
    .await
    .expect("Run could not start");

  info!("Results: {:?}", outcome.items());
  for err in outcome.error().map(|e| e.errors()).unwrap_or_default() {
    match err {
      ExecutorError::TaskPanicked { index } => info!("Task {} correctly reported as panicked.", index),
      other => info!("Unexpected error: {}", other),
    }
  }
  info!("Free slots after run: {}", executor.available_slots());
  info!("--- Task Panic Example End ---");
}
