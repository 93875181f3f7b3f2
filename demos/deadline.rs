use futures_fanout::{CancelSignal, FanoutExecutor, Task, TaskError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();

  info!("--- Deadline Example ---");

  let executor = FanoutExecutor::<String>::new(10, Handle::current(), "deadline_fanout");

  executor
    .register(Task::new(|| async { Ok::<_, TaskError>(vec!["Swordfish".to_string()]) }))
    .expect("Failed to register task");

  // Ignores cancellation: it keeps running (and holding its slot) after the run returns.
  executor
    .register(Task::new(|| async {
      tokio::time::sleep(Duration::from_secs(10)).await;
      Ok::<_, TaskError>(vec!["Marlin".to_string()])
    }))
    .expect("Failed to register task");

  let signal = CancelSignal::new().with_timeout(Duration::from_millis(100));
  let outcome = executor.run_all(&signal).await.expect("Run could not start");

  info!("Status: {:?}", outcome.status());
  info!("Partial results: {:?}", outcome.items());
  if let Some(err) = outcome.error() {
    info!("Aggregated error: {}", err);
  }
  info!(
    "Tasks still running after return: {}, free slots: {}",
    executor.active_task_count(),
    executor.available_slots()
  );
  info!("--- Deadline Example End ---");
}
