use futures_fanout::{CancelSignal, FanoutExecutor, Task, TaskError};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[derive(Debug, Clone)]
struct Catch {
  fish_name: String,
}

fn catch_of(names: &[&str]) -> Vec<Catch> {
  names
    .iter()
    .map(|name| Catch {
      fish_name: name.to_string(),
    })
    .collect()
}

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false) // Disable module paths for cleaner example output
    .init();

  info!("--- Basic Usage Example ---");

  let executor = FanoutExecutor::<Catch>::new(2, Handle::current(), "basic_fanout");

  executor
    .register(Task::new(|| async {
      Ok::<_, TaskError>(catch_of(&["Salmon", "Tuna", "Trout", "Cod"]))
    }))
    .expect("Failed to register task");

  // A task is allowed to find nothing.
  executor
    .register(Task::new(|| async { Ok::<_, TaskError>(Vec::new()) }))
    .expect("Failed to register task");

  executor
    .register(Task::new(|| async {
      tokio::time::sleep(Duration::from_millis(250)).await;
      Ok::<_, TaskError>(catch_of(&["Swordfish", "Marlin", "Barracuda", "Mahi Mahi", "Wahoo", "Kingfish"]))
    }))
    .expect("Failed to register task");

  let signal = CancelSignal::new().with_timeout(Duration::from_secs(1));

  match executor.run_all(&signal).await {
    Ok(outcome) => match outcome.into_result() {
      Ok(catches) => {
        let names: Vec<&str> = catches.iter().map(|c| c.fish_name.as_str()).collect();
        info!("Results ({}): {:?}", names.len(), names);
      }
      Err(e) => info!("Run failed:\n{}", e),
    },
    Err(e) => tracing::error!("Run could not start: {}", e),
  }

  info!("--- Basic Usage Example End ---");
}
