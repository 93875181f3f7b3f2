use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

/// The error type a task may fail with. Anything convertible into a boxed
/// error (including `&str` and `String`) can be returned from a task.
pub type TaskError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a single task invocation produced: zero or more items, and possibly an error.
///
/// Items are kept even when `error` is set.
#[derive(Debug)]
pub struct TaskOutcome<T> {
  pub items: Vec<T>,
  pub error: Option<TaskError>,
}

impl<T> TaskOutcome<T> {
  pub fn ok(items: Vec<T>) -> Self {
    Self { items, error: None }
  }

  pub fn failed(error: impl Into<TaskError>) -> Self {
    Self {
      items: Vec::new(),
      error: Some(error.into()),
    }
  }
}

type TaskFn<T> = dyn Fn() -> BoxFuture<'static, TaskOutcome<T>> + Send + Sync + 'static;

/// A unit of work registered with a `FanoutExecutor`.
///
/// Tasks take no arguments; inputs are captured by the closure. The closure is
/// invoked once per run, so the same task can be run again by a later run.
pub struct Task<T: Send + 'static> {
  func: Arc<TaskFn<T>>,
}

impl<T: Send + 'static> Clone for Task<T> {
  fn clone(&self) -> Self {
    Self { func: self.func.clone() }
  }
}

impl<T: Send + 'static> fmt::Debug for Task<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Task").finish_non_exhaustive()
  }
}

impl<T: Send + 'static> Task<T> {
  /// A task producing a sequence of items.
  pub fn new<F, Fut, E>(f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>, E>> + Send + 'static,
    E: Into<TaskError>,
  {
    Self::from_outcome_fn(move || {
      f().map(|res| match res {
        Ok(items) => TaskOutcome::ok(items),
        Err(e) => TaskOutcome::failed(e),
      })
    })
  }

  /// A task producing exactly one item on success.
  pub fn single<F, Fut, E>(f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    E: Into<TaskError>,
  {
    Self::from_outcome_fn(move || {
      f().map(|res| match res {
        Ok(item) => TaskOutcome::ok(vec![item]),
        Err(e) => TaskOutcome::failed(e),
      })
    })
  }

  /// A task that may report items and an error at the same time. Both are
  /// kept by the executor.
  pub fn partial<F, Fut>(f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
  {
    Self::from_outcome_fn(f)
  }

  /// A synchronous task. It runs on Tokio's blocking thread pool so it never
  /// stalls the runtime's worker threads.
  pub fn blocking<F, E>(f: F) -> Self
  where
    F: Fn() -> Result<Vec<T>, E> + Send + Sync + 'static,
    E: Into<TaskError> + Send + 'static,
  {
    let f = Arc::new(f);
    Self::from_outcome_fn(move || {
      let f = f.clone();
      async move {
        match tokio::task::spawn_blocking(move || (*f)()).await {
          Ok(Ok(items)) => TaskOutcome::ok(items),
          Ok(Err(e)) => TaskOutcome::failed(e),
          // Let the executor turn this into a TaskPanicked entry.
          Err(join_error) if join_error.is_panic() => std::panic::resume_unwind(join_error.into_panic()),
          Err(join_error) => TaskOutcome::failed(format!("blocking task did not complete: {}", join_error)),
        }
      }
    })
  }

  fn from_outcome_fn<F, Fut>(f: F) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
  {
    Self {
      func: Arc::new(move || f().boxed()),
    }
  }

  /// Invokes the task. The closure is called lazily, inside the returned
  /// future, so a panic in the closure body surfaces when the future is polled.
  pub(crate) fn execute(&self) -> impl Future<Output = TaskOutcome<T>> + Send + 'static {
    let func = self.func.clone();
    async move { func().await }
  }
}
