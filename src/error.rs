use crate::task::TaskError;

use std::fmt;

use thiserror::Error;

/// Errors that can occur within the `futures_fanout` executor.
#[derive(Error, Debug)]
pub enum ExecutorError {
  #[error("no tasks to do")]
  NoTasks,

  #[error("executor is already running")]
  AlreadyRunning,

  #[error("executor no longer accepts tasks: a run has already started")]
  InvalidState,

  #[error("task {index} failed: {source}")]
  Task { index: usize, source: TaskError },

  #[error("task {index} panicked")]
  TaskPanicked { index: usize },

  #[error("context canceled")]
  Cancelled,

  #[error("context deadline exceeded")]
  DeadlineExceeded,
}

impl ExecutorError {
  /// Returns `true` for the errors produced by a fired `CancelSignal`.
  pub fn is_cancellation(&self) -> bool {
    matches!(self, ExecutorError::Cancelled | ExecutorError::DeadlineExceeded)
  }

  /// Index of the task this error is attributed to, if any.
  pub fn task_index(&self) -> Option<usize> {
    match self {
      ExecutorError::Task { index, .. } | ExecutorError::TaskPanicked { index } => Some(*index),
      _ => None,
    }
  }
}

/// The aggregated error of one run: every task error in completion order,
/// followed by the cancellation error when the run was cut short.
///
/// Displays one error per line.
#[derive(Debug)]
pub struct RunError {
  errors: Vec<ExecutorError>,
}

impl RunError {
  /// Joins `errors` into a single value. Returns `None` for an empty list.
  pub(crate) fn join(errors: Vec<ExecutorError>) -> Option<Self> {
    if errors.is_empty() {
      None
    } else {
      Some(Self { errors })
    }
  }

  /// The joined errors: task errors in completion order, cancellation last.
  pub fn errors(&self) -> &[ExecutorError] {
    &self.errors
  }

  /// Takes ownership of the joined errors, e.g. to match on task sources.
  pub fn into_errors(self) -> Vec<ExecutorError> {
    self.errors
  }

  pub fn len(&self) -> usize {
    self.errors.len()
  }

  /// Always `false` for a `RunError` handed out by the executor, which never
  /// reports an empty join.
  pub fn is_empty(&self) -> bool {
    self.errors.is_empty()
  }

  /// Returns the cancellation error joined into this run error, if any.
  pub fn cancellation(&self) -> Option<&ExecutorError> {
    self.errors.iter().find(|e| e.is_cancellation())
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancellation().is_some()
  }

  /// Iterates over the errors returned by tasks (panics included), skipping cancellation.
  pub fn task_errors(&self) -> impl Iterator<Item = &ExecutorError> {
    self.errors.iter().filter(|e| !e.is_cancellation())
  }
}

impl fmt::Display for RunError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, err) in self.errors.iter().enumerate() {
      if i > 0 {
        f.write_str("\n")?;
      }
      write!(f, "{}", err)?;
    }
    Ok(())
  }
}

impl std::error::Error for RunError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    self.errors.first().map(|e| e as &(dyn std::error::Error + 'static))
  }
}
