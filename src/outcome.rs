use crate::error::RunError;

/// The terminal state a run ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
  /// Every dispatched task reported back and the collection channel closed.
  Completed,
  /// The signal had already fired when collection checked it; no results are returned.
  CancelledEmpty,
  /// The signal fired while results were being collected; everything collected so far is returned.
  CancelledPartial,
}

/// The result of `FanoutExecutor::run_all`.
///
/// Holds the items produced by all tasks, in completion order, together with
/// the aggregated error. Items are returned even when `error` is set.
#[derive(Debug)]
pub struct RunOutcome<T> {
  pub(crate) items: Vec<T>,
  pub(crate) error: Option<RunError>,
  pub(crate) status: RunStatus,
}

impl<T> RunOutcome<T> {
  pub fn items(&self) -> &[T] {
    &self.items
  }

  /// The joined task and cancellation errors. `None` when no task failed and
  /// the run was not cancelled.
  pub fn error(&self) -> Option<&RunError> {
    self.error.as_ref()
  }

  pub fn status(&self) -> RunStatus {
    self.status
  }

  pub fn is_cancelled(&self) -> bool {
    self.status != RunStatus::Completed
  }

  pub fn into_parts(self) -> (Vec<T>, Option<RunError>) {
    (self.items, self.error)
  }

  /// Converts into a `Result`, discarding the collected items when any error occurred.
  pub fn into_result(self) -> Result<Vec<T>, RunError> {
    match self.error {
      Some(err) => Err(err),
      None => Ok(self.items),
    }
  }
}
