use crate::error::ExecutorError;

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CancelCause {
  Cancelled,
  DeadlineExceeded,
}

/// A caller-owned cancellation signal with an optional deadline.
///
/// Clones share the same underlying token: cancelling any clone fires all of
/// them. Once fired, a signal stays fired. `error()` reports why it fired,
/// either an explicit `cancel()` or the deadline passing.
///
/// Adding a deadline derives a new signal backed by a child token, so a
/// shorter deadline never fires the signal it was derived from, while
/// cancelling the parent still fires the derived one.
#[derive(Debug, Clone)]
pub struct CancelSignal {
  token: CancellationToken,
  deadline: Option<Instant>,
  cause: Arc<OnceLock<CancelCause>>,
}

impl Default for CancelSignal {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelSignal {
  /// A signal that only fires when `cancel()` is called.
  pub fn new() -> Self {
    Self::from_token(CancellationToken::new())
  }

  /// Wraps an existing token. Cancelling the token (or one of its parents)
  /// fires the signal with `ExecutorError::Cancelled`.
  pub fn from_token(token: CancellationToken) -> Self {
    Self {
      token,
      deadline: None,
      cause: Arc::new(OnceLock::new()),
    }
  }

  /// Derives a signal that also fires `timeout` from now. An earlier existing
  /// deadline is kept.
  pub fn with_timeout(self, timeout: Duration) -> Self {
    self.with_deadline(Instant::now() + timeout)
  }

  /// Derives a signal that also fires at `deadline`. An earlier existing
  /// deadline is kept. Other clones of `self` are unaffected by the new deadline.
  pub fn with_deadline(self, deadline: Instant) -> Self {
    Self {
      token: self.token.child_token(),
      deadline: Some(match self.deadline {
        Some(existing) => existing.min(deadline),
        None => deadline,
      }),
      cause: Arc::new(OnceLock::new()),
    }
  }

  pub fn deadline(&self) -> Option<Instant> {
    self.deadline
  }

  /// The token backing this signal. Tasks can clone it to observe the run's
  /// cancellation cooperatively. Deadline expiry is only propagated to the
  /// token once something observes the signal.
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  /// Fires the signal. Calling it more than once has no further effect. A
  /// deadline that already passed keeps reporting `DeadlineExceeded`.
  pub fn cancel(&self) {
    if self.error().is_some() {
      return;
    }
    if self.cause.set(CancelCause::Cancelled).is_ok() {
      debug!("CancelSignal: Cancellation requested.");
    }
    self.token.cancel();
  }

  /// Non-blocking check; also observes an expired deadline.
  pub fn is_cancelled(&self) -> bool {
    self.error().is_some()
  }

  /// Returns the reason the signal fired, or `None` if it has not fired yet.
  pub fn error(&self) -> Option<ExecutorError> {
    if !self.token.is_cancelled() {
      match self.deadline {
        Some(deadline) if Instant::now() >= deadline => self.expire(),
        _ => return None,
      }
    }

    // An unset cause means a parent token fired; the inherited deadline may
    // still be the reason.
    let cause = match self.cause.get() {
      Some(cause) => *cause,
      None => match self.deadline {
        Some(deadline) if Instant::now() >= deadline => CancelCause::DeadlineExceeded,
        _ => CancelCause::Cancelled,
      },
    };
    Some(match cause {
      CancelCause::DeadlineExceeded => ExecutorError::DeadlineExceeded,
      CancelCause::Cancelled => ExecutorError::Cancelled,
    })
  }

  /// Completes once the signal has fired, either by cancellation or by deadline.
  pub async fn cancelled(&self) {
    match self.deadline {
      Some(deadline) => {
        tokio::select! {
          biased;
          _ = self.token.cancelled() => {}
          _ = sleep_until(deadline) => self.expire(),
        }
      }
      None => self.token.cancelled().await,
    }
  }

  fn expire(&self) {
    if self.token.is_cancelled() {
      return;
    }
    if self.cause.set(CancelCause::DeadlineExceeded).is_ok() {
      debug!("CancelSignal: Deadline exceeded.");
    }
    self.token.cancel();
  }
}
