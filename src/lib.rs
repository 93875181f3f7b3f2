//! A Tokio-based bounded-concurrency fan-out executor: runs a set of
//! independent tasks in parallel, caps how many execute at once, and
//! aggregates their results and errors under cooperative cancellation.

mod error;
mod executor;
mod outcome;
mod signal;
mod task;

pub use error::{ExecutorError, RunError};
pub use executor::{ExecutorOptions, FanoutExecutor, DEFAULT_MAX_CONCURRENCY};
pub use outcome::{RunOutcome, RunStatus};
pub use signal::CancelSignal;
pub use task::{Task, TaskError, TaskOutcome};
