use crate::error::{ExecutorError, RunError};
use crate::outcome::{RunOutcome, RunStatus};
use crate::signal::CancelSignal;
use crate::task::{Task, TaskOutcome};

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::runtime::Handle as TokioHandle;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

lazy_static::lazy_static! {
  static ref NEXT_RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(0);
}

/// Maximum number of tasks executing at once when no limit is configured.
pub const DEFAULT_MAX_CONCURRENCY: usize = 10;

/// Construction options for a `FanoutExecutor`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorOptions {
  /// Name used in log fields.
  pub name: String,
  /// Cap on simultaneously executing tasks. Values below 1 are raised to 1.
  pub max_concurrency: usize,
}

impl Default for ExecutorOptions {
  fn default() -> Self {
    Self {
      name: "fanout".to_string(),
      max_concurrency: DEFAULT_MAX_CONCURRENCY,
    }
  }
}

impl ExecutorOptions {
  pub fn with_name(mut self, name: impl Into<String>) -> Self {
    self.name = name.into();
    self
  }

  pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
    self.max_concurrency = max_concurrency;
    self
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
  /// Accepting registrations, no run started yet.
  Open,
  Running,
  /// At least one run has finished. Registration is closed.
  Sealed,
}

struct ExecutorState<T: Send + 'static> {
  tasks: Vec<Task<T>>,
  phase: Phase,
}

/// One task's report to the collection loop.
struct Published<T> {
  index: usize,
  items: Vec<T>,
  error: Option<ExecutorError>,
}

/// Everything a dispatched task activity needs, shared per run.
struct RunContext<T: Send + 'static> {
  results_tx: mpsc::Sender<Published<T>>,
  signal: CancelSignal,
  halt: CancellationToken,
  active_tasks: Arc<AtomicUsize>,
}

impl<T: Send + 'static> Clone for RunContext<T> {
  fn clone(&self) -> Self {
    Self {
      results_tx: self.results_tx.clone(),
      signal: self.signal.clone(),
      halt: self.halt.clone(),
      active_tasks: self.active_tasks.clone(),
    }
  }
}

impl<T: Send + 'static> RunContext<T> {
  /// Completes when the caller's signal fires or the run has already returned.
  async fn interrupted(&self) {
    tokio::select! {
      _ = self.signal.cancelled() => {}
      _ = self.halt.cancelled() => {}
    }
  }
}

/// Clears the running phase and halts the run's background activities on
/// every exit path of `run_all`, including when its future is dropped.
struct RunGuard<'a, T: Send + 'static> {
  state: &'a Mutex<ExecutorState<T>>,
  halt: CancellationToken,
}

impl<T: Send + 'static> Drop for RunGuard<'_, T> {
  fn drop(&mut self) {
    self.halt.cancel();
    self.state.lock().phase = Phase::Sealed;
  }
}

struct ActiveTaskGuard {
  counter: Arc<AtomicUsize>,
}

impl ActiveTaskGuard {
  fn enter(counter: &Arc<AtomicUsize>) -> Self {
    counter.fetch_add(1, AtomicOrdering::SeqCst);
    Self { counter: counter.clone() }
  }
}

impl Drop for ActiveTaskGuard {
  fn drop(&mut self) {
    self.counter.fetch_sub(1, AtomicOrdering::SeqCst);
  }
}

/// Runs a registered set of tasks in parallel with a cap on how many execute
/// at once, and aggregates their items and errors.
///
/// ```no_run
/// # use futures_fanout::{CancelSignal, FanoutExecutor, Task, TaskError};
/// # async fn demo() {
/// let executor = FanoutExecutor::<String>::new(4, tokio::runtime::Handle::current(), "fish");
/// executor
///   .register(Task::new(|| async { Ok::<_, TaskError>(vec!["Salmon".to_string()]) }))
///   .unwrap();
/// let outcome = executor.run_all(&CancelSignal::new()).await.unwrap();
/// assert_eq!(outcome.items(), ["Salmon".to_string()]);
/// # }
/// ```
pub struct FanoutExecutor<T: Send + 'static> {
  name: Arc<String>,
  max_concurrency: usize,
  semaphore: Arc<Semaphore>,
  state: Mutex<ExecutorState<T>>,
  active_tasks: Arc<AtomicUsize>,
  tokio_handle: TokioHandle,
}

impl<T: Send + 'static> fmt::Debug for FanoutExecutor<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let (task_count, phase) = {
      let state = self.state.lock();
      (state.tasks.len(), state.phase)
    };
    f.debug_struct("FanoutExecutor")
      .field("name", &self.name)
      .field("max_concurrency", &self.max_concurrency)
      .field("task_count", &task_count)
      .field("phase", &phase)
      .field("available_slots", &self.semaphore.available_permits())
      .finish()
  }
}

impl<T: Send + 'static> FanoutExecutor<T> {
  pub fn new(max_concurrency: usize, tokio_handle: TokioHandle, name: &str) -> Self {
    Self::with_options(
      ExecutorOptions::default()
        .with_name(name)
        .with_max_concurrency(max_concurrency),
      tokio_handle,
    )
  }

  pub fn with_options(options: ExecutorOptions, tokio_handle: TokioHandle) -> Self {
    if options.max_concurrency == 0 {
      warn!(executor = %options.name, "max_concurrency of 0 requested, using 1.");
    } else if options.max_concurrency > Semaphore::MAX_PERMITS {
      warn!(
        executor = %options.name,
        "max_concurrency of {} requested, using the slot pool maximum {}.",
        options.max_concurrency,
        Semaphore::MAX_PERMITS
      );
    }
    let max_concurrency = options.max_concurrency.clamp(1, Semaphore::MAX_PERMITS);

    Self {
      name: Arc::new(options.name),
      max_concurrency,
      semaphore: Arc::new(Semaphore::new(max_concurrency)),
      state: Mutex::new(ExecutorState {
        tasks: Vec::new(),
        phase: Phase::Open,
      }),
      active_tasks: Arc::new(AtomicUsize::new(0)),
      tokio_handle,
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn max_concurrency(&self) -> usize {
    self.max_concurrency
  }

  pub fn task_count(&self) -> usize {
    self.state.lock().tasks.len()
  }

  pub fn is_running(&self) -> bool {
    self.state.lock().phase == Phase::Running
  }

  /// Slots not currently held by a task. Equals `max_concurrency` at rest.
  pub fn available_slots(&self) -> usize {
    self.semaphore.available_permits()
  }

  /// Number of task activities currently executing or publishing, including
  /// ones left running by a cancelled run.
  pub fn active_task_count(&self) -> usize {
    self.active_tasks.load(AtomicOrdering::SeqCst)
  }

  /// Appends a task to be executed by the next run.
  ///
  /// # Errors
  /// Returns `ExecutorError::AlreadyRunning` while a run is in progress and
  /// `ExecutorError::InvalidState` once a run has finished.
  pub fn register(&self, task: Task<T>) -> Result<(), ExecutorError> {
    let mut state = self.state.lock();
    match state.phase {
      Phase::Open => {
        state.tasks.push(task);
        trace!(executor = %self.name, task_index = state.tasks.len() - 1, "Registered task.");
        Ok(())
      }
      Phase::Running => {
        warn!(executor = %self.name, "Register: Attempted to register a task while a run is in progress.");
        Err(ExecutorError::AlreadyRunning)
      }
      Phase::Sealed => {
        warn!(executor = %self.name, "Register: Attempted to register a task after a run has started.");
        Err(ExecutorError::InvalidState)
      }
    }
  }

  /// Runs every registered task and waits for their outcomes.
  ///
  /// Tasks start in registration order as slots become free; items and errors
  /// are collected in completion order. Task errors never stop sibling tasks.
  ///
  /// When `signal` fires the run returns immediately. Results collected so far
  /// are kept ([`RunStatus::CancelledPartial`]) unless the signal was already
  /// observed as fired before collecting ([`RunStatus::CancelledEmpty`]).
  /// Tasks are never aborted: a task that ignores cancellation keeps running,
  /// and keeps its slot, after this method returned. Whatever it produces
  /// then is dropped. Tasks that may run long should watch
  /// [`CancelSignal::token`] themselves.
  ///
  /// # Errors
  /// Returns `ExecutorError::NoTasks` when nothing is registered and
  /// `ExecutorError::AlreadyRunning` when another run is in progress. Nothing
  /// is spawned in either case.
  pub async fn run_all(&self, signal: &CancelSignal) -> Result<RunOutcome<T>, ExecutorError> {
    let tasks = self.begin_run()?;
    let run_id = NEXT_RUN_ID_COUNTER.fetch_add(1, AtomicOrdering::Relaxed);
    let halt = CancellationToken::new();
    let _guard = RunGuard {
      state: &self.state,
      halt: halt.clone(),
    };

    let outcome = self
      .run_tasks(tasks, signal.clone(), halt)
      .instrument(info_span!("fanout_run", executor = %self.name, %run_id))
      .await;
    Ok(outcome)
  }

  /// Atomically checks the preconditions and enters the running phase.
  fn begin_run(&self) -> Result<Vec<Task<T>>, ExecutorError> {
    let mut state = self.state.lock();
    if state.phase == Phase::Running {
      warn!(executor = %self.name, "Run: Executor is already running.");
      return Err(ExecutorError::AlreadyRunning);
    }
    if state.tasks.is_empty() {
      warn!(executor = %self.name, "Run: No tasks registered.");
      return Err(ExecutorError::NoTasks);
    }
    state.phase = Phase::Running;
    Ok(state.tasks.clone())
  }

  async fn run_tasks(&self, tasks: Vec<Task<T>>, signal: CancelSignal, halt: CancellationToken) -> RunOutcome<T> {
    let task_count = tasks.len();

    if let Some(outcome) = Self::check_cancelled_before_collecting(&signal, 0, task_count) {
      return outcome;
    }

    info!(task_count, max_concurrency = self.max_concurrency, "Run started.");

    // No more than `task_count` results are ever published in one run.
    let (results_tx, mut results_rx) = mpsc::channel::<Published<T>>(self.max_concurrency.min(task_count));
    let tracker = TaskTracker::new();
    let ctx = RunContext {
      results_tx: results_tx.clone(),
      signal: signal.clone(),
      halt,
      active_tasks: self.active_tasks.clone(),
    };

    self.tokio_handle.spawn(
      Self::run_dispatch_loop(
        tasks,
        self.semaphore.clone(),
        tracker.clone(),
        self.tokio_handle.clone(),
        ctx,
      )
      .instrument(info_span!("fanout_dispatcher")),
    );
    self
      .tokio_handle
      .spawn(Self::run_supervisor(tracker, results_tx).instrument(info_span!("fanout_supervisor")));

    let mut items: Vec<T> = Vec::new();
    let mut errors: Vec<ExecutorError> = Vec::new();
    let mut reported = 0usize;

    loop {
      if let Some(outcome) = Self::check_cancelled_before_collecting(&signal, reported, task_count) {
        return outcome;
      }

      tokio::select! {
        biased;

        _ = signal.cancelled() => {
          let cancel_error = signal.error().unwrap_or(ExecutorError::Cancelled);
          info!(
            reported,
            task_count,
            collected = items.len(),
            "Signal fired during collection ({}). Returning partial results.",
            cancel_error
          );
          errors.push(cancel_error);
          return RunOutcome {
            items,
            error: RunError::join(errors),
            status: RunStatus::CancelledPartial,
          };
        }

        received = results_rx.recv() => {
          match received {
            Some(published) => {
              reported += 1;
              if let Some(err) = published.error {
                debug!(task_index = published.index, error = %err, "Task reported an error.");
                errors.push(err);
              } else {
                trace!(task_index = published.index, item_count = published.items.len(), "Task reported items.");
              }
              items.extend(published.items);
            }
            None => {
              info!(
                reported,
                task_count,
                collected = items.len(),
                failed = errors.len(),
                "Collection channel closed. Run completed."
              );
              return RunOutcome {
                items,
                error: RunError::join(errors),
                status: RunStatus::Completed,
              };
            }
          }
        }
      }
    }
  }

  /// Non-blocking signal check made before dispatch and at the top of every
  /// collection round. A fired signal yields `CancelledEmpty`: no items, only
  /// the cancellation error. Before dispatch this is deterministic; between
  /// rounds it only wins when the signal fires right after an item arrived.
  fn check_cancelled_before_collecting(signal: &CancelSignal, reported: usize, task_count: usize) -> Option<RunOutcome<T>> {
    let cancel_error = signal.error()?;
    info!(reported, task_count, "Signal fired ({}). Returning without results.", cancel_error);
    Some(RunOutcome {
      items: Vec::new(),
      error: RunError::join(vec![cancel_error]),
      status: RunStatus::CancelledEmpty,
    })
  }

  async fn run_dispatch_loop(
    tasks: Vec<Task<T>>,
    semaphore: Arc<Semaphore>,
    tracker: TaskTracker,
    tasks_tokio_handle: TokioHandle,
    ctx: RunContext<T>,
  ) {
    let task_count = tasks.len();
    let mut dispatched = 0usize;

    for (index, task) in tasks.into_iter().enumerate() {
      let permit: OwnedSemaphorePermit = tokio::select! {
        biased;

        _ = ctx.signal.cancelled() => {
          info!(dispatched, task_count, "Signal fired while waiting for a slot. Remaining tasks will not run.");
          break;
        }

        _ = ctx.halt.cancelled() => {
          debug!(dispatched, task_count, "Run returned while waiting for a slot. Remaining tasks will not run.");
          break;
        }

        acquired = semaphore.clone().acquire_owned() => {
          match acquired {
            Ok(permit) => permit,
            Err(_) => {
              error!(dispatched, task_count, "Slot pool closed unexpectedly. Dispatch stopped.");
              break;
            }
          }
        }
      };
      trace!(task_index = index, available = semaphore.available_permits(), "Acquired slot.");

      tracker.spawn_on(
        Self::run_task_activity(index, task, permit, ctx.clone()).instrument(info_span!("fanout_task", task_index = index)),
        &tasks_tokio_handle,
      );
      dispatched += 1;
    }

    tracker.close();
    debug!(dispatched, task_count, "Dispatch loop finished.");
  }

  /// Waits for every dispatched task activity, then drops the last sender so
  /// the collection loop sees the channel close.
  async fn run_supervisor(tracker: TaskTracker, results_tx: mpsc::Sender<Published<T>>) {
    tracker.wait().await;
    drop(results_tx);
    debug!("All task activities finished. Collection channel closed.");
  }

  async fn run_task_activity(index: usize, task: Task<T>, permit: OwnedSemaphorePermit, ctx: RunContext<T>) {
    let _slot = permit;
    let _active = ActiveTaskGuard::enter(&ctx.active_tasks);

    let published = match AssertUnwindSafe(task.execute()).catch_unwind().await {
      Ok(TaskOutcome { items, error }) => {
        trace!(task_index = index, failed = error.is_some(), "Task finished.");
        Published {
          index,
          items,
          error: error.map(|source| ExecutorError::Task { index, source }),
        }
      }
      Err(_panic_payload) => {
        error!(task_index = index, "Task panicked during execution.");
        Published {
          index,
          items: Vec::new(),
          error: Some(ExecutorError::TaskPanicked { index }),
        }
      }
    };

    // A result that cannot be delivered because the run is cancelling is dropped.
    tokio::select! {
      biased;

      sent = ctx.results_tx.send(published) => {
        if sent.is_err() {
          debug!(task_index = index, "Collection loop already returned. Task result dropped.");
        }
      }

      _ = ctx.interrupted() => {
        debug!(task_index = index, "Run cancelled before the result was published. Task result dropped.");
      }
    }
  }
}
