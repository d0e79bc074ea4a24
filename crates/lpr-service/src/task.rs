//! Cancellable unit of asynchronous work
//!
//! Every pipeline stage runs on a [`CancellableTask`]. A task owns one
//! [`TaskState`] and moves it along two legal paths only:
//!
//! ```text
//! Ready -> Executing -> Finished
//! Ready -> Cancelled -> Finished
//! ```
//!
//! Cancelling an executing task does not change its state. It raises the
//! cancellation flag, which the work observes at its next checkpoint.
//! Finishing happens exactly once no matter how many paths race to it (the
//! work itself, the watchdog), and the completion callback runs exactly once
//! after the state has flipped to `Finished`.

use crate::error::PipelineError;
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Ready,
    Executing,
    Cancelled,
    Finished,
}

/// Result carried by a finished task
///
/// Errors travel inside the outcome; there is no separate failure path.
#[derive(Debug, Clone)]
pub enum TaskOutcome<T> {
    Completed(T),
    Empty,
    Failed(PipelineError),
}

impl<T> TaskOutcome<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            TaskOutcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match self {
            TaskOutcome::Failed(err) => Some(err),
            _ => None,
        }
    }

    /// Short label used for logs and metrics
    pub fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Completed(_) => "completed",
            TaskOutcome::Empty => "empty",
            TaskOutcome::Failed(err) => err.kind(),
        }
    }
}

impl<T> From<Result<T, PipelineError>> for TaskOutcome<T> {
    fn from(result: Result<T, PipelineError>) -> Self {
        match result {
            Ok(value) => TaskOutcome::Completed(value),
            Err(PipelineError::Cancelled) => TaskOutcome::Empty,
            Err(err) => TaskOutcome::Failed(err),
        }
    }
}

/// Work executed by a task
#[async_trait]
pub trait TaskWork: Send + 'static {
    type Output: Send + Sync + 'static;

    async fn run(self: Box<Self>, ctx: TaskContext) -> TaskOutcome<Self::Output>;
}

/// Handle given to running work for cooperative cancellation
#[derive(Clone)]
pub struct TaskContext {
    cancel: CancellationToken,
    state: watch::Receiver<TaskState>,
}

impl TaskContext {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation checkpoint
    pub fn checkpoint(&self) -> Result<(), PipelineError> {
        if self.cancel.is_cancelled() {
            Err(PipelineError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation is requested
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Resolves once the task reached `Finished` by any path
    pub async fn finished(&self) {
        wait_finished(self.state.clone()).await
    }

    /// Token shared with blocking workers that cannot await
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

type CompletionFn<T> = Box<dyn FnOnce(&TaskOutcome<T>) + Send>;
type BoxedWork<T> = Box<dyn TaskWork<Output = T>>;

struct TaskCore<T> {
    name: &'static str,
    state: watch::Sender<TaskState>,
    history: Mutex<Vec<TaskState>>,
    cancel: CancellationToken,
    outcome: OnceLock<TaskOutcome<T>>,
    on_complete: Mutex<Option<CompletionFn<T>>>,
}

impl<T: Send + Sync + 'static> TaskCore<T> {
    fn new(name: &'static str, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(TaskState::Ready);
        Self {
            name,
            state,
            history: Mutex::new(vec![TaskState::Ready]),
            cancel,
            outcome: OnceLock::new(),
            on_complete: Mutex::new(None),
        }
    }

    fn current(&self) -> TaskState {
        *self.state.borrow()
    }

    fn record(&self, state: TaskState) {
        self.history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(state);
    }

    /// Move to `to` if the current state is one of `from`
    fn transition(&self, from: &[TaskState], to: TaskState) -> bool {
        self.state.send_if_modified(|state| {
            if !from.contains(state) {
                return false;
            }
            *state = to;
            self.record(to);
            true
        })
    }

    /// Finish exactly once; later calls are no-ops and return `false`
    fn finish(&self, outcome: TaskOutcome<T>) -> bool {
        if !self.seal(outcome) {
            debug!(task = self.name, "finish ignored, task already finished");
            return false;
        }
        self.fire_callback();
        true
    }

    /// Store the outcome and flip to `Finished`, without running the callback
    fn seal(&self, outcome: TaskOutcome<T>) -> bool {
        let mut pending = Some(outcome);
        self.state.send_if_modified(|state| {
            if *state == TaskState::Finished {
                return false;
            }
            if let Some(outcome) = pending.take() {
                let _ = self.outcome.set(outcome);
            }
            *state = TaskState::Finished;
            self.record(TaskState::Finished);
            true
        })
    }

    fn fire_callback(&self) {
        let callback = self
            .on_complete
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let (Some(callback), Some(outcome)) = (callback, self.outcome.get()) {
            callback(outcome);
        }
    }
}

async fn wait_finished(mut state: watch::Receiver<TaskState>) {
    loop {
        let current = *state.borrow_and_update();
        if current == TaskState::Finished {
            return;
        }
        if state.changed().await.is_err() {
            return;
        }
    }
}

struct FnWork<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

#[async_trait]
impl<F, Fut, T> TaskWork for FnWork<F, T>
where
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
    T: Send + Sync + 'static,
{
    type Output = T;

    async fn run(self: Box<Self>, ctx: TaskContext) -> TaskOutcome<T> {
        (self.f)(ctx).await
    }
}

/// A unit of asynchronous work with a four-state lifecycle
pub struct CancellableTask<T> {
    core: Arc<TaskCore<T>>,
    work: Mutex<Option<BoxedWork<T>>>,
    timeout: Option<Duration>,
}

impl<T: Send + Sync + 'static> CancellableTask<T> {
    /// Create a task in `Ready` with its own cancellation flag
    pub fn new<W>(name: &'static str, work: W) -> Self
    where
        W: TaskWork<Output = T>,
    {
        Self::with_token(name, Box::new(work), CancellationToken::new())
    }

    /// Create a task whose cancellation is also triggered by `scope`
    pub fn in_scope<W>(name: &'static str, work: W, scope: &CancellationToken) -> Self
    where
        W: TaskWork<Output = T>,
    {
        Self::with_token(name, Box::new(work), scope.child_token())
    }

    /// Create a task from an async closure
    pub fn from_fn<F, Fut>(name: &'static str, f: F) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
    {
        Self::new(
            name,
            FnWork {
                f,
                _output: PhantomData,
            },
        )
    }

    /// Create a task from an async closure, cancelled along with `scope`
    pub fn from_fn_in_scope<F, Fut>(name: &'static str, f: F, scope: &CancellationToken) -> Self
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = TaskOutcome<T>> + Send + 'static,
    {
        Self::in_scope(
            name,
            FnWork {
                f,
                _output: PhantomData,
            },
            scope,
        )
    }

    fn with_token(name: &'static str, work: BoxedWork<T>, cancel: CancellationToken) -> Self {
        Self {
            core: Arc::new(TaskCore::new(name, cancel)),
            work: Mutex::new(Some(work)),
            timeout: None,
        }
    }

    /// Force a `Finished` transition with a timeout error if the work has not
    /// finished within `timeout` of starting.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &'static str {
        self.core.name
    }

    pub fn state(&self) -> TaskState {
        self.core.current()
    }

    pub fn is_cancelled(&self) -> bool {
        self.core.cancel.is_cancelled()
    }

    /// Every state this task has been in, oldest first
    pub fn history(&self) -> Vec<TaskState> {
        self.core
            .history
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Watch channel over the task state
    pub fn subscribe(&self) -> watch::Receiver<TaskState> {
        self.core.state.subscribe()
    }

    /// The immutable outcome, once finished
    pub fn outcome(&self) -> Option<&TaskOutcome<T>> {
        self.core.outcome.get()
    }

    /// Register the completion callback.
    ///
    /// If the task already finished the callback runs immediately. Registering
    /// again replaces a callback that has not fired yet.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce(&TaskOutcome<T>) + Send + 'static,
    {
        let mut slot = self
            .core
            .on_complete
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match self.core.outcome.get() {
            Some(outcome) if self.core.current() == TaskState::Finished => {
                // A callback registered earlier is replaced, even if the
                // finishing path has not taken it yet.
                let replaced = slot.take();
                drop(slot);
                drop(replaced);
                callback(outcome);
            }
            _ => *slot = Some(Box::new(callback)),
        }
    }

    /// Request cancellation.
    ///
    /// A `Ready` task moves to `Cancelled` and finishes with an empty outcome
    /// when started. An executing task only sees the flag at its next checkpoint.
    pub fn cancel(&self) {
        self.core.cancel.cancel();
        if self.core.transition(&[TaskState::Ready], TaskState::Cancelled) {
            debug!(task = self.core.name, "task cancelled before start");
        }
    }

    /// Start the task. Only the first call has any effect.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> bool {
        if self.core.cancel.is_cancelled() {
            self.core.transition(&[TaskState::Ready], TaskState::Cancelled);
        }
        if self.core.current() == TaskState::Cancelled {
            self.core.finish(TaskOutcome::Empty);
            return false;
        }
        if !self.core.transition(&[TaskState::Ready], TaskState::Executing) {
            return false;
        }

        let work = self
            .work
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(work) = work else {
            self.core.finish(TaskOutcome::Empty);
            return false;
        };

        debug!(task = self.core.name, "task started");

        let ctx = TaskContext {
            cancel: self.core.cancel.clone(),
            state: self.core.state.subscribe(),
        };
        let core = self.core.clone();
        tokio::spawn(async move {
            let outcome = work.run(ctx).await;
            core.finish(outcome);
        });

        if let Some(timeout) = self.timeout {
            let core = self.core.clone();
            let state = self.core.state.subscribe();
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        if core.finish(TaskOutcome::Failed(PipelineError::Timeout(timeout))) {
                            warn!(task = core.name, timeout_ms = timeout.as_millis() as u64, "task watchdog fired");
                            // Lets lingering work exit at its next checkpoint.
                            core.cancel.cancel();
                        }
                    }
                    _ = wait_finished(state) => {}
                }
            });
        }

        true
    }

    /// Wait for `Finished` and return a copy of the outcome
    pub async fn wait(&self) -> TaskOutcome<T>
    where
        T: Clone,
    {
        wait_finished(self.core.state.subscribe()).await;
        self.core
            .outcome
            .get()
            .cloned()
            .unwrap_or(TaskOutcome::Empty)
    }
}
