//! In-memory record of one submitted task.
//!
//! A task's mutable state (state machine, outstanding dependency count, lazy
//! fingerprint, error slot, reverse edges) lives behind a single mutex paired
//! with the completion condvar, so a state transition and its wakeup are one
//! atomic step. The coordinator mutates readiness and terminal state; the
//! worker that owns a running task mutates nothing else concurrently.

use std::{
    fmt,
    path::PathBuf,
    sync::{Arc, Condvar, Mutex, MutexGuard, Weak},
    time::{Duration, Instant},
};

use itertools::Itertools;
use tracing::debug;

use crate::{
    args::Args,
    error::{Error, Result},
    fingerprint::Fingerprint,
    graph::Shared,
    op::Callable,
};

/// Lifecycle of a task.
///
/// `Complete`, `Precomputed`, and `Failed` are terminal; only terminal states
/// fire the completion signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Submitted with outstanding dependencies.
    Submitted,
    /// All dependencies terminal; queued for a worker.
    Ready,
    /// A worker is executing the callable.
    Running,
    /// The callable ran and its declared outputs are on disk.
    Complete,
    /// A prior run's record satisfied the task without executing it.
    Precomputed,
    /// The callable errored, an output went missing, or an ancestor failed.
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Precomputed | Self::Failed)
    }
}

pub(crate) struct TaskInner {
    pub state: TaskState,
    pub pending_deps: usize,
    pub fingerprint: Option<Fingerprint>,
    pub error: Option<Error>,
    pub dependents: Vec<Arc<Task>>,
}

/// One submitted unit of work. Handed out as `Arc<Task>` by
/// [`crate::graph::TaskGraph::add_task`].
pub struct Task {
    id: u64,
    name: String,
    callable: Callable,
    args: Args,
    targets: Vec<PathBuf>,
    ignore: Vec<PathBuf>,
    priority: i64,
    graph: Weak<Shared>,
    inner: Mutex<TaskInner>,
    done: Condvar,
}

impl Task {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: u64,
        name: String,
        callable: Callable,
        args: Args,
        targets: Vec<PathBuf>,
        ignore: Vec<PathBuf>,
        priority: i64,
        pending_deps: usize,
        graph: Weak<Shared>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            callable,
            args,
            targets,
            ignore,
            priority,
            graph,
            inner: Mutex::new(TaskInner {
                state: TaskState::Submitted,
                pending_deps,
                fingerprint: None,
                error: None,
                dependents: Vec::new(),
            }),
            done: Condvar::new(),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i64 {
        self.priority
    }

    pub fn callable(&self) -> &Callable {
        &self.callable
    }

    pub fn args(&self) -> &Args {
        &self.args
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn ignore(&self) -> &[PathBuf] {
        &self.ignore
    }

    pub fn state(&self) -> TaskState {
        self.inner.lock().expect("mutex is poisoned").state
    }

    /// The fingerprint, if the task has become ready and computed one.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.inner
            .lock()
            .expect("mutex is poisoned")
            .fingerprint
            .clone()
    }

    /// The error recorded for a failed task.
    pub fn error(&self) -> Option<Error> {
        self.inner.lock().expect("mutex is poisoned").error.clone()
    }

    pub(crate) fn lock_inner(&self) -> MutexGuard<'_, TaskInner> {
        self.inner.lock().expect("mutex is poisoned")
    }

    /// Move to a terminal state and wake all waiters.
    ///
    /// Returns the reverse edges for the caller to re-evaluate, or `None` if
    /// the task was already terminal (the transition happens at most once).
    pub(crate) fn settle(
        &self,
        state: TaskState,
        error: Option<Error>,
    ) -> Option<(bool, Vec<Arc<Task>>)> {
        debug_assert!(state.is_terminal());
        let mut inner = self.inner.lock().expect("mutex is poisoned");
        if inner.state.is_terminal() {
            return None;
        }
        let was_running = inner.state == TaskState::Running;
        inner.state = state;
        inner.error = error;
        let dependents = std::mem::take(&mut inner.dependents);
        debug!(task = %self.name, id = self.id, state = ?state, "task reached terminal state");
        self.done.notify_all();
        Some((was_running, dependents))
    }

    /// Block until the task is terminal, without the delayed-start guard.
    pub(crate) fn wait_outcome(&self) -> (TaskState, Option<Error>) {
        let mut inner = self.inner.lock().expect("mutex is poisoned");
        while !inner.state.is_terminal() {
            inner = self.done.wait(inner).expect("mutex is poisoned");
        }
        (inner.state, inner.error.clone())
    }

    /// Wait for the task to reach a terminal state.
    ///
    /// Returns `Ok(true)` on `Complete` or `Precomputed`, `Ok(false)` on
    /// timeout, and the task's error on `Failed`. Joining an individual task
    /// while a delayed-start graph has not released its submissions is an
    /// error: the task cannot run until the whole wave is released, so the
    /// wait would deadlock.
    pub fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        if let Some(shared) = self.graph.upgrade() {
            if shared.delayed_and_unstarted() {
                return Err(Error::IllegalState(format!(
                    "Task joined even though taskgraph has delayed start mode enabled and has \
                     not released submissions yet (task `{}`)",
                    self.name
                )));
            }
        }

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut inner = self.inner.lock().expect("mutex is poisoned");
        while !inner.state.is_terminal() {
            match deadline {
                None => inner = self.done.wait(inner).expect("mutex is poisoned"),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    let (guard, _) = self
                        .done
                        .wait_timeout(inner, deadline - now)
                        .expect("mutex is poisoned");
                    inner = guard;
                }
            }
        }

        match inner.state {
            TaskState::Failed => Err(inner
                .error
                .clone()
                .unwrap_or_else(|| Error::Internal(format!("task `{}` failed without an error", self.name)))),
            _ => Ok(true),
        }
    }
}

/// Tasks compare by identity material: callable identity, arguments, and the
/// declared output and ignore sets. Two logically identical submissions are
/// equal regardless of when they were submitted.
impl PartialEq for Task {
    fn eq(&self, other: &Self) -> bool {
        self.callable.identity() == other.callable.identity()
            && self.args == other.args
            && sorted(&self.targets) == sorted(&other.targets)
            && sorted(&self.ignore) == sorted(&other.ignore)
    }
}

impl Eq for Task {}

fn sorted(paths: &[PathBuf]) -> Vec<&PathBuf> {
    paths.iter().sorted().collect()
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
