//! The task graph coordinator.
//!
//! [`TaskGraph`] accepts submissions, wires dependencies, promotes tasks to
//! ready as their dependencies settle, and hands ready tasks to the
//! configured execution mode: inline on the submitting thread, or one or more
//! background worker threads draining the priority queue.
//!
//! ## Execution of one ready task
//!
//! A picked-up task computes its fingerprint, then passes three gates in
//! order:
//!
//! 1. **Claim map** — if an identical task in this run already claimed the
//!    fingerprint, wait for its outcome and adopt it instead of executing.
//! 2. **Executed-task store** — if a prior run recorded this fingerprint and
//!    every recorded output is still intact on disk, the task is precomputed
//!    and the callable never runs.
//! 3. **Execution** — run the callable, verify every declared output exists,
//!    record the outputs in the store, and only then settle and wake
//!    dependents.
//!
//! The ordering is load-bearing: the claim happens before the store consult
//! so concurrent identical tasks serialize on one claimant, and the store
//! record lands before the completion signal so a restart never sees a
//! completed task the store has not heard of.
//!
//! ## Failure
//!
//! A failed task settles every transitive dependent as failed without
//! executing it, while unrelated branches keep running. The first error
//! observed is returned from every subsequent graph join.

use std::{
    path::PathBuf,
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use bon::Builder;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, error, info, instrument};

use crate::{
    args::Args,
    error::{Error, Result},
    fingerprint::{self, Fingerprint},
    fs,
    op::Callable,
    queue::ReadyQueue,
    reporter::Reporter,
    store::{ExecutedTasks, STORE_FILE},
    task::{Task, TaskState},
};

/// Execution mode of a graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Workers {
    /// No background threads; tasks execute on the submitting thread at
    /// submission time (or at release, for a delayed-start graph).
    /// Fingerprinting and memoization still apply.
    Inline,
    /// A single background worker services the queue.
    #[default]
    Single,
    /// The given number of worker threads run tasks in parallel.
    Pool(usize),
}

impl Workers {
    fn thread_count(self) -> usize {
        match self {
            Self::Inline => 0,
            Self::Single => 1,
            Self::Pool(count) => count.max(1),
        }
    }
}

/// Construction parameters for [`TaskGraph::open`].
#[derive(Debug, Clone, Builder)]
pub struct GraphConfig {
    /// Directory holding the executed-task store and token markers. Created
    /// if absent.
    #[builder(into)]
    pub workspace: PathBuf,

    #[builder(default)]
    pub workers: Workers,

    /// Emit a progress summary at this interval. Absent or zero disables
    /// reporting.
    pub reporting_interval: Option<Duration>,

    /// Accumulate submissions without running them until [`TaskGraph::close`]
    /// (or a graph-level join) releases the whole wave at once. Lets
    /// priorities apply across the entire graph rather than per submission
    /// wave.
    #[builder(default)]
    pub delayed_start: bool,
}

/// A submission: the callable plus everything that identifies and schedules
/// it. A spec without a callable creates a token task that just drops a
/// marker file in the workspace.
#[derive(Debug, Builder)]
#[builder(on(String, into))]
pub struct TaskSpec {
    pub callable: Option<Callable>,

    #[builder(default)]
    pub args: Args,

    /// Already-submitted tasks this one requires. All of them settle before
    /// this task becomes ready.
    #[builder(default)]
    pub dependencies: Vec<Arc<Task>>,

    /// Output files the callable promises to produce. Declaring them is what
    /// makes the task memoizable; their listed order is irrelevant.
    #[builder(default)]
    pub targets: Vec<PathBuf>,

    /// Paths excluded from input fingerprinting.
    #[builder(default)]
    pub ignore_paths: Vec<PathBuf>,

    /// Higher priority dequeues first among simultaneously ready tasks.
    #[builder(default)]
    pub priority: i64,

    pub name: Option<String>,
}

struct Status {
    closed: bool,
    /// False only while a delayed-start graph is still accumulating.
    started: bool,
    submitted: u64,
    terminal: u64,
    complete: u64,
    precomputed: u64,
    failed: u64,
    running: u64,
    next_id: u64,
    first_error: Option<Error>,
    deferred: Vec<Arc<Task>>,
}

pub(crate) struct Shared {
    workspace: PathBuf,
    workers: Workers,
    delayed_start: bool,
    store: ExecutedTasks,
    queue: ReadyQueue,
    claims: DashMap<Fingerprint, Arc<Task>>,
    status: Mutex<Status>,
    all_terminal: Condvar,
    /// The submitting thread's tracing dispatcher. Worker and reporter
    /// threads run under it so records they emit reach subscribers installed
    /// by the embedding application.
    pub(crate) dispatch: tracing::Dispatch,
}

/// A dependency-ordered collection of memoized tasks over one workspace.
pub struct TaskGraph {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    reporter: Option<Reporter>,
}

impl TaskGraph {
    /// Open a graph over a workspace directory.
    #[instrument(name = "TaskGraph::open", skip_all, fields(workspace = %config.workspace.display()))]
    pub fn open(config: GraphConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.workspace)?;
        let workspace = std::path::absolute(&config.workspace)?;
        let store = ExecutedTasks::open(workspace.join(STORE_FILE))?;

        let shared = Arc::new(Shared {
            workspace,
            workers: config.workers,
            delayed_start: config.delayed_start,
            store,
            queue: ReadyQueue::new(),
            claims: DashMap::new(),
            status: Mutex::new(Status {
                closed: false,
                started: !config.delayed_start,
                submitted: 0,
                terminal: 0,
                complete: 0,
                precomputed: 0,
                failed: 0,
                running: 0,
                next_id: 0,
                first_error: None,
                deferred: Vec::new(),
            }),
            all_terminal: Condvar::new(),
            dispatch: tracing::dispatcher::get_default(|dispatch| dispatch.clone()),
        });

        let workers = (0..config.workers.thread_count())
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let _guard = tracing::dispatcher::set_default(&shared.dispatch);
                    while let Some(task) = shared.queue.pop_wait() {
                        shared.execute(&task);
                    }
                })
            })
            .collect();

        let reporter = config
            .reporting_interval
            .filter(|interval| !interval.is_zero())
            .map(|interval| Reporter::spawn(Arc::clone(&shared), interval));

        Ok(Self {
            shared,
            workers,
            reporter,
        })
    }

    /// Submit a task.
    ///
    /// Dependencies must be handles returned by earlier `add_task` calls on
    /// this graph, which is also what keeps the graph acyclic. Fails with
    /// [`Error::IllegalState`] once the graph is closed.
    #[instrument(name = "TaskGraph::add_task", skip_all)]
    pub fn add_task(&self, spec: TaskSpec) -> Result<Arc<Task>> {
        let TaskSpec {
            callable,
            args,
            dependencies,
            targets,
            ignore_paths,
            priority,
            name,
        } = spec;

        let targets = absolute_paths(targets)?;
        let ignore = absolute_paths(ignore_paths)?;

        let id = {
            let mut status = self.shared.status.lock().expect("mutex is poisoned");
            if status.closed {
                return Err(Error::IllegalState(
                    "task graph is closed and cannot accept new submissions".into(),
                ));
            }
            let id = status.next_id;
            status.next_id += 1;
            status.submitted += 1;
            id
        };

        let name = name.unwrap_or_else(|| format!("task_{id}"));
        let (callable, args, targets) = match callable {
            Some(callable) => (callable, args, targets),
            None => {
                let marker = self.shared.workspace.join(format!("token_{id}"));
                let args = Args::new().arg(marker.display().to_string());
                let callable = Callable::new("weft::token", |args: &Args| {
                    let path = args.path(0).ok_or("token task missing its marker path")?;
                    std::fs::write(&path, b"")?;
                    Ok(())
                });
                (callable, args, vec![marker])
            }
        };

        let task = Task::new(
            id,
            name,
            callable,
            args,
            targets,
            ignore,
            priority,
            dependencies.len(),
            Arc::downgrade(&self.shared),
        );
        debug!(task = %task.name(), id, priority, "task submitted");

        // Wire reverse edges. A dependency that is already terminal is
        // subtracted from the pending count afterwards instead; a dependency
        // that has already failed dooms this task before it ever runs.
        let mut inherited_failure = None;
        let mut already_terminal = 0usize;
        for dependency in &dependencies {
            let mut dep_inner = dependency.lock_inner();
            if dep_inner.state.is_terminal() {
                if dep_inner.state == TaskState::Failed && inherited_failure.is_none() {
                    inherited_failure = Some(dep_inner.error.clone().unwrap_or_else(|| {
                        Error::Internal(format!(
                            "task `{}` failed without an error",
                            dependency.name()
                        ))
                    }));
                }
                already_terminal += 1;
            } else {
                dep_inner.dependents.push(Arc::clone(&task));
            }
        }

        let ready = {
            let mut inner = task.lock_inner();
            inner.pending_deps -= already_terminal;
            if inner.state != TaskState::Submitted || inherited_failure.is_some() {
                false
            } else if inner.pending_deps == 0 {
                inner.state = TaskState::Ready;
                debug!(task = %task.name(), "task ready");
                true
            } else {
                false
            }
        };

        if let Some(err) = inherited_failure {
            self.shared.settle_task(&task, TaskState::Failed, Some(err));
        } else if ready {
            self.shared.schedule(Arc::clone(&task));
            if self.shared.workers == Workers::Inline {
                self.shared.drain_inline();
            }
        }

        Ok(task)
    }

    /// Refuse further submissions. Releases the accumulated wave of a
    /// delayed-start graph. Idempotent.
    pub fn close(&self) {
        {
            let mut status = self.shared.status.lock().expect("mutex is poisoned");
            if !status.closed {
                status.closed = true;
                debug!("task graph closed to new submissions");
            }
        }
        self.shared.release_wave();
    }

    /// Wait until every submitted task settles.
    ///
    /// Returns `Ok(false)` if the timeout elapses first; running tasks are
    /// not disturbed. Once everything has settled, returns the first error
    /// any task produced — the same one on every subsequent call — or
    /// `Ok(true)`. On a delayed-start graph this also releases the
    /// accumulated wave, like [`TaskGraph::close`] but without refusing
    /// further submissions.
    pub fn join(&self, timeout: Option<Duration>) -> Result<bool> {
        self.shared.release_wave();

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut status = self.shared.status.lock().expect("mutex is poisoned");
        loop {
            if status.terminal >= status.submitted {
                let result = match &status.first_error {
                    Some(err) => Err(err.clone()),
                    None => Ok(true),
                };
                drop(status);
                if let Some(reporter) = &self.reporter {
                    reporter.stop();
                }
                return result;
            }
            match deadline {
                None => {
                    status = self
                        .shared
                        .all_terminal
                        .wait(status)
                        .expect("mutex is poisoned");
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(false);
                    }
                    let (guard, _) = self
                        .shared
                        .all_terminal
                        .wait_timeout(status, deadline - now)
                        .expect("mutex is poisoned");
                    status = guard;
                }
            }
        }
    }

    /// The workspace directory this graph runs over.
    pub fn workspace(&self) -> &std::path::Path {
        &self.shared.workspace
    }
}

impl Drop for TaskGraph {
    fn drop(&mut self) {
        // Stop the reporter first so it cannot log against a draining graph.
        self.reporter.take();
        self.shared.queue.shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Shared {
    pub(crate) fn delayed_and_unstarted(&self) -> bool {
        self.delayed_start && !self.status.lock().expect("mutex is poisoned").started
    }

    /// Release the deferred wave of a delayed-start graph, once.
    fn release_wave(&self) {
        let wave = {
            let mut status = self.status.lock().expect("mutex is poisoned");
            if status.started {
                return;
            }
            status.started = true;
            std::mem::take(&mut status.deferred)
        };
        if !wave.is_empty() {
            debug!(count = wave.len(), "releasing deferred submissions");
        }
        self.queue.push_all(wave);
        if self.workers == Workers::Inline {
            self.drain_inline();
        }
    }

    /// Queue a ready task, or hold it while a delayed-start graph is still
    /// accumulating.
    fn schedule(&self, task: Arc<Task>) {
        {
            let mut status = self.status.lock().expect("mutex is poisoned");
            if !status.started {
                status.deferred.push(task);
                return;
            }
        }
        self.queue.push(task);
    }

    /// Run queued tasks on the current thread until the queue is empty.
    ///
    /// Tasks promoted to ready while draining land in the same queue and are
    /// picked up by this loop, so dependency cascades run without recursion.
    fn drain_inline(&self) {
        while let Some(task) = self.queue.try_pop() {
            self.execute(&task);
        }
    }

    /// Run one ready task through the claim, store, and execution gates.
    #[instrument(name = "TaskGraph::execute", skip_all, fields(task = %task.name()))]
    fn execute(&self, task: &Arc<Task>) {
        {
            let inner = task.lock_inner();
            if inner.state != TaskState::Ready {
                let state = inner.state;
                drop(inner);
                self.settle_task(
                    task,
                    TaskState::Failed,
                    Some(Error::Internal(format!(
                        "task `{}` dequeued in state {state:?}",
                        task.name()
                    ))),
                );
                return;
            }
        }

        // Inputs may be outputs of dependencies, all of which have settled by
        // now, so this is the first moment the fingerprint is meaningful.
        let fp = fingerprint::compute(task.callable(), task.args(), task.targets(), task.ignore());
        task.lock_inner().fingerprint = Some(fp.clone());
        debug!(task = %task.name(), fingerprint = %fp, "fingerprint computed");

        let claimant = match self.claims.entry(fp.clone()) {
            Entry::Occupied(entry) => Some(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                entry.insert(Arc::clone(task));
                None
            }
        };
        if let Some(claimant) = claimant {
            debug!(
                task = %task.name(),
                claimant = %claimant.name(),
                "identical task already claimed this fingerprint; adopting its outcome"
            );
            match claimant.wait_outcome() {
                (TaskState::Failed, err) => {
                    let err = err.unwrap_or_else(|| {
                        Error::Internal(format!(
                            "task `{}` failed without an error",
                            claimant.name()
                        ))
                    });
                    self.settle_task(task, TaskState::Failed, Some(err));
                }
                _ => self.settle_task(task, TaskState::Complete, None),
            }
            return;
        }

        // A task with no declared outputs has nothing to verify against, so
        // it can never be satisfied from the store.
        if !task.targets().is_empty() {
            match self.store.lookup(&fp) {
                Ok(Some(outputs)) if fs::all_intact(&outputs) => {
                    debug!(
                        task = %task.name(),
                        "declared outputs intact from a prior run; skipping execution"
                    );
                    self.settle_task(task, TaskState::Precomputed, None);
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    self.settle_task(task, TaskState::Failed, Some(err));
                    return;
                }
            }
        }

        self.set_running(task);
        // A panicking callable must settle the task like any other failure,
        // not take the worker thread down with it and strand every waiter.
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            task.callable().invoke(task.args())
        }))
        .unwrap_or_else(|panic| Err(panic_message(&*panic).into()));
        match result {
            Ok(()) => {
                let mut outputs = Vec::with_capacity(task.targets().len());
                for target in task.targets() {
                    match fs::stat(target) {
                        Ok(Some(stat)) => outputs.push(stat),
                        Ok(None) => {
                            self.settle_task(
                                task,
                                TaskState::Failed,
                                Some(Error::MissingOutput {
                                    task: task.name().into(),
                                    path: target.clone(),
                                }),
                            );
                            return;
                        }
                        Err(err) => {
                            self.settle_task(task, TaskState::Failed, Some(err.into()));
                            return;
                        }
                    }
                }
                if !task.targets().is_empty() {
                    if let Err(err) = self.store.record(&fp, &outputs) {
                        self.settle_task(task, TaskState::Failed, Some(err));
                        return;
                    }
                }
                self.settle_task(task, TaskState::Complete, None);
            }
            Err(err) => {
                self.settle_task(
                    task,
                    TaskState::Failed,
                    Some(Error::Callable {
                        task: task.name().into(),
                        message: err.to_string(),
                    }),
                );
            }
        }
    }

    fn set_running(&self, task: &Arc<Task>) {
        task.lock_inner().state = TaskState::Running;
        debug!(task = %task.name(), "task callable starting");
        self.status.lock().expect("mutex is poisoned").running += 1;
    }

    /// Settle a task, update counters, and re-evaluate its dependents.
    ///
    /// No-op if the task already settled, so concurrent failure propagation
    /// and completion cannot double-count.
    fn settle_task(&self, task: &Arc<Task>, state: TaskState, error: Option<Error>) {
        let Some((was_running, dependents)) = task.settle(state, error.clone()) else {
            return;
        };
        if let (TaskState::Failed, Some(err)) = (state, &error) {
            error!(task = %task.name(), %err, "task failed");
        }

        {
            let mut status = self.status.lock().expect("mutex is poisoned");
            if was_running {
                status.running -= 1;
            }
            status.terminal += 1;
            match state {
                TaskState::Complete => status.complete += 1,
                TaskState::Precomputed => status.precomputed += 1,
                TaskState::Failed => {
                    status.failed += 1;
                    if status.first_error.is_none() {
                        status.first_error = error.clone();
                    }
                }
                _ => {}
            }
            if status.terminal >= status.submitted {
                self.all_terminal.notify_all();
            }
        }

        match state {
            TaskState::Failed => {
                let err = error.unwrap_or_else(|| {
                    Error::Internal(format!("task `{}` failed without an error", task.name()))
                });
                for dependent in dependents {
                    self.settle_task(&dependent, TaskState::Failed, Some(err.clone()));
                }
            }
            _ => {
                for dependent in dependents {
                    self.dep_satisfied(&dependent);
                }
            }
        }
    }

    /// One dependency of `task` completed; promote it if that was the last.
    fn dep_satisfied(&self, task: &Arc<Task>) {
        let promote = {
            let mut inner = task.lock_inner();
            if inner.state != TaskState::Submitted {
                false
            } else {
                inner.pending_deps = inner.pending_deps.saturating_sub(1);
                if inner.pending_deps == 0 {
                    inner.state = TaskState::Ready;
                    debug!(task = %task.name(), "task ready");
                    true
                } else {
                    false
                }
            }
        };
        if promote {
            self.schedule(Arc::clone(task));
        }
    }

    pub(crate) fn report_progress(&self) {
        let status = self.status.lock().expect("mutex is poisoned");
        info!(
            submitted = status.submitted,
            completed = status.complete,
            precomputed = status.precomputed,
            failed = status.failed,
            running = status.running,
            "task graph progress"
        );
    }
}

fn absolute_paths(paths: Vec<PathBuf>) -> Result<Vec<PathBuf>> {
    paths
        .into_iter()
        .map(|path| std::path::absolute(&path).map_err(Error::from))
        .collect()
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("callable panicked: {message}")
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("callable panicked: {message}")
    } else {
        "callable panicked".into()
    }
}
