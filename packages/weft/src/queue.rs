//! Priority-ordered queue of ready tasks.
//!
//! One producer (the coordinator), N consumers (workers). Higher priority
//! dequeues first; equal priority follows submission order. `push_all`
//! publishes a whole wave under one lock so a woken consumer always sees the
//! full wave — releasing a delayed-start graph entry by entry would let a
//! fast worker drain a low-priority task before a higher-priority one was
//! even visible.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{Arc, Condvar, Mutex},
};

use crate::task::Task;

pub(crate) struct ReadyQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

struct QueueState {
    heap: BinaryHeap<Entry>,
    shutdown: bool,
}

struct Entry {
    priority: i64,
    seq: u64,
    task: Arc<Task>,
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins, then the earlier submission.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    pub fn push(&self, task: Arc<Task>) {
        let mut state = self.state.lock().expect("mutex is poisoned");
        state.heap.push(Entry {
            priority: task.priority(),
            seq: task.id(),
            task,
        });
        self.available.notify_one();
    }

    /// Publish a batch atomically.
    pub fn push_all(&self, tasks: impl IntoIterator<Item = Arc<Task>>) {
        let mut state = self.state.lock().expect("mutex is poisoned");
        for task in tasks {
            state.heap.push(Entry {
                priority: task.priority(),
                seq: task.id(),
                task,
            });
        }
        self.available.notify_all();
    }

    /// Block until a task is available or the queue shuts down.
    ///
    /// Returns `None` only on shutdown.
    pub fn pop_wait(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock().expect("mutex is poisoned");
        loop {
            if let Some(entry) = state.heap.pop() {
                return Some(entry.task);
            }
            if state.shutdown {
                return None;
            }
            state = self.available.wait(state).expect("mutex is poisoned");
        }
    }

    pub fn try_pop(&self) -> Option<Arc<Task>> {
        let mut state = self.state.lock().expect("mutex is poisoned");
        state.heap.pop().map(|entry| entry.task)
    }

    /// Wake every blocked consumer and make all future waits return `None`.
    pub fn shutdown(&self) {
        let mut state = self.state.lock().expect("mutex is poisoned");
        state.shutdown = true;
        self.available.notify_all();
    }
}
