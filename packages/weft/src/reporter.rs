//! Periodic progress reporting.

use std::{
    sync::{Arc, Condvar, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::graph::Shared;

/// Background thread emitting one progress line per interval.
///
/// Stopped explicitly when a graph join completes, and on drop.
pub(crate) struct Reporter {
    signal: Arc<StopSignal>,
    handle: Option<JoinHandle<()>>,
}

impl Reporter {
    pub fn spawn(shared: Arc<Shared>, interval: Duration) -> Self {
        let signal = StopSignal::new();
        let handle = thread::spawn({
            let signal = Arc::clone(&signal);
            move || {
                let _guard = tracing::dispatcher::set_default(&shared.dispatch);
                loop {
                    if signal.wait_timeout(interval) {
                        break;
                    }
                    shared.report_progress();
                }
            }
        });
        Self {
            signal,
            handle: Some(handle),
        }
    }

    pub fn stop(&self) {
        self.signal.stop();
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// A simple signal for stopping a thread using a condition variable.
struct StopSignal {
    stopped: Mutex<bool>,
    condvar: Condvar,
}

impl StopSignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stopped: Mutex::new(false),
            condvar: Condvar::new(),
        })
    }

    /// Wait for the signal or timeout. Returns true if signaled to stop.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let stopped = self.stopped.lock().expect("mutex is poisoned");
        if *stopped {
            return true;
        }
        let (stop, _) = self
            .condvar
            .wait_timeout(stopped, timeout)
            .expect("mutex is poisoned");
        *stop
    }

    /// Signal the thread to stop.
    fn stop(&self) {
        let mut stopped = self.stopped.lock().expect("mutex is poisoned");
        *stopped = true;
        self.condvar.notify_all();
    }
}
