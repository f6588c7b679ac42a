//! Log records from worker threads surface through the subscriber installed
//! by the thread that opened the graph.

use std::{
    io,
    sync::{Arc, Mutex},
    time::Duration,
};

use tracing_subscriber::fmt::MakeWriter;
use weft::{Callable, GraphConfig, TaskGraph, TaskSpec, Workers};

use crate::workspace;

/// Collects formatted log output for assertions.
#[derive(Clone, Default)]
struct Sink(Arc<Mutex<Vec<u8>>>);

impl Sink {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().expect("mutex is poisoned")).into_owned()
    }
}

impl io::Write for Sink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .expect("mutex is poisoned")
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for Sink {
    type Writer = Sink;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[test]
fn worker_records_reach_the_parent_subscriber() {
    let sink = Sink::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let ws = workspace();
        let graph = crate::open(ws.path(), Workers::Pool(2));
        graph
            .add_task(
                TaskSpec::builder()
                    .callable(Callable::new("it::log_from_worker", |_args| {
                        tracing::info!("this record is coming from a worker thread");
                        Ok(())
                    }))
                    .build(),
            )
            .unwrap();
        graph.close();
        graph.join(None).unwrap();
    });

    assert!(
        sink.contents()
            .contains("this record is coming from a worker thread"),
        "worker record missing from parent subscriber; captured:\n{}",
        sink.contents()
    );
}

#[test]
fn reporter_emits_periodic_progress() {
    let sink = Sink::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .with_ansi(false)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let ws = workspace();
        let graph = TaskGraph::open(
            GraphConfig::builder()
                .workspace(ws.path())
                .workers(Workers::Single)
                .reporting_interval(Duration::from_millis(50))
                .build(),
        )
        .expect("open task graph");
        graph
            .add_task(
                TaskSpec::builder()
                    .callable(Callable::new("it::slow_enough_to_report", |_args| {
                        std::thread::sleep(Duration::from_millis(300));
                        Ok(())
                    }))
                    .build(),
            )
            .unwrap();
        graph.close();
        graph.join(None).unwrap();
    });

    assert!(
        sink.contents().contains("task graph progress"),
        "no progress line captured; captured:\n{}",
        sink.contents()
    );
}
