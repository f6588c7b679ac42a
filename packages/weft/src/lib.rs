//! Parallel task-graph execution with persistent result memoization.
//!
//! A [`TaskGraph`] runs callables in dependency order over a workspace
//! directory. Each task carries a stable callable identity, an argument tree,
//! and a declared set of output files; from these the graph derives a content
//! fingerprint and skips any task whose fingerprint matches a record left by
//! a prior run whose outputs are still intact on disk. Re-running a pipeline
//! over the same workspace therefore only executes what actually changed.
//!
//! ## Example
//!
//! ```no_run
//! use weft::{Args, Callable, GraphConfig, TaskGraph, TaskSpec, Workers};
//!
//! # fn main() -> weft::Result<()> {
//! let graph = TaskGraph::open(
//!     GraphConfig::builder()
//!         .workspace("./workspace")
//!         .workers(Workers::Pool(4))
//!         .build(),
//! )?;
//!
//! let fetch = graph.add_task(
//!     TaskSpec::builder()
//!         .callable(Callable::new("pipeline::fetch", |args| {
//!             let target = args.kw_path("target_path").ok_or("missing target_path")?;
//!             std::fs::write(&target, b"data")?;
//!             Ok(())
//!         }))
//!         .args(Args::new().kwarg("target_path", "./workspace/data.txt"))
//!         .targets(vec!["./workspace/data.txt".into()])
//!         .build(),
//! )?;
//!
//! graph.add_task(
//!     TaskSpec::builder()
//!         .callable(Callable::new("pipeline::summarize", |_args| Ok(())))
//!         .dependencies(vec![fetch])
//!         .build(),
//! )?;
//!
//! graph.close();
//! graph.join(None)?;
//! # Ok(())
//! # }
//! ```

pub mod args;
pub mod error;
pub mod fingerprint;
pub mod fs;
pub mod graph;
pub mod op;
mod queue;
mod reporter;
pub mod store;
pub mod task;

pub use args::{Args, Value};
pub use error::{Error, Result};
pub use fingerprint::Fingerprint;
pub use graph::{GraphConfig, TaskGraph, TaskSpec, Workers};
pub use op::{CallError, CallResult, Callable, EncapsulatedOp};
pub use task::{Task, TaskState};
