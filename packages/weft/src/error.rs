//! Error taxonomy for the task graph.
//!
//! Every variant is `Clone`: the first error observed in a graph is handed to
//! each transitively dependent task and replayed by every later `join`, so the
//! non-cloneable sources (`rusqlite`, `io`) are carried behind an `Arc`.

use std::{io, path::PathBuf, sync::Arc};

use thiserror::Error;

/// Errors surfaced by graph construction, submission, and joins.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
    /// An operation was attempted in a state that forbids it, such as
    /// submitting to a closed graph or joining a task while a delayed-start
    /// graph has not released its submissions.
    #[error("{0}")]
    IllegalState(String),

    /// The task's user callable returned an error.
    #[error("task `{task}` failed: {message}")]
    Callable { task: String, message: String },

    /// The callable returned successfully but a declared output is not on
    /// disk.
    #[error("task `{task}` completed without producing declared output {}", .path.display())]
    MissingOutput { task: String, path: PathBuf },

    /// A scheduler invariant was violated. These indicate a bug in the graph,
    /// not in user code.
    #[error("invariant violated: {0}")]
    Internal(String),

    /// The executed-task store could not be read or written.
    #[error("executed-task store: {0}")]
    Store(#[source] Arc<rusqlite::Error>),

    /// Filesystem access failed outside of user code.
    #[error("i/o: {0}")]
    Io(#[source] Arc<io::Error>),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Self::Store(Arc::new(err))
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
