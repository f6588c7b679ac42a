//! Filesystem stats for fingerprinting and output verification.
//!
//! The probe walks an argument tree and reports a stat triple for every
//! string leaf that names an existing filesystem entry. Paths are resolved
//! and statted at the moment the probe runs — for a task that is the moment
//! it becomes ready, never submission time, because its inputs may be outputs
//! of dependencies that have not run yet. A string that only starts existing
//! on disk later is treated as plain data until it does.
//!
//! Modification times are truncated to whole seconds to tolerate filesystem
//! timestamp granularity.

use std::{
    collections::BTreeSet,
    io,
    path::{Path, PathBuf},
};

use filetime::FileTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::trace;

use crate::args::Args;

/// A (path, size, mtime) triple for one filesystem entry.
///
/// Directories stat with size 0.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileStat {
    pub path: PathBuf,
    pub size: u64,
    /// Modification time in whole seconds since the epoch.
    pub mtime: i64,
}

/// Stat a single path, returning `None` when it does not exist.
pub fn stat(path: &Path) -> io::Result<Option<FileStat>> {
    match std::fs::metadata(path) {
        Ok(meta) => {
            let size = if meta.is_dir() { 0 } else { meta.len() };
            let mtime = FileTime::from_last_modification_time(&meta).unix_seconds();
            Ok(Some(FileStat {
                path: std::path::absolute(path)?,
                size,
                mtime,
            }))
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Whether every recorded stat still matches the entry on disk.
pub fn all_intact(stats: &[FileStat]) -> bool {
    stats.iter().all(|recorded| {
        matches!(
            stat(&recorded.path),
            Ok(Some(ref current)) if current.size == recorded.size
                && current.mtime == recorded.mtime
        )
    })
}

/// Collect stats for every path-naming string leaf in `value`.
///
/// Arrays are visited in order and maps in key order, so the result is
/// deterministic for a given tree. Entries in `ignore` are skipped, as is
/// anything that does not currently exist. Directories are skipped entirely
/// unless `include_directories` is set.
pub fn file_stats(value: &Value, ignore: &[PathBuf], include_directories: bool) -> Vec<FileStat> {
    let ignore = absolute_set(ignore);
    let mut stats = Vec::new();
    walk(value, &ignore, include_directories, &mut stats);
    stats
}

/// Probe an argument tree, positional values first, named values in key
/// order.
pub fn arg_stats(args: &Args, ignore: &[PathBuf], include_directories: bool) -> Vec<FileStat> {
    file_stats(&args.to_value(), ignore, include_directories)
}

fn walk(value: &Value, ignore: &BTreeSet<PathBuf>, include_directories: bool, out: &mut Vec<FileStat>) {
    match value {
        Value::String(leaf) => {
            if let Some(stat) = stat_leaf(leaf, ignore, include_directories) {
                out.push(stat);
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, ignore, include_directories, out);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                walk(item, ignore, include_directories, out);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Stat one string leaf, honoring the ignore set.
///
/// Returns `None` for non-existent paths, ignored paths, unreadable entries,
/// and directories when `include_directories` is false.
pub(crate) fn stat_leaf(
    leaf: &str,
    ignore: &BTreeSet<PathBuf>,
    include_directories: bool,
) -> Option<FileStat> {
    let meta = match std::fs::metadata(leaf) {
        Ok(meta) => meta,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                trace!(path = leaf, %err, "skipping unreadable path");
            }
            return None;
        }
    };
    if meta.is_dir() && !include_directories {
        return None;
    }

    let path = std::path::absolute(leaf).ok()?;
    if ignore.contains(&path) {
        return None;
    }

    let size = if meta.is_dir() { 0 } else { meta.len() };
    let mtime = FileTime::from_last_modification_time(&meta).unix_seconds();
    Some(FileStat { path, size, mtime })
}

pub(crate) fn absolute_set(paths: &[PathBuf]) -> BTreeSet<PathBuf> {
    paths
        .iter()
        .filter_map(|path| std::path::absolute(path).ok())
        .collect()
}
