//! Content fingerprints for tasks.
//!
//! A fingerprint digests everything that determines what a task will produce:
//! the callable identity, the argument tree with every existing-file leaf
//! replaced by its stat triple, the declared outputs, and the ignored paths.
//! Output and ignore lists are sorted before hashing, so the order a caller
//! lists them in never affects the digest.
//!
//! Fingerprints are computed when a task becomes ready and not a moment
//! earlier: input files are frequently outputs of dependencies, and hashing
//! them before those dependencies have run would digest stale or absent
//! entries.

use std::{collections::BTreeSet, path::PathBuf};

use derive_more::Display;
use itertools::Itertools;
use serde_json::{Value, json};

use crate::{args::Args, fs, op::Callable};

/// A hex-rendered blake3 digest identifying one unit of work.
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash)]
#[display("{_0}")]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Digest a task's identity material.
///
/// Declared outputs are excluded from input substitution along with the
/// ignore paths: whether the task's own product happens to exist yet must
/// not change its identity, or nothing that names its target in its
/// arguments could ever be satisfied by a prior run.
pub fn compute(
    callable: &Callable,
    args: &Args,
    targets: &[PathBuf],
    ignore: &[PathBuf],
) -> Fingerprint {
    let mut ignore_set = fs::absolute_set(ignore);
    ignore_set.extend(fs::absolute_set(targets));
    let substituted = substitute(&args.to_value(), &ignore_set);

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"callable\0");
    hasher.update(callable.identity().as_bytes());
    hasher.update(b"\nargs\0");
    hasher.update(substituted.to_string().as_bytes());
    hasher.update(b"\ntargets\0");
    for target in canonical_paths(targets) {
        hasher.update(target.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(b"\nignore\0");
    for path in canonical_paths(ignore) {
        hasher.update(path.as_bytes());
        hasher.update(b"\0");
    }

    Fingerprint(hasher.finalize().to_hex().to_string())
}

/// Replace every string leaf naming an existing file with its stat triple.
///
/// Directories are left as plain strings: their contents are reached through
/// the files inside them, and a directory timestamp churns on every unrelated
/// entry change.
fn substitute(value: &Value, ignore: &BTreeSet<PathBuf>) -> Value {
    match value {
        Value::String(leaf) => match fs::stat_leaf(leaf, ignore, false) {
            Some(stat) => json!({
                "path": stat.path.display().to_string(),
                "size": stat.size,
                "mtime": stat.mtime,
            }),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|item| substitute(item, ignore)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, item)| (key.clone(), substitute(item, ignore)))
                .collect(),
        ),
        Value::Null | Value::Bool(_) | Value::Number(_) => value.clone(),
    }
}

fn canonical_paths(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|path| {
            std::path::absolute(path)
                .unwrap_or_else(|_| path.clone())
                .display()
                .to_string()
        })
        .sorted()
        .collect()
}
