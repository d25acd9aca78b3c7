use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::warn;

use crate::pipeline::entry::Entry;

/// Root of everything the collector writes.
pub const PARTS_ROOT: &str = "parts";

const MAX_ATTEMPTS: u32 = 3;
const BASE_BACKOFF_MS: u64 = 250;

/// Hierarchical JSON store addressed by `/`-separated paths.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// Replace whatever is stored at `path`, including its descendants.
    async fn set(&self, path: &str, value: &Value) -> Result<()>;
    /// The node at `path`, or an object assembled from its descendants.
    async fn get(&self, path: &str) -> Result<Option<Value>>;
    async fn exists(&self, path: &str) -> Result<bool>;
    /// Remove `path` and everything under it, returning how many nodes went.
    async fn delete_subtree(&self, path: &str) -> Result<usize>;
    /// Every stored path at or under `prefix`, sorted.
    async fn paths(&self, prefix: &str) -> Result<Vec<String>>;
}

pub fn entry_path(entry: &Entry) -> String {
    format!(
        "{}/{}-{}/{}",
        PARTS_ROOT, entry.device, entry.version, entry.category
    )
}

/// Write an accepted entry, retrying with backoff before giving up.
pub async fn persist(sink: &dyn ResultSink, entry: &Entry) -> Result<()> {
    let path = entry_path(entry);
    let value = serde_json::to_value(entry)?;

    let mut attempt = 0;
    loop {
        match sink.set(&path, &value).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt + 1 < MAX_ATTEMPTS => {
                let backoff = Duration::from_millis(BASE_BACKOFF_MS * 2u64.pow(attempt));
                warn!(
                    "Write to {} failed (attempt {}/{}), retrying in {:.2}s: {:#}",
                    path,
                    attempt + 1,
                    MAX_ATTEMPTS,
                    backoff.as_secs_f64(),
                    e
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(e.context(format!(
                    "Failed to write {} after {} attempts",
                    path, MAX_ATTEMPTS
                )))
            }
        }
    }
}

pub fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

/// True when `path` is `root` itself or lies below it.
pub fn is_within(path: &str, root: &str) -> bool {
    let root = normalize(root);
    root.is_empty()
        || path == root
        || path
            .strip_prefix(root)
            .is_some_and(|rest| rest.starts_with('/'))
}

/// Build the value visible at `root` from the stored nodes at or under it.
///
/// Nodes are applied shallowest first, so deeper paths overlay their ancestors.
pub fn assemble(root: &str, mut nodes: Vec<(String, Value)>) -> Option<Value> {
    let root = normalize(root);
    nodes.sort_by_key(|(path, _)| path.matches('/').count());

    let mut tree: Option<Value> = None;
    for (path, value) in nodes {
        if !is_within(&path, root) {
            continue;
        }
        let relative = path[root.len()..].trim_start_matches('/');
        let segments: Vec<&str> = relative.split('/').filter(|s| !s.is_empty()).collect();
        insert_at(tree.get_or_insert(Value::Null), &segments, value);
    }
    tree
}

fn insert_at(node: &mut Value, segments: &[&str], value: Value) {
    match segments.split_first() {
        None => *node = value,
        Some((head, rest)) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                let child = map.entry(head.to_string()).or_insert(Value::Null);
                insert_at(child, rest, value);
            }
        }
    }
}
