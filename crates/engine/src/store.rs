//! The namespaced shared store — the per-run key/value space that makes
//! parallel nodes safe without locks at the namespace level, while still
//! using an internal lock to guard the underlying map (see Design Notes:
//! "Views are zero-cost handles carrying the owner-namespace string; they
//! capture a back-pointer to the store with write checks at the boundary").

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use uuid::Uuid;

use nodes::{NodeError, StoreView as StoreViewTrait};

use crate::template::resolve_path_str;

/// Reserved namespace holding workflow inputs (user-supplied + defaulted).
/// Read-only to nodes.
pub const INPUTS_NAMESPACE: &str = "__inputs__";

/// Reserved namespace holding run metadata (`run_id`, `started_at`,
/// `verbose`). Read-only to nodes.
pub const META_NAMESPACE: &str = "__meta__";

/// Per-run metadata exposed under the `__meta__` namespace.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RunMeta {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub verbose: bool,
}

impl RunMeta {
    pub fn as_value(&self) -> Value {
        serde_json::json!({
            "run_id": self.run_id,
            "started_at": self.started_at,
            "verbose": self.verbose,
        })
    }
}

struct StoreInner {
    namespaces: HashMap<String, serde_json::Map<String, Value>>,
    inputs: serde_json::Map<String, Value>,
    meta: RunMeta,
}

/// The per-run two-level map: `node_id -> {key -> value}`, plus the
/// reserved `__inputs__`/`__meta__` entries.
pub struct SharedStore {
    inner: RwLock<StoreInner>,
}

impl SharedStore {
    /// Create a new store for a run. `node_ids` pre-registers an empty
    /// namespace for every compiled node so template root resolution can
    /// distinguish "unknown name" from "node hasn't written yet". `run_id`
    /// is caller-assigned rather than generated here so it can match a
    /// pre-existing execution record (e.g. the row the API created before
    /// enqueuing the job) instead of diverging from it.
    pub fn new(
        inputs: serde_json::Map<String, Value>,
        node_ids: impl IntoIterator<Item = String>,
        verbose: bool,
        run_id: Uuid,
    ) -> Self {
        let mut namespaces = HashMap::new();
        for id in node_ids {
            namespaces.insert(id, serde_json::Map::new());
        }
        let meta = RunMeta {
            run_id,
            started_at: Utc::now(),
            verbose,
        };
        Self {
            inner: RwLock::new(StoreInner {
                namespaces,
                inputs,
                meta,
            }),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.inner.read().meta.run_id
    }

    pub fn get(&self, namespace: &str, key: &str) -> Option<Value> {
        self.inner
            .read()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .cloned()
    }

    pub fn has(&self, namespace: &str, key: &str) -> bool {
        self.inner
            .read()
            .namespaces
            .get(namespace)
            .map(|ns| ns.contains_key(key))
            .unwrap_or(false)
    }

    pub fn set(&self, namespace: &str, key: &str, value: Value) {
        let mut guard = self.inner.write();
        guard
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn delete(&self, namespace: &str, key: &str) -> Option<Value> {
        self.inner
            .write()
            .namespaces
            .get_mut(namespace)
            .and_then(|ns| ns.remove(key))
    }

    pub fn keys(&self, namespace: &str) -> Vec<String> {
        self.inner
            .read()
            .namespaces
            .get(namespace)
            .map(|ns| ns.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `name` is a registered node namespace.
    pub fn namespace_exists(&self, name: &str) -> bool {
        self.inner.read().namespaces.contains_key(name)
    }

    /// The entire namespace as a JSON object, used as a template
    /// resolution root.
    pub fn namespace_value(&self, name: &str) -> Option<Value> {
        self.inner
            .read()
            .namespaces
            .get(name)
            .map(|ns| Value::Object(ns.clone()))
    }

    pub fn has_input(&self, name: &str) -> bool {
        self.inner.read().inputs.contains_key(name)
    }

    pub fn get_input(&self, name: &str) -> Option<Value> {
        self.inner.read().inputs.get(name).cloned()
    }

    pub fn inputs_value(&self) -> Value {
        Value::Object(self.inner.read().inputs.clone())
    }

    pub fn meta(&self) -> RunMeta {
        self.inner.read().meta.clone()
    }

    /// Deep-copy the whole store for trace/debug purposes.
    pub fn snapshot(&self) -> Value {
        let guard = self.inner.read();
        let mut out = serde_json::Map::new();
        for (ns, map) in guard.namespaces.iter() {
            out.insert(ns.clone(), Value::Object(map.clone()));
        }
        out.insert(INPUTS_NAMESPACE.to_string(), Value::Object(guard.inputs.clone()));
        out.insert(META_NAMESPACE.to_string(), guard.meta.as_value());
        Value::Object(out)
    }

    /// Return a view scoped to `owner`'s namespace for writes.
    pub fn view(self: &Arc<Self>, owner: &str) -> StoreViewImpl {
        StoreViewImpl {
            store: Arc::clone(self),
            owner: owner.to_string(),
        }
    }
}

/// Concrete `nodes::StoreView` implementation scoped to a single owner
/// namespace. Reads may traverse any namespace; writes, deletes, and
/// `keys()` are confined to `owner`.
pub struct StoreViewImpl {
    store: Arc<SharedStore>,
    owner: String,
}

impl StoreViewTrait for StoreViewImpl {
    fn read(&self, path: &str) -> Result<Value, NodeError> {
        resolve_path_str(&self.store, path).map_err(|e| NodeError::UnresolvedPath(e.to_string()))
    }

    fn write(&self, key: &str, value: Value) -> Result<(), NodeError> {
        if self.owner == INPUTS_NAMESPACE || self.owner == META_NAMESPACE {
            return Err(NodeError::ScopeViolation {
                owner: self.owner.clone(),
                key: key.to_string(),
            });
        }
        self.store.set(&self.owner, key, value);
        Ok(())
    }

    fn has(&self, key: &str) -> bool {
        self.store.has(&self.owner, key)
    }

    fn delete(&self, key: &str) -> Option<Value> {
        self.store.delete(&self.owner, key)
    }

    fn keys(&self) -> Vec<String> {
        self.store.keys(&self.owner)
    }

    fn own(&self, key: &str) -> Option<Value> {
        self.store.get(&self.owner, key)
    }

    fn owner(&self) -> &str {
        &self.owner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_own_namespace() {
        let store = Arc::new(SharedStore::new(
            serde_json::Map::new(),
            vec!["a".to_string()],
            false,
            Uuid::new_v4(),
        ));
        let view = store.view("a");
        view.write("x", serde_json::json!(1)).unwrap();
        assert_eq!(view.own("x"), Some(serde_json::json!(1)));
        assert!(store.has("a", "x"));
    }

    #[test]
    fn reserved_namespaces_reject_writes() {
        let store = Arc::new(SharedStore::new(serde_json::Map::new(), vec![], false, Uuid::new_v4()));
        let view = store.view(INPUTS_NAMESPACE);
        let err = view.write("x", serde_json::json!(1)).unwrap_err();
        assert!(matches!(err, NodeError::ScopeViolation { .. }));
    }

    #[test]
    fn snapshot_includes_reserved_namespaces() {
        let mut inputs = serde_json::Map::new();
        inputs.insert("url".to_string(), serde_json::json!("https://x"));
        let store = SharedStore::new(inputs, vec!["a".to_string()], true, Uuid::new_v4());
        let snap = store.snapshot();
        assert!(snap.get(INPUTS_NAMESPACE).is_some());
        assert!(snap.get(META_NAMESPACE).is_some());
        assert!(snap.get("a").is_some());
    }
}
