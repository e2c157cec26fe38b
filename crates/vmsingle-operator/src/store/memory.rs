use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use kube::ResourceExt;
use serde_json::Value;

use super::{ObjectStore, StoreObject, kind_of};
use crate::error::ReconcileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    List,
    PatchStatus,
}

impl StoreOp {
    pub fn is_mutation(self) -> bool {
        matches!(self, StoreOp::Create | StoreOp::Update | StoreOp::PatchStatus)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    pub op: StoreOp,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    calls: Vec<StoreCall>,
    faults: Vec<(StoreOp, String, ReconcileError)>,
    resource_version: u64,
}

/// In-process object store with the same conflict semantics as the API server.
///
/// Records every call and can be told to fail the next call of a given
/// operation and kind. Used by tests and dry runs.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every call, so callers can exercise timeouts and cancellation.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // a panicking test thread must not hide the store from the others
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Seeds an object without recording a call. Assigns a resource version.
    pub fn insert<K: StoreObject>(&self, obj: K) -> Result<K, ReconcileError> {
        let mut inner = self.lock();
        let key = key_of(&obj);
        inner.resource_version += 1;
        let rv = inner.resource_version;
        let value = with_resource_version(serde_json::to_value(&obj)?, rv);
        inner.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    /// Reads an object without recording a call.
    pub fn object<K: StoreObject>(&self, namespace: &str, name: &str) -> Option<K> {
        let key = (kind_of::<K>(), namespace.to_string(), name.to_string());
        self.lock()
            .objects
            .get(&key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Raw stored value, status subresource included.
    pub fn raw(&self, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        self.lock().objects.get(&key).cloned()
    }

    /// Removes an object as if something outside the operator deleted it.
    pub fn remove(&self, kind: &str, namespace: &str, name: &str) -> bool {
        let key = (kind.to_string(), namespace.to_string(), name.to_string());
        self.lock().objects.remove(&key).is_some()
    }

    /// Fails the next `op` on `kind` with `err`.
    pub fn fail_next(&self, op: StoreOp, kind: &str, err: ReconcileError) {
        self.lock().faults.push((op, kind.to_string(), err));
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<StoreCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.op.is_mutation())
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    async fn enter(
        &self,
        op: StoreOp,
        kind: &str,
        namespace: &str,
        name: &str,
    ) -> Result<(), ReconcileError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let mut inner = self.lock();
        inner.calls.push(StoreCall {
            op,
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        });
        if let Some(pos) = inner
            .faults
            .iter()
            .position(|(fop, fkind, _)| *fop == op && fkind == kind)
        {
            let (_, _, err) = inner.faults.remove(pos);
            return Err(err);
        }
        Ok(())
    }
}

fn key_of<K: StoreObject>(obj: &K) -> Key {
    (
        kind_of::<K>(),
        obj.namespace().unwrap_or_default(),
        obj.name_any(),
    )
}

fn with_resource_version(mut value: Value, rv: u64) -> Value {
    if let Some(meta) = value.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert("resourceVersion".into(), Value::String(rv.to_string()));
    }
    value
}

fn not_found(key: &Key) -> ReconcileError {
    ReconcileError::NotFound {
        kind: key.0.clone(),
        namespace: key.1.clone(),
        name: key.2.clone(),
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K, ReconcileError> {
        let kind = kind_of::<K>();
        self.enter(StoreOp::Get, &kind, namespace, name).await?;
        let key = (kind, namespace.to_string(), name.to_string());
        let value = self.lock().objects.get(&key).cloned();
        match value {
            Some(v) => Ok(serde_json::from_value(v)?),
            None => Err(not_found(&key)),
        }
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, ReconcileError> {
        let key = key_of(obj);
        self.enter(StoreOp::Create, &key.0, &key.1, &key.2).await?;
        let mut inner = self.lock();
        if inner.objects.contains_key(&key) {
            return Err(ReconcileError::AlreadyExists {
                kind: key.0,
                namespace: key.1,
                name: key.2,
            });
        }
        inner.resource_version += 1;
        let value = with_resource_version(serde_json::to_value(obj)?, inner.resource_version);
        inner.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, ReconcileError> {
        let key = key_of(obj);
        self.enter(StoreOp::Update, &key.0, &key.1, &key.2).await?;
        let mut inner = self.lock();
        let Some(current) = inner.objects.get(&key) else {
            return Err(not_found(&key));
        };
        let current_rv = current
            .pointer("/metadata/resourceVersion")
            .and_then(Value::as_str)
            .map(str::to_string);
        let status = current.get("status").cloned();
        if let Some(rv) = obj.resource_version()
            && current_rv.as_deref() != Some(rv.as_str())
        {
            return Err(ReconcileError::Conflict {
                kind: key.0,
                namespace: key.1,
                name: key.2,
                message: format!(
                    "resource version {rv} is stale, current is {}",
                    current_rv.unwrap_or_default()
                ),
            });
        }
        inner.resource_version += 1;
        let mut value = with_resource_version(serde_json::to_value(obj)?, inner.resource_version);
        // replace never touches the status subresource
        if let (Some(status), Some(map)) = (status, value.as_object_mut()) {
            map.insert("status".into(), status);
        }
        inner.objects.insert(key, value.clone());
        Ok(serde_json::from_value(value)?)
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>, ReconcileError> {
        let kind = kind_of::<K>();
        self.enter(StoreOp::List, &kind, namespace.unwrap_or(""), "")
            .await?;
        let values: Vec<Value> = self
            .lock()
            .objects
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && namespace.is_none_or(|want| want == ns))
            .map(|(_, v)| v.clone())
            .collect();
        values
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(ReconcileError::from))
            .collect()
    }

    async fn patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ReconcileError> {
        let kind = kind_of::<K>();
        self.enter(StoreOp::PatchStatus, &kind, namespace, name)
            .await?;
        let key = (kind, namespace.to_string(), name.to_string());
        let mut inner = self.lock();
        let Some(obj) = inner.objects.get_mut(&key).and_then(Value::as_object_mut) else {
            return Err(not_found(&key));
        };
        let slot = obj
            .entry("status")
            .or_insert_with(|| Value::Object(Default::default()));
        match status {
            Value::Object(patch) if slot.is_object() => {
                if let Some(current) = slot.as_object_mut() {
                    current.extend(patch);
                }
            }
            other => *slot = other,
        }
        Ok(())
    }
}
