use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use kube::{Resource, ResourceExt};
use serde_json::{Value as JsonValue, json};
use tokio::sync::Mutex;

use super::{ClusterApi, ClusterError, Managed, kind_of};
use crate::crd::{ServiceDefinition, ServiceDefinitionStatus};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Replace,
    Status,
    Finalizers,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteRecord {
    pub op: WriteOp,
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

type ObjectKey = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<ObjectKey, JsonValue>,
    next_version: u64,
    writes: Vec<WriteRecord>,
    failures: Vec<(WriteOp, String)>,
}

impl State {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn take_failure(&mut self, op: WriteOp, kind: &str) -> Option<ClusterError> {
        let idx = self
            .failures
            .iter()
            .position(|(o, k)| *o == op && k == kind)?;
        let (op, kind) = self.failures.remove(idx);
        Some(ClusterError::Injected(format!("{:?} {}", op, kind)))
    }

    fn record(&mut self, op: WriteOp, kind: String, ns: &str, name: &str) {
        self.writes.push(WriteRecord {
            op,
            kind,
            namespace: ns.to_string(),
            name: name.to_string(),
        });
    }

    /// Drop an object and, like the garbage collector, every object it
    /// controls.
    fn remove_cascading(&mut self, key: &ObjectKey) {
        let Some(removed) = self.objects.remove(key) else {
            return;
        };
        let Some(uid) = removed
            .pointer("/metadata/uid")
            .and_then(|u| u.as_str())
            .map(str::to_string)
        else {
            return;
        };
        let dependents: Vec<ObjectKey> = self
            .objects
            .iter()
            .filter(|(_, v)| owned_by(v, &uid))
            .map(|(k, _)| k.clone())
            .collect();
        for dep in dependents {
            self.remove_cascading(&dep);
        }
    }
}

fn owned_by(obj: &JsonValue, uid: &str) -> bool {
    obj.pointer("/metadata/ownerReferences")
        .and_then(|refs| refs.as_array())
        .map(|refs| {
            refs.iter().any(|r| r.get("uid").and_then(|u| u.as_str()) == Some(uid))
        })
        .unwrap_or(false)
}

fn key_of<K: Managed>(ns: &str, name: &str) -> ObjectKey {
    (
        format!("{}/{}", K::api_version(&()), K::kind(&())),
        ns.to_string(),
        name.to_string(),
    )
}

fn stored_version(obj: &JsonValue) -> Option<&str> {
    obj.pointer("/metadata/resourceVersion")
        .and_then(|v| v.as_str())
}

fn set_meta(obj: &mut JsonValue, field: &str, value: JsonValue) {
    if let Some(meta) = obj.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.insert(field.to_string(), value);
    }
}

/// In-memory cluster with resource-version checks, status subresource
/// semantics and owner-reference cascade deletion. Every write issued
/// through [`ClusterApi`] is recorded; the inherent helpers model changes
/// made by other actors and are not recorded.
#[derive(Clone, Default)]
pub struct MemoryCluster {
    state: Arc<Mutex<State>>,
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if created by someone else.
    pub async fn insert<K: Managed>(&self, ns: &str, obj: K) -> K {
        let mut st = self.state.lock().await;
        let name = obj.name_any();
        let mut value = serde_json::to_value(&obj).unwrap_or(JsonValue::Null);
        let version = st.bump();
        set_meta(&mut value, "namespace", json!(ns));
        set_meta(&mut value, "resourceVersion", json!(version));
        set_meta(&mut value, "generation", json!(1));
        if obj.meta().uid.is_none() {
            set_meta(&mut value, "uid", json!(format!("uid-{}", version)));
        }
        st.objects.insert(key_of::<K>(ns, &name), value.clone());
        serde_json::from_value(value).unwrap_or(obj)
    }

    /// Apply an out-of-band change (build pipeline, manual edit).
    pub async fn mutate<K: Managed>(
        &self,
        ns: &str,
        name: &str,
        f: impl FnOnce(&mut K),
    ) -> Option<K> {
        let mut st = self.state.lock().await;
        let key = key_of::<K>(ns, name);
        let current = st.objects.get(&key)?.clone();
        let mut obj: K = serde_json::from_value(current.clone()).ok()?;
        f(&mut obj);
        let version = st.bump();
        obj.meta_mut().resource_version = Some(version);
        let mut value = serde_json::to_value(&obj).ok()?;
        if current.get("spec") != value.get("spec") {
            let generation = current
                .pointer("/metadata/generation")
                .and_then(JsonValue::as_i64)
                .unwrap_or(0);
            set_meta(&mut value, "generation", json!(generation + 1));
        }
        let obj = serde_json::from_value(value.clone()).ok()?;
        st.objects.insert(key, value);
        Some(obj)
    }

    /// Delete an object out of band, cascading to what it controls.
    pub async fn remove<K: Managed>(&self, ns: &str, name: &str) {
        let mut st = self.state.lock().await;
        st.remove_cascading(&key_of::<K>(ns, name));
    }

    /// Mark an object for deletion. Without finalizers it disappears at
    /// once; otherwise it stays until its finalizers are cleared.
    pub async fn request_delete<K: Managed>(&self, ns: &str, name: &str) {
        let mut st = self.state.lock().await;
        let key = key_of::<K>(ns, name);
        let version = st.bump();
        let Some(obj) = st.objects.get_mut(&key) else {
            return;
        };
        let pending = obj
            .pointer("/metadata/finalizers")
            .and_then(|f| f.as_array())
            .map(|f| !f.is_empty())
            .unwrap_or(false);
        if pending {
            let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
            set_meta(obj, "deletionTimestamp", json!(now));
            set_meta(obj, "resourceVersion", json!(version));
        } else {
            st.remove_cascading(&key);
        }
    }

    pub async fn exists<K: Managed>(&self, ns: &str, name: &str) -> bool {
        let st = self.state.lock().await;
        st.objects.contains_key(&key_of::<K>(ns, name))
    }

    /// Make the next `op` on `kind` fail once.
    pub async fn fail_next(&self, op: WriteOp, kind: &str) {
        let mut st = self.state.lock().await;
        st.failures.push((op, kind.to_string()));
    }

    pub async fn writes(&self) -> Vec<WriteRecord> {
        self.state.lock().await.writes.clone()
    }

    pub async fn clear_writes(&self) {
        self.state.lock().await.writes.clear();
    }
}

#[async_trait]
impl ClusterApi for MemoryCluster {
    async fn get<K: Managed>(
        &self,
        ns: &str,
        name: &str,
    ) -> Result<Option<K>, ClusterError> {
        let st = self.state.lock().await;
        match st.objects.get(&key_of::<K>(ns, name)) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn create<K: Managed>(
        &self,
        ns: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let mut st = self.state.lock().await;
        let kind = kind_of::<K>();
        let name = obj.name_any();
        if let Some(err) = st.take_failure(WriteOp::Create, &kind) {
            return Err(err);
        }
        let key = key_of::<K>(ns, &name);
        if st.objects.contains_key(&key) {
            return Err(ClusterError::AlreadyExists { kind, name });
        }
        let mut value = serde_json::to_value(obj)?;
        let version = st.bump();
        set_meta(&mut value, "namespace", json!(ns));
        set_meta(&mut value, "resourceVersion", json!(version));
        set_meta(&mut value, "generation", json!(1));
        set_meta(&mut value, "uid", json!(format!("uid-{}", version)));
        st.objects.insert(key, value.clone());
        st.record(WriteOp::Create, kind, ns, &name);
        Ok(serde_json::from_value(value)?)
    }

    async fn replace<K: Managed>(
        &self,
        ns: &str,
        obj: &K,
    ) -> Result<K, ClusterError> {
        let mut st = self.state.lock().await;
        let kind = kind_of::<K>();
        let name = obj.name_any();
        if let Some(err) = st.take_failure(WriteOp::Replace, &kind) {
            return Err(err);
        }
        let Some(sent_version) = obj.resource_version() else {
            return Err(ClusterError::MissingResourceVersion { kind, name });
        };
        let key = key_of::<K>(ns, &name);
        let Some(current) = st.objects.get(&key).cloned() else {
            return Err(ClusterError::Gone { kind, name });
        };
        if stored_version(&current) != Some(sent_version.as_str()) {
            return Err(ClusterError::Conflict { kind, name });
        }
        let mut value = serde_json::to_value(obj)?;
        // The main resource endpoint never writes status.
        if let Some(map) = value.as_object_mut() {
            match current.get("status") {
                Some(status) => {
                    map.insert("status".into(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        let mut generation = current
            .pointer("/metadata/generation")
            .and_then(|g| g.as_i64())
            .unwrap_or(1);
        if current.get("spec") != value.get("spec") {
            generation += 1;
        }
        let version = st.bump();
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            if let Some(v) = current.pointer(&format!("/metadata/{field}")) {
                set_meta(&mut value, field, v.clone());
            }
        }
        set_meta(&mut value, "resourceVersion", json!(version));
        set_meta(&mut value, "generation", json!(generation));
        st.objects.insert(key, value.clone());
        st.record(WriteOp::Replace, kind, ns, &name);
        Ok(serde_json::from_value(value)?)
    }

    async fn patch_status(
        &self,
        def: &ServiceDefinition,
        status: &ServiceDefinitionStatus,
    ) -> Result<ServiceDefinition, ClusterError> {
        let mut st = self.state.lock().await;
        let kind = kind_of::<ServiceDefinition>();
        let name = def.name_any();
        let ns = def.namespace().unwrap_or_default();
        if let Some(err) = st.take_failure(WriteOp::Status, &kind) {
            return Err(err);
        }
        let key = key_of::<ServiceDefinition>(&ns, &name);
        let version = st.bump();
        let Some(current) = st.objects.get_mut(&key) else {
            return Err(ClusterError::Gone { kind, name });
        };
        if stored_version(current) != def.resource_version().as_deref() {
            return Err(ClusterError::Conflict { kind, name });
        }
        if let Some(map) = current.as_object_mut() {
            map.insert("status".into(), serde_json::to_value(status)?);
        }
        set_meta(current, "resourceVersion", json!(version));
        let updated = serde_json::from_value(current.clone())?;
        st.record(WriteOp::Status, kind, &ns, &name);
        Ok(updated)
    }

    async fn patch_finalizers(
        &self,
        def: &ServiceDefinition,
        finalizers: Vec<String>,
    ) -> Result<ServiceDefinition, ClusterError> {
        let mut st = self.state.lock().await;
        let kind = kind_of::<ServiceDefinition>();
        let name = def.name_any();
        let ns = def.namespace().unwrap_or_default();
        if let Some(err) = st.take_failure(WriteOp::Finalizers, &kind) {
            return Err(err);
        }
        let key = key_of::<ServiceDefinition>(&ns, &name);
        let version = st.bump();
        let Some(current) = st.objects.get_mut(&key) else {
            return Err(ClusterError::Gone { kind, name });
        };
        if stored_version(current) != def.resource_version().as_deref() {
            return Err(ClusterError::Conflict { kind, name });
        }
        let released = finalizers.is_empty()
            && current.pointer("/metadata/deletionTimestamp").is_some();
        set_meta(current, "finalizers", json!(finalizers));
        set_meta(current, "resourceVersion", json!(version));
        let updated = serde_json::from_value(current.clone())?;
        st.record(WriteOp::Finalizers, kind, &ns, &name);
        if released {
            st.remove_cascading(&key);
        }
        Ok(updated)
    }
}
