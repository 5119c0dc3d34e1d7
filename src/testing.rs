//! In-memory cluster used by reconcile tests.
//!
//! Behaves like a tiny API server: resource versions move on every effective
//! write, stale writes conflict, objects with finalizers get a
//! deletionTimestamp instead of being removed, and removing an object garbage
//! collects everything that names it as owner.

use crate::client::{ClusterClient, NamespacedObject};
use crate::crd::{ClusterIssuer, IssuerCondition, IssuerStatus};
use crate::error::{api_error, Result};
use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Verb {
    Create,
    Replace,
    Apply,
    Delete,
    PatchStatus,
}

/// One write call as seen by the fake API server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Write {
    pub verb: Verb,
    pub kind: String,
    pub name: String,
}

type Key = (String, String, String);

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Value>,
    version: u64,
    writes: Vec<Write>,
    requests: Vec<Write>,
    failures: HashSet<(Verb, String)>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<State>,
}

const CLUSTER_SCOPE: &str = "";

fn kind_of<K: Resource<DynamicType = ()>>() -> String {
    K::kind(&()).to_string()
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

fn encode<T: Serialize>(obj: &T) -> Result<Value> {
    Ok(serde_json::to_value(obj)?)
}

fn name_of(value: &Value) -> String {
    value["metadata"]["name"].as_str().unwrap_or_default().to_string()
}

/// Object content with server-managed metadata removed, for no-op detection
fn content(value: &Value) -> Value {
    let mut v = value.clone();
    if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
        for field in ["resourceVersion", "uid", "creationTimestamp", "deletionTimestamp"] {
            meta.remove(field);
        }
    }
    v
}

fn finalizers(value: &Value) -> usize {
    value["metadata"]["finalizers"]
        .as_array()
        .map_or(0, |f| f.len())
}

impl State {
    /// Log the attempted call, then fail it if a failure was injected
    fn check(&mut self, verb: Verb, kind: &str, name: &str) -> Result<()> {
        self.requests.push(Write {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });
        if self.failures.contains(&(verb, kind.to_string())) {
            return Err(api_error(500, "InternalError", format!("injected {:?} failure for {}", verb, kind)).into());
        }
        Ok(())
    }

    fn bump(&mut self, value: &mut Value) {
        self.version += 1;
        value["metadata"]["resourceVersion"] = json!(self.version.to_string());
    }

    fn record(&mut self, verb: Verb, kind: &str, name: &str) {
        self.writes.push(Write {
            verb,
            kind: kind.to_string(),
            name: name.to_string(),
        });
    }

    fn insert(&mut self, kind: &str, ns: &str, mut value: Value) -> Result<Value> {
        let name = name_of(&value);
        let key = (kind.to_string(), ns.to_string(), name.clone());
        if self.objects.contains_key(&key) {
            return Err(api_error(409, "AlreadyExists", format!("{} {} already exists", kind, name)).into());
        }
        self.bump(&mut value);
        value["metadata"]["uid"] = json!(format!("uid-{}", self.version));
        value["metadata"]["creationTimestamp"] = json!("2024-01-01T00:00:00Z");
        if ns != CLUSTER_SCOPE {
            value["metadata"]["namespace"] = json!(ns);
        }
        self.objects.insert(key, value.clone());
        Ok(value)
    }

    fn create(&mut self, kind: &str, ns: &str, value: Value) -> Result<Value> {
        self.check(Verb::Create, kind, &name_of(&value))?;
        let created = self.insert(kind, ns, value)?;
        self.record(Verb::Create, kind, &name_of(&created));
        Ok(created)
    }

    fn replace(&mut self, kind: &str, ns: &str, mut value: Value) -> Result<Value> {
        let name = name_of(&value);
        self.check(Verb::Replace, kind, &name)?;
        let key = (kind.to_string(), ns.to_string(), name.clone());
        let Some(stored) = self.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} {} not found", kind, name)).into());
        };
        if value["metadata"]["resourceVersion"] != stored["metadata"]["resourceVersion"] {
            return Err(api_error(409, "Conflict", format!("{} {} has been modified", kind, name)).into());
        }

        // Status and server-owned metadata are not writable through the main resource
        for field in ["uid", "creationTimestamp", "deletionTimestamp"] {
            match stored["metadata"].get(field) {
                Some(v) => value["metadata"][field] = v.clone(),
                None => {
                    if let Some(meta) = value["metadata"].as_object_mut() {
                        meta.remove(field);
                    }
                }
            }
        }
        match stored.get("status") {
            Some(status) => value["status"] = status.clone(),
            None => {
                if let Some(obj) = value.as_object_mut() {
                    obj.remove("status");
                }
            }
        }

        if content(&value) == content(&stored) {
            return Ok(stored);
        }
        self.bump(&mut value);
        self.record(Verb::Replace, kind, &name);

        if value["metadata"].get("deletionTimestamp").is_some() && finalizers(&value) == 0 {
            self.remove(&key);
            return Ok(value);
        }
        self.objects.insert(key, value.clone());
        Ok(value)
    }

    fn apply(&mut self, kind: &str, ns: &str, mut value: Value) -> Result<Value> {
        let name = name_of(&value);
        self.check(Verb::Apply, kind, &name)?;
        let key = (kind.to_string(), ns.to_string(), name.clone());
        let Some(stored) = self.objects.get(&key).cloned() else {
            let created = self.insert(kind, ns, value)?;
            self.record(Verb::Apply, kind, &name);
            return Ok(created);
        };

        for field in ["resourceVersion", "uid", "creationTimestamp", "deletionTimestamp"] {
            if let Some(v) = stored["metadata"].get(field) {
                value["metadata"][field] = v.clone();
            }
        }
        if ns != CLUSTER_SCOPE {
            value["metadata"]["namespace"] = json!(ns);
        }
        if let Some(status) = stored.get("status") {
            value["status"] = status.clone();
        }
        if content(&value) == content(&stored) {
            return Ok(stored);
        }
        self.bump(&mut value);
        self.record(Verb::Apply, kind, &name);
        self.objects.insert(key, value.clone());
        Ok(value)
    }

    fn delete(&mut self, kind: &str, ns: &str, name: &str) -> Result<bool> {
        self.check(Verb::Delete, kind, name)?;
        let key = (kind.to_string(), ns.to_string(), name.to_string());
        let Some(mut stored) = self.objects.get(&key).cloned() else {
            return Ok(false);
        };
        self.record(Verb::Delete, kind, name);
        if finalizers(&stored) > 0 {
            if stored["metadata"].get("deletionTimestamp").is_none() {
                stored["metadata"]["deletionTimestamp"] = json!("2024-01-02T00:00:00Z");
                self.bump(&mut stored);
                self.objects.insert(key, stored);
            }
            return Ok(true);
        }
        self.remove(&key);
        Ok(true)
    }

    fn patch_status(&mut self, kind: &str, ns: &str, name: &str, status: Value) -> Result<()> {
        self.check(Verb::PatchStatus, kind, name)?;
        let key = (kind.to_string(), ns.to_string(), name.to_string());
        let Some(mut stored) = self.objects.get(&key).cloned() else {
            return Err(api_error(404, "NotFound", format!("{} {} not found", kind, name)).into());
        };
        let before = stored.clone();
        if !stored["status"].is_object() {
            stored["status"] = json!({});
        }
        if let (Some(target), Some(patch)) = (stored["status"].as_object_mut(), status.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        if stored == before {
            return Ok(());
        }
        self.bump(&mut stored);
        self.record(Verb::PatchStatus, kind, name);
        self.objects.insert(key, stored);
        Ok(())
    }

    /// Remove an object and cascade to its dependents
    fn remove(&mut self, key: &Key) {
        let mut pending: Vec<String> = self
            .objects
            .remove(key)
            .and_then(|v| v["metadata"]["uid"].as_str().map(str::to_string))
            .into_iter()
            .collect();
        while let Some(uid) = pending.pop() {
            let dependents: Vec<Key> = self
                .objects
                .iter()
                .filter(|(_, v)| {
                    v["metadata"]["ownerReferences"]
                        .as_array()
                        .is_some_and(|refs| refs.iter().any(|r| r["uid"] == json!(uid)))
                })
                .map(|(k, _)| k.clone())
                .collect();
            for dep in dependents {
                if let Some(v) = self.objects.remove(&dep) {
                    if let Some(uid) = v["metadata"]["uid"].as_str() {
                        pending.push(uid.to_string());
                    }
                }
            }
        }
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an object as if a user had created it. Not recorded as a write.
    pub fn seed<K: NamespacedObject>(&self, obj: K) -> K {
        let ns = obj.meta().namespace.clone().unwrap_or_else(|| "default".to_string());
        let value = serde_json::to_value(&obj).unwrap();
        let stored = self.state.lock().unwrap().insert(&kind_of::<K>(), &ns, value).unwrap();
        serde_json::from_value(stored).unwrap()
    }

    pub fn seed_issuer(&self, issuer: ClusterIssuer) -> ClusterIssuer {
        let value = serde_json::to_value(&issuer).unwrap();
        let stored = self
            .state
            .lock()
            .unwrap()
            .insert(&kind_of::<ClusterIssuer>(), CLUSTER_SCOPE, value)
            .unwrap();
        serde_json::from_value(stored).unwrap()
    }

    pub fn object<K: NamespacedObject>(&self, ns: &str, name: &str) -> Option<K> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind_of::<K>(), ns.to_string(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn issuer(&self, name: &str) -> Option<ClusterIssuer> {
        let state = self.state.lock().unwrap();
        state
            .objects
            .get(&(kind_of::<ClusterIssuer>(), CLUSTER_SCOPE.to_string(), name.to_string()))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Report the issuer as Ready (or not), the way cert-manager would.
    pub fn set_issuer_ready(&self, name: &str, ready: bool) {
        let mut state = self.state.lock().unwrap();
        let key = (kind_of::<ClusterIssuer>(), CLUSTER_SCOPE.to_string(), name.to_string());
        let mut value = state.objects.get(&key).cloned().expect("issuer exists");
        let status = IssuerStatus {
            conditions: vec![IssuerCondition {
                r#type: "Ready".to_string(),
                status: if ready { "True" } else { "False" }.to_string(),
                reason: Some("ACMEAccountRegistered".to_string()),
                message: None,
            }],
        };
        value["status"] = serde_json::to_value(status).unwrap();
        state.bump(&mut value);
        state.objects.insert(key, value);
    }

    /// Ask for deletion the way `kubectl delete` would
    pub fn request_delete<K: NamespacedObject>(&self, ns: &str, name: &str) {
        let mut state = self.state.lock().unwrap();
        state.delete(&kind_of::<K>(), ns, name).unwrap();
        state.writes.clear();
        state.requests.clear();
    }

    /// Effective writes only: calls that changed stored state
    pub fn writes(&self) -> Vec<Write> {
        self.state.lock().unwrap().writes.clone()
    }

    /// Every write call received, including no-ops and injected failures
    pub fn requests(&self) -> Vec<Write> {
        self.state.lock().unwrap().requests.clone()
    }

    /// Forget both write logs
    pub fn clear_writes(&self) {
        let mut state = self.state.lock().unwrap();
        state.writes.clear();
        state.requests.clear();
    }

    /// Make every `verb` on `kind` fail with a 500
    pub fn fail(&self, verb: Verb, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert((verb, kind.to_string()));
    }

    pub fn heal(&self) {
        self.state.lock().unwrap().failures.clear();
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let value = {
            let state = self.state.lock().unwrap();
            state
                .objects
                .get(&(kind_of::<K>(), namespace.to_string(), name.to_string()))
                .cloned()
        };
        value.map(decode).transpose()
    }

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let value = encode(obj)?;
        let created = self.state.lock().unwrap().create(&kind_of::<K>(), namespace, value)?;
        decode(created)
    }

    async fn replace<K: NamespacedObject>(&self, namespace: &str, obj: &K) -> Result<K> {
        let value = encode(obj)?;
        let replaced = self.state.lock().unwrap().replace(&kind_of::<K>(), namespace, value)?;
        decode(replaced)
    }

    async fn apply<K: NamespacedObject>(
        &self,
        namespace: &str,
        obj: &K,
        _field_manager: &str,
    ) -> Result<K> {
        let value = encode(obj)?;
        let applied = self.state.lock().unwrap().apply(&kind_of::<K>(), namespace, value)?;
        decode(applied)
    }

    async fn delete<K: NamespacedObject>(&self, namespace: &str, name: &str) -> Result<bool> {
        self.state.lock().unwrap().delete(&kind_of::<K>(), namespace, name)
    }

    async fn patch_status<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        status: Value,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .patch_status(&kind_of::<K>(), namespace, name, status)
    }

    async fn get_issuer(&self, name: &str) -> Result<Option<ClusterIssuer>> {
        Ok(self.issuer(name))
    }

    async fn create_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer> {
        let value = encode(issuer)?;
        let created = self
            .state
            .lock()
            .unwrap()
            .create(&kind_of::<ClusterIssuer>(), CLUSTER_SCOPE, value)?;
        decode(created)
    }

    async fn replace_issuer(&self, issuer: &ClusterIssuer) -> Result<ClusterIssuer> {
        let value = encode(issuer)?;
        let replaced = self
            .state
            .lock()
            .unwrap()
            .replace(&kind_of::<ClusterIssuer>(), CLUSTER_SCOPE, value)?;
        decode(replaced)
    }

    async fn delete_issuer(&self, name: &str) -> Result<bool> {
        self.state
            .lock()
            .unwrap()
            .delete(&kind_of::<ClusterIssuer>(), CLUSTER_SCOPE, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn config_map(name: &str) -> ConfigMap {
        ConfigMap {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("ns1".to_string()),
                ..Default::default()
            },
            data: Some([("k".to_string(), "v".to_string())].into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_stale_replace_conflicts() {
        let cluster = FakeCluster::new();
        let stored = cluster.seed(config_map("a"));

        let mut first = stored.clone();
        first.data = Some([("k".to_string(), "v2".to_string())].into());
        cluster.replace("ns1", &first).await.unwrap();

        let mut second = stored;
        second.data = Some([("k".to_string(), "v3".to_string())].into());
        let err = cluster.replace("ns1", &second).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn test_noop_writes_are_not_recorded() {
        let cluster = FakeCluster::new();
        let stored = cluster.seed(config_map("a"));
        cluster.replace("ns1", &stored).await.unwrap();
        cluster.apply("ns1", &config_map("a"), "test").await.unwrap();
        assert!(cluster.writes().is_empty());

        let verbs: Vec<Verb> = cluster.requests().iter().map(|w| w.verb).collect();
        assert_eq!(verbs, vec![Verb::Replace, Verb::Apply]);
    }

    #[tokio::test]
    async fn test_finalizer_blocks_removal_and_gc_cascades() {
        let cluster = FakeCluster::new();
        let mut owner = config_map("owner");
        owner.metadata.finalizers = Some(vec!["x/y".to_string()]);
        let owner = cluster.seed(owner);

        let mut child = config_map("child");
        child.metadata.owner_references = Some(vec![
            k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference {
                uid: owner.metadata.uid.clone().unwrap(),
                ..Default::default()
            },
        ]);
        cluster.seed(child);

        assert!(cluster.delete::<ConfigMap>("ns1", "owner").await.unwrap());
        let deleting: ConfigMap = cluster.object("ns1", "owner").unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());

        let mut released = deleting;
        released.metadata.finalizers = Some(vec![]);
        cluster.replace("ns1", &released).await.unwrap();
        assert!(cluster.object::<ConfigMap>("ns1", "owner").is_none());
        assert!(cluster.object::<ConfigMap>("ns1", "child").is_none());
    }

    #[tokio::test]
    async fn test_injected_failure() {
        let cluster = FakeCluster::new();
        cluster.fail(Verb::Create, "ConfigMap");
        assert!(cluster.create("ns1", &config_map("a")).await.is_err());
        cluster.heal();
        assert!(cluster.create("ns1", &config_map("a")).await.is_ok());
    }
}
