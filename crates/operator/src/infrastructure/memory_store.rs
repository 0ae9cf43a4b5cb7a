//! In-process [`ClusterStore`].
//!
//! Keeps children and statuses in memory, journals every call and can be
//! told to fail specific operations. Used by tests and by `--dry-run`.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use api_types::WorkerPoolStatus;
use async_trait::async_trait;
use error_stack::Report;
use serde_json::Value;
use tracing::debug;
use tracing::info;

use crate::domain::error::StoreError;
use crate::domain::manifest::ChildKind;
use crate::domain::traits::ClusterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Create,
    PatchSpec,
    PatchStatus,
}

/// One call received by the store, successful or not.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreCall {
    Create {
        kind: ChildKind,
        namespace: String,
        name: String,
        manifest: Value,
    },
    PatchSpec {
        kind: ChildKind,
        namespace: String,
        name: String,
        spec: Value,
    },
    PatchStatus {
        namespace: String,
        name: String,
        status: WorkerPoolStatus,
    },
}

#[derive(Debug)]
struct Fault {
    op: StoreOp,
    kind: Option<ChildKind>,
    error: StoreError,
}

type ChildKey = (ChildKind, String, String);

#[derive(Debug, Default)]
struct Inner {
    children: BTreeMap<ChildKey, Value>,
    statuses: BTreeMap<(String, String), WorkerPoolStatus>,
    journal: Vec<StoreCall>,
    faults: Vec<Fault>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    /// Log every write with its full document at info level
    log_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store for `--dry-run`: writes stay in memory and are logged in full.
    pub fn dry_run() -> Self {
        Self {
            log_writes: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes every later `op` fail with `error`. `kind` narrows the fault to
    /// one child kind; it is ignored for status writes.
    pub fn fail(&self, op: StoreOp, kind: Option<ChildKind>, error: StoreError) {
        self.lock().faults.push(Fault { op, kind, error });
    }

    pub fn clear_faults(&self) {
        self.lock().faults.clear();
    }

    /// Seeds a child as if it had been created earlier.
    pub fn insert_child(&self, kind: ChildKind, namespace: &str, name: &str, manifest: Value) {
        self.lock()
            .children
            .insert((kind, namespace.to_string(), name.to_string()), manifest);
    }

    pub fn remove_child(&self, kind: ChildKind, namespace: &str, name: &str) -> Option<Value> {
        self.lock()
            .children
            .remove(&(kind, namespace.to_string(), name.to_string()))
    }

    pub fn child(&self, kind: ChildKind, namespace: &str, name: &str) -> Option<Value> {
        self.lock()
            .children
            .get(&(kind, namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn status(&self, namespace: &str, name: &str) -> Option<WorkerPoolStatus> {
        self.lock()
            .statuses
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    pub fn journal(&self) -> Vec<StoreCall> {
        self.lock().journal.clone()
    }

    pub fn clear_journal(&self) {
        self.lock().journal.clear();
    }
}

impl Inner {
    fn fault(&self, op: StoreOp, kind: Option<ChildKind>) -> Option<Report<StoreError>> {
        self.faults
            .iter()
            .find(|fault| fault.op == op && (fault.kind.is_none() || fault.kind == kind))
            .map(|fault| Report::new(fault.error.clone()))
    }
}

#[async_trait]
impl ClusterStore for MemoryStore {
    async fn create_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        manifest: &Value,
    ) -> Result<(), Report<StoreError>> {
        let name = manifest["metadata"]["name"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        if self.log_writes {
            info!(%kind, %namespace, %name, %manifest, "dry run: create");
        } else {
            debug!(%kind, %namespace, %name, "create");
        }

        let mut inner = self.lock();
        inner.journal.push(StoreCall::Create {
            kind,
            namespace: namespace.to_string(),
            name: name.clone(),
            manifest: manifest.clone(),
        });
        if let Some(report) = inner.fault(StoreOp::Create, Some(kind)) {
            return Err(report);
        }

        let key = (kind, namespace.to_string(), name);
        if inner.children.contains_key(&key) {
            return Err(Report::new(StoreError::AlreadyExists {
                kind: kind.resource_kind().to_string(),
                namespace: key.1,
                name: key.2,
            }));
        }
        inner.children.insert(key, manifest.clone());
        Ok(())
    }

    async fn patch_child_spec(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        spec: &Value,
    ) -> Result<(), Report<StoreError>> {
        if self.log_writes {
            info!(%kind, %namespace, %name, %spec, "dry run: patch spec");
        } else {
            debug!(%kind, %namespace, %name, "patch spec");
        }

        let mut inner = self.lock();
        inner.journal.push(StoreCall::PatchSpec {
            kind,
            namespace: namespace.to_string(),
            name: name.to_string(),
            spec: spec.clone(),
        });
        if let Some(report) = inner.fault(StoreOp::PatchSpec, Some(kind)) {
            return Err(report);
        }

        let key = (kind, namespace.to_string(), name.to_string());
        let Some(child) = inner.children.get_mut(&key) else {
            return Err(Report::new(StoreError::NotFound {
                kind: kind.resource_kind().to_string(),
                namespace: key.1,
                name: key.2,
            }));
        };
        json_patch::merge(child, &serde_json::json!({ "spec": spec }));
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WorkerPoolStatus,
    ) -> Result<(), Report<StoreError>> {
        if self.log_writes {
            info!(%namespace, %name, ?status, "dry run: patch status");
        } else {
            debug!(%namespace, %name, conditions = status.conditions.len(), "patch status");
        }

        let mut inner = self.lock();
        inner.journal.push(StoreCall::PatchStatus {
            namespace: namespace.to_string(),
            name: name.to_string(),
            status: status.clone(),
        });
        if let Some(report) = inner.fault(StoreOp::PatchStatus, None) {
            return Err(report);
        }
        inner
            .statuses
            .insert((namespace.to_string(), name.to_string()), status.clone());
        Ok(())
    }

    async fn read_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkerPoolStatus>, Report<StoreError>> {
        Ok(self.status(namespace, name))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use similar_asserts::assert_eq;

    use super::*;

    #[tokio::test]
    async fn create_twice_is_already_exists() {
        let store = MemoryStore::new();
        let manifest = json!({"metadata": {"name": "pool-a"}, "spec": {"replicas": 1}});
        store
            .create_child(ChildKind::Workload, "ns1", &manifest)
            .await
            .unwrap();

        let err = store
            .create_child(ChildKind::Workload, "ns1", &manifest)
            .await
            .unwrap_err();
        assert_eq!(err.current_context().reason(), "AlreadyExists");
        assert_eq!(store.journal().len(), 2);
    }

    #[tokio::test]
    async fn patch_merges_spec_and_requires_child() {
        let store = MemoryStore::new();
        let err = store
            .patch_child_spec(ChildKind::AlertRule, "ns1", "pool-a", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.current_context().reason(), "NotFound");

        store.insert_child(
            ChildKind::AlertRule,
            "ns1",
            "pool-a",
            json!({"metadata": {"name": "pool-a", "labels": {"a": "b"}}, "spec": {"x": 1, "y": 2}}),
        );
        store
            .patch_child_spec(ChildKind::AlertRule, "ns1", "pool-a", &json!({"x": 5}))
            .await
            .unwrap();
        assert_eq!(
            store.child(ChildKind::AlertRule, "ns1", "pool-a").unwrap(),
            json!({"metadata": {"name": "pool-a", "labels": {"a": "b"}}, "spec": {"x": 5, "y": 2}})
        );
    }

    #[test_log::test(tokio::test)]
    async fn dry_run_store_keeps_writes_in_memory() {
        let store = MemoryStore::dry_run();
        let manifest = json!({"metadata": {"name": "pool-a"}, "spec": {"replicas": 1}});
        store
            .create_child(ChildKind::Workload, "ns1", &manifest)
            .await
            .unwrap();
        store
            .patch_child_spec(ChildKind::Workload, "ns1", "pool-a", &json!({"replicas": null}))
            .await
            .unwrap();

        assert_eq!(
            store.child(ChildKind::Workload, "ns1", "pool-a").unwrap(),
            json!({"metadata": {"name": "pool-a"}, "spec": {}})
        );
        assert_eq!(store.journal().len(), 2);
    }

    #[tokio::test]
    async fn faults_are_scoped_to_kind() {
        let store = MemoryStore::new();
        store.fail(
            StoreOp::Create,
            Some(ChildKind::AlertRule),
            StoreError::Failure {
                message: "connection reset".to_string(),
            },
        );
        let manifest = json!({"metadata": {"name": "pool-a"}});
        assert!(store
            .create_child(ChildKind::Workload, "ns1", &manifest)
            .await
            .is_ok());
        assert!(store
            .create_child(ChildKind::AlertRule, "ns1", &manifest)
            .await
            .is_err());
        assert!(store.child(ChildKind::AlertRule, "ns1", "pool-a").is_none());
    }
}
