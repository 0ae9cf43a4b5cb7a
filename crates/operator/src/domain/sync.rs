//! Synchronization of a single child resource with its rendered manifest.

use error_stack::Report;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use tracing::debug;
use tracing::info;

use crate::domain::error::ReconcileError;
use crate::domain::error::StoreError;
use crate::domain::error::TemplateError;
use crate::domain::manifest::attach_owner;
use crate::domain::manifest::ChildKind;
use crate::domain::manifest::ChildManifest;
use crate::domain::traits::ClusterStore;

/// Store operation applied to a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum ChildOp {
    /// Create; an existing child is an error.
    #[display("create")]
    Create,
    /// Patch the spec; a missing child is an error.
    #[display("patch")]
    Patch,
    /// Create, patching instead when the child already exists.
    #[display("ensure")]
    Ensure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncStep {
    pub kind: ChildKind,
    pub op: ChildOp,
}

/// Steps of one pass, in the fixed Workload, AlertRule, AutoscalePolicy order.
pub fn plan(op: ChildOp) -> [SyncStep; 3] {
    ChildKind::ALL.map(|kind| SyncStep { kind, op })
}

pub struct ChildSynchronizer<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: ClusterStore + ?Sized> ChildSynchronizer<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    /// Applies `step` to an already rendered manifest.
    pub async fn apply(
        &self,
        step: SyncStep,
        namespace: &str,
        manifest: ChildManifest,
        owner: &OwnerReference,
    ) -> Result<(), Report<ReconcileError>> {
        match step.op {
            ChildOp::Create => self.create_child(namespace, manifest, owner).await,
            ChildOp::Patch => self.patch_child(namespace, &manifest).await,
            ChildOp::Ensure => self.ensure_child(namespace, manifest, owner).await,
        }
    }

    /// Attaches the owner reference and creates the child.
    pub async fn create_child(
        &self,
        namespace: &str,
        manifest: ChildManifest,
        owner: &OwnerReference,
    ) -> Result<(), Report<ReconcileError>> {
        let manifest = attach_owner(manifest, owner);
        let kind = manifest.kind();
        let document = manifest
            .to_document()
            .map_err(|e| serialize_error(kind, e))?;

        self.store
            .create_child(kind, namespace, &document)
            .await
            .map_err(|report| store_error(report, kind, ChildOp::Create))?;
        info!(%kind, name = manifest.name(), "child created");
        Ok(())
    }

    /// Patches only the `spec` of an existing child.
    pub async fn patch_child(
        &self,
        namespace: &str,
        manifest: &ChildManifest,
    ) -> Result<(), Report<ReconcileError>> {
        let kind = manifest.kind();
        let spec = manifest
            .spec_document()
            .map_err(|e| serialize_error(kind, e))?;

        self.store
            .patch_child_spec(kind, namespace, manifest.name(), &spec)
            .await
            .map_err(|report| store_error(report, kind, ChildOp::Patch))?;
        info!(%kind, name = manifest.name(), "child patched");
        Ok(())
    }

    /// Creates the child, or patches it when it already exists.
    pub async fn ensure_child(
        &self,
        namespace: &str,
        manifest: ChildManifest,
        owner: &OwnerReference,
    ) -> Result<(), Report<ReconcileError>> {
        match self.create_child(namespace, manifest.clone(), owner).await {
            Err(report)
                if matches!(
                    report.current_context(),
                    ReconcileError::Store {
                        error: StoreError::AlreadyExists { .. },
                        ..
                    }
                ) =>
            {
                debug!(kind = %manifest.kind(), "child already exists, patching instead");
                self.patch_child(namespace, &manifest).await
            }
            result => result,
        }
    }
}

fn serialize_error(kind: ChildKind, error: serde_json::Error) -> Report<ReconcileError> {
    Report::new(ReconcileError::Template {
        kind,
        error: TemplateError::Malformed {
            file: kind.template_file().to_string(),
            kind,
            message: error.to_string(),
        },
    })
}

fn store_error(report: Report<StoreError>, kind: ChildKind, op: ChildOp) -> Report<ReconcileError> {
    let error = report.current_context().clone();
    report.change_context(ReconcileError::Store { kind, op, error })
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn plan_keeps_fixed_order() {
        let kinds: Vec<ChildKind> = plan(ChildOp::Patch).iter().map(|step| step.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ChildKind::Workload,
                ChildKind::AlertRule,
                ChildKind::AutoscalePolicy
            ]
        );
        assert!(plan(ChildOp::Create)
            .iter()
            .all(|step| step.op == ChildOp::Create));
    }
}
