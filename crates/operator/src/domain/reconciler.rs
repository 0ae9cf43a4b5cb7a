//! Reconciliation of a worker pool with its three children.

use std::sync::Arc;

use api_types::WorkerPool;
use api_types::WorkerPoolCondition;
use api_types::WorkerPoolStatus;
use error_stack::Report;
use kube::Resource;
use kube::ResourceExt;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::domain::error::ReconcileError;
use crate::domain::error::StoreError;
use crate::domain::manifest;
use crate::domain::manifest::ChildKind;
use crate::domain::manifest::TemplateStore;
use crate::domain::pool::ResolvedWorkerPool;
use crate::domain::status;
use crate::domain::status::StatusReporter;
use crate::domain::sync;
use crate::domain::sync::ChildOp;
use crate::domain::sync::ChildSynchronizer;
use crate::domain::traits::ClusterStore;

/// Kind of pass requested by the event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Lifecycle {
    #[display("create")]
    Create,
    /// A create delivered again after an earlier create did not finish.
    #[display("retry-create")]
    RetryCreate,
    #[display("update")]
    Update,
}

impl Lifecycle {
    fn op(&self) -> ChildOp {
        match self {
            Lifecycle::Create => ChildOp::Create,
            Lifecycle::RetryCreate => ChildOp::Ensure,
            Lifecycle::Update => ChildOp::Patch,
        }
    }

    fn in_progress(&self, pool_name: &str) -> WorkerPoolCondition {
        match self {
            Lifecycle::Create | Lifecycle::RetryCreate => status::initializing(pool_name),
            Lifecycle::Update => status::updating(pool_name),
        }
    }

    fn done_message(&self, pool_name: &str) -> String {
        match self {
            Lifecycle::Create | Lifecycle::RetryCreate => {
                format!("Worker pool {pool_name} deployment created")
            }
            Lifecycle::Update => format!("Worker pool {pool_name} deployment updated"),
        }
    }
}

/// What a single pass did.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileOutcome {
    pub lifecycle: Lifecycle,
    /// Children synchronized before the pass stopped, in order
    pub completed: Vec<ChildKind>,
    pub failure: Option<ReconcileError>,
    /// Conditions written by the final status update
    pub conditions: Vec<WorkerPoolCondition>,
}

impl ReconcileOutcome {
    pub fn is_ready(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct Reconciler<S: ?Sized> {
    store: Arc<S>,
    templates: Arc<TemplateStore>,
}

impl<S: ClusterStore + ?Sized> Reconciler<S> {
    pub fn new(store: Arc<S>, templates: Arc<TemplateStore>) -> Self {
        Self { store, templates }
    }

    pub async fn on_create(
        &self,
        pool: &WorkerPool,
    ) -> Result<ReconcileOutcome, Report<StoreError>> {
        self.reconcile(pool, Lifecycle::Create).await
    }

    pub async fn on_retry_create(
        &self,
        pool: &WorkerPool,
    ) -> Result<ReconcileOutcome, Report<StoreError>> {
        self.reconcile(pool, Lifecycle::RetryCreate).await
    }

    pub async fn on_update(
        &self,
        pool: &WorkerPool,
    ) -> Result<ReconcileOutcome, Report<StoreError>> {
        self.reconcile(pool, Lifecycle::Update).await
    }

    /// Status of `pool` as currently stored, which may be newer than the
    /// copy the event source delivered.
    pub async fn current_status(
        &self,
        pool: &WorkerPool,
    ) -> Result<Option<WorkerPoolStatus>, Report<StoreError>> {
        self.store
            .read_status(&pool.namespace().unwrap_or_default(), &pool.name_any())
            .await
    }

    /// Children are removed by the cluster's garbage collector through their
    /// owner references; nothing is deleted here.
    pub async fn on_delete(&self, pool: &WorkerPool) {
        info!(
            pool = %pool.name_any(),
            namespace = %pool.namespace().unwrap_or_default(),
            "worker pool deleted, children are garbage collected"
        );
    }

    /// Runs one pass and always finishes with a status write.
    ///
    /// Child failures end up in the returned outcome and in the status. An
    /// error is returned only when the final status write itself fails.
    #[tracing::instrument(
        skip_all,
        fields(pool = %pool.name_any(), namespace = %pool.namespace().unwrap_or_default(), %lifecycle)
    )]
    pub async fn reconcile(
        &self,
        pool: &WorkerPool,
        lifecycle: Lifecycle,
    ) -> Result<ReconcileOutcome, Report<StoreError>> {
        let name = pool.name_any();
        let namespace = pool.namespace().unwrap_or_default();
        let previous = pool.status.clone().unwrap_or_default();
        let reporter = StatusReporter::new(self.store.as_ref());

        let in_progress = status::prepend(&previous.conditions, lifecycle.in_progress(&name));
        if let Err(e) = reporter
            .report(
                &namespace,
                &name,
                in_progress.clone(),
                previous.observed_generation,
            )
            .await
        {
            warn!("Failed to write in-progress status: {e:?}");
        }

        let mut completed = Vec::new();
        let failure = match self.sync_children(pool, lifecycle, &mut completed).await {
            Ok(()) => None,
            Err(report) => {
                let stage = report
                    .current_context()
                    .kind()
                    .map_or_else(|| "resolve".to_string(), |kind| kind.to_string());
                error!(%stage, "Reconciliation failed: {report:?}");
                Some(report.current_context().clone())
            }
        };

        let terminal = match &failure {
            None => status::ready(lifecycle.done_message(&name)),
            Some(error) => status::error(error),
        };
        let conditions = status::prepend(&in_progress, terminal);
        reporter
            .report(
                &namespace,
                &name,
                conditions.clone(),
                pool.metadata.generation,
            )
            .await?;

        if failure.is_none() {
            info!("worker pool ready");
        }
        Ok(ReconcileOutcome {
            lifecycle,
            completed,
            failure,
            conditions,
        })
    }

    async fn sync_children(
        &self,
        pool: &WorkerPool,
        lifecycle: Lifecycle,
        completed: &mut Vec<ChildKind>,
    ) -> Result<(), Report<ReconcileError>> {
        let resolved = ResolvedWorkerPool::resolve(pool)?;
        let owner = pool.controller_owner_ref(&()).ok_or_else(|| {
            Report::new(ReconcileError::InvalidSpec {
                message: "metadata.uid is missing, cannot own children".to_string(),
            })
        })?;
        let synchronizer = ChildSynchronizer::new(self.store.as_ref());

        for step in sync::plan(lifecycle.op()) {
            let rendered =
                manifest::render(step.kind, &resolved, &self.templates).map_err(|report| {
                    let error = report.current_context().clone();
                    report.change_context(ReconcileError::Template {
                        kind: step.kind,
                        error,
                    })
                })?;
            synchronizer
                .apply(step, &resolved.namespace, rendered, &owner)
                .await?;
            completed.push(step.kind);
        }
        Ok(())
    }
}
