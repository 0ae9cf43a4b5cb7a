//! Status conditions of a worker pool and the reporter that writes them.

use api_types::ConditionStatus;
use api_types::ConditionType;
use api_types::WorkerPoolCondition;
use api_types::WorkerPoolStatus;
use chrono::SecondsFormat;
use chrono::Utc;
use error_stack::Report;

use crate::domain::error::ReconcileError;
use crate::domain::error::StoreError;
use crate::domain::traits::ClusterStore;

/// Oldest conditions beyond this many are dropped.
pub const MAX_CONDITIONS: usize = 16;

pub const REASON_INITIALIZING: &str = "Initializing";
pub const REASON_UPDATING: &str = "Updating";
pub const REASON_READY: &str = "Ready";

fn condition(type_: ConditionType, reason: &str, message: String) -> WorkerPoolCondition {
    WorkerPoolCondition {
        type_,
        status: ConditionStatus::True,
        reason: reason.to_string(),
        message,
        last_transition_time: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
    }
}

pub fn initializing(pool_name: &str) -> WorkerPoolCondition {
    condition(
        ConditionType::NotReady,
        REASON_INITIALIZING,
        format!("Creating child resources of worker pool {pool_name}"),
    )
}

pub fn updating(pool_name: &str) -> WorkerPoolCondition {
    condition(
        ConditionType::NotReady,
        REASON_UPDATING,
        format!("Updating child resources of worker pool {pool_name}"),
    )
}

pub fn ready(message: String) -> WorkerPoolCondition {
    condition(ConditionType::Ready, REASON_READY, message)
}

pub fn error(error: &ReconcileError) -> WorkerPoolCondition {
    condition(ConditionType::NotReady, error.reason(), error.to_string())
}

/// Whether the condition marks a pass that is still running.
pub fn is_transient(condition: &WorkerPoolCondition) -> bool {
    condition.reason == REASON_INITIALIZING || condition.reason == REASON_UPDATING
}

/// Puts `condition` in front of `history`, most recent first.
pub fn prepend(
    history: &[WorkerPoolCondition],
    condition: WorkerPoolCondition,
) -> Vec<WorkerPoolCondition> {
    std::iter::once(condition)
        .chain(history.iter().cloned())
        .take(MAX_CONDITIONS)
        .collect()
}

/// Writes condition lists to the pool's status subresource.
pub struct StatusReporter<'a, S: ?Sized> {
    store: &'a S,
}

impl<'a, S: ClusterStore + ?Sized> StatusReporter<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self { store }
    }

    pub async fn report(
        &self,
        namespace: &str,
        name: &str,
        conditions: Vec<WorkerPoolCondition>,
        observed_generation: Option<i64>,
    ) -> Result<WorkerPoolStatus, Report<StoreError>> {
        let status = WorkerPoolStatus {
            conditions,
            observed_generation,
        };
        self.store.patch_status(namespace, name, &status).await?;
        Ok(status)
    }
}
