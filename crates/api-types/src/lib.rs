//! Shared API type definitions
//!
//! This crate contains the `WorkerPool` custom resource managed by the
//! operator, its status conditions, and helpers for the Kubernetes resource
//! quantities found in its spec.

pub mod quantity;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

pub use quantity::QuantityError;

/// A worker deployment bound to a message queue and autoscaled on its length.
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[kube(
    group = "hyperflow.agh.edu.pl",
    version = "v1",
    kind = "WorkerPool",
    plural = "workerpools",
    shortname = "wp",
    namespaced,
    status = "WorkerPoolStatus",
    printcolumn = r#"{"name":"TaskType", "type":"string", "jsonPath":".spec.taskType"}"#,
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.conditions[0].type"}"#,
    printcolumn = r#"{"name":"Reason", "type":"string", "jsonPath":".status.conditions[0].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolSpec {
    /// Worker container image
    pub image: String,
    /// Task type handled by the workers, used to derive the queue name
    pub task_type: String,
    /// Explicit queue name, overrides `<namespace>.<taskType>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<String>,
    /// Autoscaling floor, also the initial replica count of the workload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replica_count: Option<i32>,
    /// Autoscaling ceiling
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replica_count: Option<i32>,
    pub initial_resources: InitialResources,
    /// Message broker host the workers consume from
    #[serde(default)]
    pub rabbit_hostname: String,
    /// Cache URL handed to the workers
    #[serde(default)]
    pub redis_url: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct InitialResources {
    pub requests: ResourceRequests,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<ResourceLimits>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
pub struct ResourceRequests {
    pub cpu: String,
    pub memory: String,
}

/// Limits are independent: either field may be set without the other.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
pub struct ResourceLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolStatus {
    /// Most recent first
    #[serde(default)]
    pub conditions: Vec<WorkerPoolCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Copy, JsonSchema)]
pub enum ConditionType {
    Ready,
    NotReady,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Copy, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    /// Symbolic code, e.g. `Ready`, `Initializing`, `AlreadyExists`
    pub reason: String,
    pub message: String,
    /// RFC 3339 timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl WorkerPoolStatus {
    pub fn latest(&self) -> Option<&WorkerPoolCondition> {
        self.conditions.first()
    }
}
