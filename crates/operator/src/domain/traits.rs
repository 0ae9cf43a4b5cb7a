//! Seams to the remote cluster store

use api_types::WorkerPoolStatus;
use async_trait::async_trait;
use error_stack::Report;
use serde_json::Value;

use crate::domain::error::StoreError;
use crate::domain::manifest::ChildKind;

/// Name-addressed operations against the cluster.
///
/// Every call is a single round trip that either applies completely or not
/// at all. Nothing is retried here.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Creates a child from its full manifest.
    ///
    /// # Errors
    ///
    /// - [`StoreError::AlreadyExists`] if a child with that name exists
    /// - [`StoreError::Failure`] for any other failure
    async fn create_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        manifest: &Value,
    ) -> Result<(), Report<StoreError>>;

    /// Merge-patches the `spec` of an existing child, leaving metadata alone.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the child does not exist
    /// - [`StoreError::Failure`] for any other failure
    async fn patch_child_spec(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        spec: &Value,
    ) -> Result<(), Report<StoreError>>;

    /// Replaces the status of a worker pool.
    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WorkerPoolStatus,
    ) -> Result<(), Report<StoreError>>;

    /// Reads the status of a worker pool as currently stored.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the worker pool does not exist
    /// - [`StoreError::Failure`] for any other failure
    async fn read_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkerPoolStatus>, Report<StoreError>>;
}
