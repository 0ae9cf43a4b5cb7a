//! [`ClusterStore`] backed by the Kubernetes API.

use std::path::Path;

use api_types::WorkerPool;
use api_types::WorkerPoolStatus;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::Api;
use kube::api::ApiResource;
use kube::api::DynamicObject;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Client;
use kube::Config;
use serde_json::json;
use serde_json::Value;
use tracing::info;

use crate::domain::error::StoreError;
use crate::domain::manifest::ChildKind;
use crate::domain::manifest::PrometheusRule;
use crate::domain::manifest::ScaledObject;
use crate::domain::traits::ClusterStore;
use crate::infrastructure::k8s::KubernetesError;

/// Field manager recorded on every object this operator writes.
pub const FIELD_MANAGER: &str = "workerpool-operator";

pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects with `kubeconfig`, or with the in-cluster service account
    /// (falling back to `~/.kube/config`) when none is given.
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self, Report<KubernetesError>> {
        let config = match kubeconfig {
            Some(path) => {
                let kubeconfig = Kubeconfig::read_from(path).change_context(
                    KubernetesError::ConnectionFailed {
                        message: format!("cannot read kubeconfig {}", path.display()),
                    },
                )?;
                Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .change_context(KubernetesError::ConnectionFailed {
                        message: format!("invalid kubeconfig {}", path.display()),
                    })?
            }
            None => Config::infer()
                .await
                .change_context(KubernetesError::ConnectionFailed {
                    message: "no in-cluster or local kubeconfig found".to_string(),
                })?,
        };
        info!(
            cluster = %config.cluster_url,
            namespace = %config.default_namespace,
            "Connecting to Kubernetes API"
        );

        let client = Client::try_from(config).change_context(KubernetesError::ConnectionFailed {
            message: "cannot build Kubernetes client".to_string(),
        })?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> Client {
        self.client.clone()
    }

    fn child_api(&self, kind: ChildKind, namespace: &str) -> Api<DynamicObject> {
        let resource = match kind {
            ChildKind::Workload => ApiResource::erase::<Deployment>(&()),
            ChildKind::AlertRule => ApiResource::erase::<PrometheusRule>(&()),
            ChildKind::AutoscalePolicy => ApiResource::erase::<ScaledObject>(&()),
        };
        Api::namespaced_with(self.client.clone(), namespace, &resource)
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

fn patch_params() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Maps API status codes onto the store's error classes.
fn classify(error: kube::Error, kind: &str, namespace: &str, name: &str) -> Report<StoreError> {
    let context = match &error {
        kube::Error::Api(response) if response.code == 409 => StoreError::AlreadyExists {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        },
        other => StoreError::Failure {
            message: format!("{kind} {namespace}/{name}: {other}"),
        },
    };
    Report::new(error).change_context(context)
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn create_child(
        &self,
        kind: ChildKind,
        namespace: &str,
        manifest: &Value,
    ) -> Result<(), Report<StoreError>> {
        let name = manifest["metadata"]["name"].as_str().unwrap_or_default();
        let object: DynamicObject = serde_json::from_value(manifest.clone()).map_err(|e| {
            Report::new(StoreError::Failure {
                message: format!(
                    "{} manifest is not a Kubernetes object: {e}",
                    kind.resource_kind()
                ),
            })
        })?;

        self.child_api(kind, namespace)
            .create(&post_params(), &object)
            .await
            .map_err(|e| classify(e, kind.resource_kind(), namespace, name))?;
        Ok(())
    }

    async fn patch_child_spec(
        &self,
        kind: ChildKind,
        namespace: &str,
        name: &str,
        spec: &Value,
    ) -> Result<(), Report<StoreError>> {
        let patch = json!({ "spec": spec });
        self.child_api(kind, namespace)
            .patch(name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, kind.resource_kind(), namespace, name))?;
        Ok(())
    }

    async fn patch_status(
        &self,
        namespace: &str,
        name: &str,
        status: &WorkerPoolStatus,
    ) -> Result<(), Report<StoreError>> {
        let api: Api<WorkerPool> = Api::namespaced(self.client.clone(), namespace);
        let patch = json!({ "status": status });
        api.patch_status(name, &patch_params(), &Patch::Merge(&patch))
            .await
            .map_err(|e| classify(e, "WorkerPool", namespace, name))?;
        Ok(())
    }

    async fn read_status(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<WorkerPoolStatus>, Report<StoreError>> {
        let api: Api<WorkerPool> = Api::namespaced(self.client.clone(), namespace);
        let pool = api
            .get_status(name)
            .await
            .map_err(|e| classify(e, "WorkerPool", namespace, name))?;
        Ok(pool.status)
    }
}
