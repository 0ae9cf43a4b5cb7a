//! Rendering of the three child resources of a worker pool.
//!
//! Each child starts from its template, gets its placeholders substituted,
//! is deserialized into its typed resource and then has its fixed field set
//! applied from the resolved pool. Rendering has no side effects: the same
//! pool and templates always produce the same manifest.

pub mod external;
pub mod template;

use std::collections::BTreeMap;

use error_stack::Report;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde_json::Value;

pub use external::PrometheusRule;
pub use external::ScaledObject;
pub use template::TemplateStore;

use crate::domain::error::TemplateError;
use crate::domain::pool::ResolvedWorkerPool;

/// The fixed set of children owned by a worker pool, in synchronization order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, derive_more::Display)]
pub enum ChildKind {
    #[display("Workload")]
    Workload,
    #[display("AlertRule")]
    AlertRule,
    #[display("AutoscalePolicy")]
    AutoscalePolicy,
}

impl ChildKind {
    pub const ALL: [ChildKind; 3] = [
        ChildKind::Workload,
        ChildKind::AlertRule,
        ChildKind::AutoscalePolicy,
    ];

    pub fn template_file(&self) -> &'static str {
        match self {
            ChildKind::Workload => "deployment.yml",
            ChildKind::AlertRule => "prometheus-rule.yml",
            ChildKind::AutoscalePolicy => "scaledobject.yml",
        }
    }

    /// Kubernetes kind of the child resource.
    pub fn resource_kind(&self) -> &'static str {
        match self {
            ChildKind::Workload => "Deployment",
            ChildKind::AlertRule => "PrometheusRule",
            ChildKind::AutoscalePolicy => "ScaledObject",
        }
    }
}

/// A rendered child resource.
#[derive(Debug, Clone, PartialEq)]
pub enum ChildManifest {
    Workload(Deployment),
    AlertRule(PrometheusRule),
    AutoscalePolicy(ScaledObject),
}

impl ChildManifest {
    pub fn kind(&self) -> ChildKind {
        match self {
            ChildManifest::Workload(_) => ChildKind::Workload,
            ChildManifest::AlertRule(_) => ChildKind::AlertRule,
            ChildManifest::AutoscalePolicy(_) => ChildKind::AutoscalePolicy,
        }
    }

    pub fn metadata(&self) -> &ObjectMeta {
        match self {
            ChildManifest::Workload(deployment) => deployment.meta(),
            ChildManifest::AlertRule(rule) => rule.meta(),
            ChildManifest::AutoscalePolicy(scaled_object) => scaled_object.meta(),
        }
    }

    fn metadata_mut(&mut self) -> &mut ObjectMeta {
        match self {
            ChildManifest::Workload(deployment) => deployment.meta_mut(),
            ChildManifest::AlertRule(rule) => rule.meta_mut(),
            ChildManifest::AutoscalePolicy(scaled_object) => scaled_object.meta_mut(),
        }
    }

    pub fn name(&self) -> &str {
        self.metadata().name.as_deref().unwrap_or_default()
    }

    /// Full document sent on create.
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        match self {
            ChildManifest::Workload(deployment) => serde_json::to_value(deployment),
            ChildManifest::AlertRule(rule) => serde_json::to_value(rule),
            ChildManifest::AutoscalePolicy(scaled_object) => serde_json::to_value(scaled_object),
        }
    }

    /// The `spec` subtree, the only part sent on patch.
    ///
    /// Optional fields set by [`render`] are written as `null` when unset, so
    /// a merge patch clears values left behind by an earlier spec.
    pub fn spec_document(&self) -> Result<Value, serde_json::Error> {
        let (mut spec, owned): (Value, &[&str]) = match self {
            ChildManifest::Workload(deployment) => {
                (serde_json::to_value(&deployment.spec)?, &["replicas"])
            }
            ChildManifest::AlertRule(rule) => (serde_json::to_value(&rule.spec)?, &[]),
            ChildManifest::AutoscalePolicy(scaled_object) => (
                serde_json::to_value(&scaled_object.spec)?,
                &["minReplicaCount", "maxReplicaCount"],
            ),
        };
        if let Value::Object(fields) = &mut spec {
            for field in owned {
                fields.entry(*field).or_insert(Value::Null);
            }
        }
        Ok(spec)
    }
}

/// Stamps `owner` on the manifest so deleting the pool cascades to it.
pub fn attach_owner(mut manifest: ChildManifest, owner: &OwnerReference) -> ChildManifest {
    let owners = manifest
        .metadata_mut()
        .owner_references
        .get_or_insert_with(Vec::new);
    owners.retain(|existing| existing.uid != owner.uid);
    owners.push(owner.clone());
    manifest
}

/// Renders the manifest of one child kind.
pub fn render(
    kind: ChildKind,
    pool: &ResolvedWorkerPool,
    templates: &TemplateStore,
) -> Result<ChildManifest, Report<TemplateError>> {
    let document = templates.instantiate(kind, &pool.placeholders())?;
    let manifest = match kind {
        ChildKind::Workload => {
            ChildManifest::Workload(render_workload(typed(kind, document)?, pool)?)
        }
        ChildKind::AlertRule => {
            ChildManifest::AlertRule(render_alert_rule(typed(kind, document)?, pool))
        }
        ChildKind::AutoscalePolicy => {
            ChildManifest::AutoscalePolicy(render_autoscale_policy(typed(kind, document)?, pool))
        }
    };
    Ok(manifest)
}

fn malformed(kind: ChildKind, message: impl Into<String>) -> Report<TemplateError> {
    Report::new(TemplateError::Malformed {
        file: kind.template_file().to_string(),
        kind,
        message: message.into(),
    })
}

fn typed<T: DeserializeOwned>(
    kind: ChildKind,
    document: Value,
) -> Result<T, Report<TemplateError>> {
    serde_json::from_value(document).map_err(|e| malformed(kind, e.to_string()))
}

fn set_identity(meta: &mut ObjectMeta, pool: &ResolvedWorkerPool) {
    meta.name = Some(pool.name.clone());
    meta.namespace = Some(pool.namespace.clone());
}

fn upsert_env(container: &mut Container, name: &str, value: &str) {
    let env = container.env.get_or_insert_with(Vec::new);
    match env.iter_mut().find(|var| var.name == name) {
        Some(var) => {
            var.value = Some(value.to_string());
            var.value_from = None;
        }
        None => env.push(EnvVar {
            name: name.to_string(),
            value: Some(value.to_string()),
            ..Default::default()
        }),
    }
}

fn resources(pool: &ResolvedWorkerPool) -> ResourceRequirements {
    let requests = BTreeMap::from([
        ("cpu".to_string(), Quantity(pool.cpu_requests.clone())),
        ("memory".to_string(), Quantity(pool.memory_requests.clone())),
    ]);

    let mut limits = BTreeMap::new();
    if let Some(cpu) = &pool.limits.cpu {
        limits.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = &pool.limits.memory {
        limits.insert("memory".to_string(), Quantity(memory.clone()));
    }

    ResourceRequirements {
        requests: Some(requests),
        limits: (!limits.is_empty()).then_some(limits),
        ..Default::default()
    }
}

fn render_workload(
    mut deployment: Deployment,
    pool: &ResolvedWorkerPool,
) -> Result<Deployment, Report<TemplateError>> {
    set_identity(&mut deployment.metadata, pool);

    let spec = deployment
        .spec
        .as_mut()
        .ok_or_else(|| malformed(ChildKind::Workload, "spec is missing"))?;
    // Without a floor the replica count is left to the cluster default.
    if let Some(min) = pool.min_replica_count {
        spec.replicas = Some(min);
    }

    let container = spec
        .template
        .spec
        .as_mut()
        .and_then(|pod| pod.containers.first_mut())
        .ok_or_else(|| malformed(ChildKind::Workload, "pod template has no container"))?;
    container.image = Some(pool.image.clone());
    container.resources = Some(resources(pool));
    upsert_env(container, "QUEUE_NAME", &pool.queue_name);
    upsert_env(container, "RABBIT_HOSTNAME", &pool.rabbit_hostname);
    upsert_env(container, "REDIS_URL", &pool.redis_url);

    Ok(deployment)
}

fn render_alert_rule(mut rule: PrometheusRule, pool: &ResolvedWorkerPool) -> PrometheusRule {
    set_identity(&mut rule.metadata, pool);
    rule
}

fn render_autoscale_policy(
    mut scaled_object: ScaledObject,
    pool: &ResolvedWorkerPool,
) -> ScaledObject {
    set_identity(&mut scaled_object.metadata, pool);
    let spec = &mut scaled_object.spec;
    spec.scale_target_ref.name = pool.name.clone();
    spec.min_replica_count = pool.min_replica_count;
    spec.max_replica_count = pool.max_replica_count;
    scaled_object
}

/// Renders every child for a sample pool so broken templates fail at startup
/// instead of on the first event.
pub fn verify_templates(templates: &TemplateStore) -> Result<(), Report<TemplateError>> {
    let sample = ResolvedWorkerPool {
        name: "template-sample".to_string(),
        namespace: "default".to_string(),
        name_safe: "template_sample".to_string(),
        image: "sample:latest".to_string(),
        task_type: "sample".to_string(),
        queue_name: "default.sample".to_string(),
        min_replica_count: Some(1),
        max_replica_count: Some(2),
        cpu_requests: "100m".to_string(),
        memory_requests: "128Mi".to_string(),
        limits: Default::default(),
        cpu_requests_cores: 0.1,
        memory_requests_bytes: 134_217_728,
        rabbit_hostname: "rabbitmq".to_string(),
        redis_url: "redis://redis:6379".to_string(),
    };
    for kind in ChildKind::ALL {
        render(kind, &sample, templates)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use api_types::ResourceLimits;
    use similar_asserts::assert_eq;

    use super::*;

    fn pool() -> ResolvedWorkerPool {
        ResolvedWorkerPool {
            name: "pool-a".to_string(),
            namespace: "ns1".to_string(),
            name_safe: "pool_a".to_string(),
            image: "img:1".to_string(),
            task_type: "render".to_string(),
            queue_name: "ns1.render".to_string(),
            min_replica_count: Some(1),
            max_replica_count: None,
            cpu_requests: "100m".to_string(),
            memory_requests: "128Mi".to_string(),
            limits: ResourceLimits::default(),
            cpu_requests_cores: 0.1,
            memory_requests_bytes: 134_217_728,
            rabbit_hostname: "rabbitmq".to_string(),
            redis_url: "redis://redis:6379".to_string(),
        }
    }

    fn templates() -> TemplateStore {
        TemplateStore::builtin().expect("builtin templates should load")
    }

    fn workload(pool: &ResolvedWorkerPool) -> Value {
        render(ChildKind::Workload, pool, &templates())
            .unwrap()
            .to_document()
            .unwrap()
    }

    fn container(document: &Value) -> &Value {
        &document["spec"]["template"]["spec"]["containers"][0]
    }

    #[test]
    fn workload_without_limits_has_no_limits_block() {
        let document = workload(&pool());
        let resources = &container(&document)["resources"];
        assert_eq!(resources["requests"]["cpu"], "100m");
        assert_eq!(resources["requests"]["memory"], "128Mi");
        assert!(resources.get("limits").is_none(), "{resources}");
        assert_eq!(document["spec"]["replicas"], 1);
        assert_eq!(container(&document)["image"], "img:1");
        assert_eq!(document["metadata"]["name"], "pool-a");
        assert_eq!(document["metadata"]["namespace"], "ns1");
        assert_eq!(document["kind"], "Deployment");
    }

    #[test]
    fn workload_limits_contain_only_present_fields() {
        let mut only_memory = pool();
        only_memory.limits.memory = Some("256Mi".to_string());
        let document = workload(&only_memory);
        let limits = &container(&document)["resources"]["limits"];
        assert_eq!(limits["memory"], "256Mi");
        assert!(limits.get("cpu").is_none(), "{limits}");

        let mut only_cpu = pool();
        only_cpu.limits.cpu = Some("500m".to_string());
        let document = workload(&only_cpu);
        let limits = &container(&document)["resources"]["limits"];
        assert_eq!(limits["cpu"], "500m");
        assert!(limits.get("memory").is_none(), "{limits}");
    }

    #[test]
    fn workload_replicas_left_to_cluster_default_without_floor() {
        let mut pool = pool();
        pool.min_replica_count = None;
        let document = workload(&pool);
        assert!(document["spec"].get("replicas").is_none());
    }

    #[test]
    fn workload_env_carries_queue_and_endpoints() {
        let document = workload(&pool());
        let env = container(&document)["env"].as_array().unwrap().clone();
        let value_of = |name: &str| {
            env.iter()
                .find(|var| var["name"] == name)
                .map(|var| var["value"].clone())
        };
        assert_eq!(value_of("QUEUE_NAME"), Some(Value::from("ns1.render")));
        assert_eq!(value_of("RABBIT_HOSTNAME"), Some(Value::from("rabbitmq")));
        assert_eq!(value_of("REDIS_URL"), Some(Value::from("redis://redis:6379")));
    }

    #[test]
    fn alert_rule_uses_request_thresholds() {
        let manifest = render(ChildKind::AlertRule, &pool(), &templates()).unwrap();
        let ChildManifest::AlertRule(rule) = &manifest else {
            panic!("expected an alert rule");
        };
        let group = &rule.spec.groups[0];
        assert_eq!(group.name, "pool_a");

        let thresholds: Vec<&str> = group
            .rules
            .iter()
            .filter_map(|rule| rule.annotations.get("threshold").map(String::as_str))
            .collect();
        assert_eq!(thresholds, vec!["100m", "128Mi"]);

        let exprs: Vec<&str> = group.rules.iter().map(|rule| rule.expr.as_str()).collect();
        assert!(exprs[0].contains(r#"queue="ns1.render""#), "{}", exprs[0]);
        assert!(exprs[2].ends_with("> 0.1"), "{}", exprs[2]);
        assert!(exprs[3].ends_with("> 134217728"), "{}", exprs[3]);
    }

    #[test]
    fn autoscale_policy_max_replicas_only_when_set() {
        let document = render(ChildKind::AutoscalePolicy, &pool(), &templates())
            .unwrap()
            .to_document()
            .unwrap();
        let spec = &document["spec"];
        assert_eq!(spec["minReplicaCount"], 1);
        assert!(spec.get("maxReplicaCount").is_none(), "{spec}");
        assert_eq!(spec["scaleTargetRef"]["name"], "pool-a");

        let mut bounded = pool();
        bounded.max_replica_count = Some(10);
        let document = render(ChildKind::AutoscalePolicy, &bounded, &templates())
            .unwrap()
            .to_document()
            .unwrap();
        assert_eq!(document["spec"]["maxReplicaCount"], 10);
    }

    #[test]
    fn patch_spec_clears_unset_replica_counts() {
        let mut pool = pool();
        pool.min_replica_count = None;

        let scaling = render(ChildKind::AutoscalePolicy, &pool, &templates())
            .unwrap()
            .spec_document()
            .unwrap();
        assert_eq!(scaling.get("minReplicaCount"), Some(&Value::Null));
        assert_eq!(scaling.get("maxReplicaCount"), Some(&Value::Null));
        assert_eq!(scaling["scaleTargetRef"]["name"], "pool-a");

        let workload = render(ChildKind::Workload, &pool, &templates())
            .unwrap()
            .spec_document()
            .unwrap();
        assert_eq!(workload.get("replicas"), Some(&Value::Null));
        assert!(workload.get("template").is_some());

        pool.min_replica_count = Some(2);
        let workload = render(ChildKind::Workload, &pool, &templates())
            .unwrap()
            .spec_document()
            .unwrap();
        assert_eq!(workload["replicas"], 2);
    }

    #[test]
    fn rendering_is_deterministic() {
        let templates = templates();
        let rendered = |kind| {
            let document = render(kind, &pool(), &templates)
                .unwrap()
                .to_document()
                .unwrap();
            serde_json::to_string(&document).unwrap()
        };
        for kind in ChildKind::ALL {
            assert_eq!(rendered(kind), rendered(kind));
        }
    }

    #[test]
    fn attach_owner_replaces_existing_reference() {
        let owner = OwnerReference {
            api_version: "hyperflow.agh.edu.pl/v1".to_string(),
            kind: "WorkerPool".to_string(),
            name: "pool-a".to_string(),
            uid: "uid-1".to_string(),
            controller: Some(true),
            ..Default::default()
        };
        let manifest = render(ChildKind::AlertRule, &pool(), &templates()).unwrap();
        let manifest = attach_owner(attach_owner(manifest, &owner), &owner);
        let owners = manifest.metadata().owner_references.as_ref().unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].uid, "uid-1");
    }

    #[test]
    fn builtin_templates_pass_verification() {
        verify_templates(&templates()).unwrap();
    }
}
