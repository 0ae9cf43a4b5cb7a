//! Resolution of a `WorkerPool` into the attributes every manifest needs.

use api_types::quantity;
use api_types::ResourceLimits;
use api_types::WorkerPool;
use error_stack::Report;
use kube::ResourceExt;

use crate::domain::error::ReconcileError;
use crate::domain::manifest::template::Placeholders;

/// A validated `WorkerPool`, rebuilt from scratch on every pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedWorkerPool {
    pub name: String,
    pub namespace: String,
    /// Pool name with every non-alphanumeric character replaced by `_`
    pub name_safe: String,
    pub image: String,
    pub task_type: String,
    /// Never empty
    pub queue_name: String,
    pub min_replica_count: Option<i32>,
    pub max_replica_count: Option<i32>,
    pub cpu_requests: String,
    pub memory_requests: String,
    pub limits: ResourceLimits,
    pub cpu_requests_cores: f64,
    pub memory_requests_bytes: u64,
    pub rabbit_hostname: String,
    pub redis_url: String,
}

fn invalid(message: impl Into<String>) -> Report<ReconcileError> {
    Report::new(ReconcileError::InvalidSpec {
        message: message.into(),
    })
}

/// Replaces characters that metric and rule names do not allow.
pub fn name_safe(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

impl ResolvedWorkerPool {
    pub fn resolve(pool: &WorkerPool) -> Result<Self, Report<ReconcileError>> {
        let name = pool
            .metadata
            .name
            .clone()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| invalid("metadata.name is missing"))?;
        let namespace = pool
            .namespace()
            .filter(|namespace| !namespace.is_empty())
            .ok_or_else(|| invalid("metadata.namespace is missing"))?;
        let spec = &pool.spec;

        if spec.image.trim().is_empty() {
            return Err(invalid("spec.image must not be empty"));
        }

        let queue_name = match &spec.queue_name {
            Some(queue_name) if queue_name.is_empty() => {
                return Err(invalid("spec.queueName must not be empty when set"));
            }
            Some(queue_name) => queue_name.clone(),
            None if spec.task_type.is_empty() => {
                return Err(invalid(
                    "spec.taskType must not be empty when spec.queueName is not set",
                ));
            }
            None => format!("{namespace}.{}", spec.task_type),
        };

        for (field, count) in [
            ("minReplicaCount", spec.min_replica_count),
            ("maxReplicaCount", spec.max_replica_count),
        ] {
            if matches!(count, Some(count) if count < 0) {
                return Err(invalid(format!("spec.{field} must not be negative")));
            }
        }
        if let (Some(min), Some(max)) = (spec.min_replica_count, spec.max_replica_count) {
            if max < min {
                return Err(invalid(format!(
                    "spec.maxReplicaCount ({max}) is lower than spec.minReplicaCount ({min})"
                )));
            }
        }

        let requests = &spec.initial_resources.requests;
        let cpu_requests_cores = quantity::parse_cpu_cores(&requests.cpu)
            .map_err(|e| invalid(format!("spec.initialResources.requests.cpu: {e}")))?;
        let memory_requests_bytes = quantity::parse_memory_bytes(&requests.memory)
            .map_err(|e| invalid(format!("spec.initialResources.requests.memory: {e}")))?;

        let limits = spec.initial_resources.limits.clone().unwrap_or_default();
        if let Some(cpu) = &limits.cpu {
            quantity::parse_cpu_cores(cpu)
                .map_err(|e| invalid(format!("spec.initialResources.limits.cpu: {e}")))?;
        }
        if let Some(memory) = &limits.memory {
            quantity::parse_memory_bytes(memory)
                .map_err(|e| invalid(format!("spec.initialResources.limits.memory: {e}")))?;
        }

        Ok(Self {
            name_safe: name_safe(&name),
            name,
            namespace,
            image: spec.image.clone(),
            task_type: spec.task_type.clone(),
            queue_name,
            min_replica_count: spec.min_replica_count,
            max_replica_count: spec.max_replica_count,
            cpu_requests: requests.cpu.clone(),
            memory_requests: requests.memory.clone(),
            limits,
            cpu_requests_cores,
            memory_requests_bytes,
            rabbit_hostname: spec.rabbit_hostname.clone(),
            redis_url: spec.redis_url.clone(),
        })
    }

    /// Values available to `{placeholder}` tokens in templates.
    pub fn placeholders(&self) -> Placeholders {
        Placeholders::from([
            ("poolName", self.name.clone()),
            ("namespace", self.namespace.clone()),
            ("poolNameSafe", self.name_safe.clone()),
            ("queueName", self.queue_name.clone()),
            ("image", self.image.clone()),
            ("cpuRequests", self.cpu_requests.clone()),
            ("memoryRequests", self.memory_requests.clone()),
            ("cpuRequestsCores", self.cpu_requests_cores.to_string()),
            ("memoryRequestsBytes", self.memory_requests_bytes.to_string()),
            ("rabbitHostname", self.rabbit_hostname.clone()),
            ("redisUrl", self.redis_url.clone()),
        ])
    }
}
