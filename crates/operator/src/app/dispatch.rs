//! Turns an observed `WorkerPool` into a lifecycle event.
//!
//! The controller runtime only says "this object changed". Which of
//! create, update or delete that means is derived from the object's own
//! status, so a restarted operator picks up exactly where it left off.

use std::time::Duration;

use api_types::WorkerPool;
use api_types::WorkerPoolStatus;
use chrono::DateTime;
use chrono::Utc;
use error_stack::Report;
use kube::ResourceExt;

use crate::domain::error::StoreError;
use crate::domain::reconciler::ReconcileOutcome;
use crate::domain::reconciler::Reconciler;
use crate::domain::status;
use crate::domain::status::REASON_INITIALIZING;
use crate::domain::status::REASON_READY;
use crate::domain::traits::ClusterStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Create,
    /// The latest create did not reach Ready
    RetryCreate,
    Update,
    Delete,
    /// Nothing to do now; check again after the delay if one is given
    Skip { recheck_after: Option<Duration> },
}

/// Whether the latest condition belongs to a pass that never wrote its
/// outcome, either because it died or because the copy is older than that
/// write.
pub fn is_interrupted(pool: &WorkerPool) -> bool {
    pool.status
        .as_ref()
        .and_then(WorkerPoolStatus::latest)
        .is_some_and(status::is_transient)
}

/// Classifies `pool` as of `now`. Failed passes are retried once
/// `retry_after` has elapsed since they were recorded.
pub fn classify(pool: &WorkerPool, now: DateTime<Utc>, retry_after: Duration) -> Event {
    if pool.metadata.deletion_timestamp.is_some() {
        return Event::Delete;
    }

    let Some(status) = pool.status.as_ref() else {
        return Event::Create;
    };
    let Some(latest) = status.latest() else {
        return Event::Create;
    };

    // A pass that died before writing its terminal condition.
    if status::is_transient(latest) {
        return if latest.reason == REASON_INITIALIZING {
            Event::RetryCreate
        } else {
            Event::Update
        };
    }

    let up_to_date = status.observed_generation.is_some()
        && status.observed_generation == pool.metadata.generation;
    let was_create = status
        .conditions
        .get(1)
        .is_some_and(|previous| previous.reason == REASON_INITIALIZING);

    if latest.reason == REASON_READY {
        return if up_to_date {
            Event::Skip {
                recheck_after: None,
            }
        } else {
            Event::Update
        };
    }

    if up_to_date {
        let failed_at = latest
            .last_transition_time
            .as_deref()
            .and_then(|time| DateTime::parse_from_rfc3339(time).ok())
            .map(|time| time.with_timezone(&Utc));
        if let Some(failed_at) = failed_at {
            let elapsed = (now - failed_at).to_std().unwrap_or_default();
            if elapsed < retry_after {
                return Event::Skip {
                    recheck_after: Some(retry_after - elapsed),
                };
            }
        }
    }

    if was_create {
        Event::RetryCreate
    } else {
        Event::Update
    }
}

/// Runs the reconciler for `event`. `None` means no pass was run.
pub async fn dispatch<S: ClusterStore + ?Sized>(
    reconciler: &Reconciler<S>,
    pool: &WorkerPool,
    event: Event,
) -> Result<Option<ReconcileOutcome>, Report<StoreError>> {
    tracing::debug!(pool = %pool.name_any(), ?event, "dispatching");
    let outcome = match event {
        Event::Create => reconciler.on_create(pool).await?,
        Event::RetryCreate => reconciler.on_retry_create(pool).await?,
        Event::Update => reconciler.on_update(pool).await?,
        Event::Delete => {
            reconciler.on_delete(pool).await;
            return Ok(None);
        }
        Event::Skip { .. } => return Ok(None),
    };
    Ok(Some(outcome))
}

#[cfg(test)]
mod tests {
    use api_types::ConditionStatus;
    use api_types::ConditionType;
    use api_types::InitialResources;
    use api_types::ResourceRequests;
    use api_types::WorkerPoolCondition;
    use api_types::WorkerPoolSpec;
    use api_types::WorkerPoolStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use similar_asserts::assert_eq;

    use super::*;

    const RETRY: Duration = Duration::from_secs(300);

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn condition(reason: &str, at: &str) -> WorkerPoolCondition {
        WorkerPoolCondition {
            type_: if reason == "Ready" {
                ConditionType::Ready
            } else {
                ConditionType::NotReady
            },
            status: ConditionStatus::True,
            reason: reason.to_string(),
            message: String::new(),
            last_transition_time: Some(at.to_string()),
        }
    }

    fn pool(generation: i64, status: Option<(Vec<WorkerPoolCondition>, i64)>) -> WorkerPool {
        let mut pool = WorkerPool::new(
            "pool-a",
            WorkerPoolSpec {
                image: "img:1".to_string(),
                task_type: "render".to_string(),
                queue_name: None,
                min_replica_count: None,
                max_replica_count: None,
                initial_resources: InitialResources {
                    requests: ResourceRequests {
                        cpu: "100m".to_string(),
                        memory: "128Mi".to_string(),
                    },
                    limits: None,
                },
                rabbit_hostname: String::new(),
                redis_url: String::new(),
            },
        );
        pool.metadata.namespace = Some("ns1".to_string());
        pool.metadata.generation = Some(generation);
        pool.status = status.map(|(conditions, observed)| WorkerPoolStatus {
            conditions,
            observed_generation: Some(observed),
        });
        pool
    }

    #[test]
    fn new_pool_is_created() {
        assert_eq!(classify(&pool(1, None), now(), RETRY), Event::Create);
        assert_eq!(
            classify(&pool(1, Some((vec![], 1))), now(), RETRY),
            Event::Create
        );
    }

    #[test]
    fn deleted_pool_is_deleted() {
        let mut pool = pool(1, None);
        pool.metadata.deletion_timestamp = Some(Time(now()));
        assert_eq!(classify(&pool, now(), RETRY), Event::Delete);
    }

    #[test]
    fn ready_pool_is_skipped_until_spec_changes() {
        let conditions = vec![
            condition("Ready", "2026-01-01T11:00:00Z"),
            condition("Initializing", "2026-01-01T11:00:00Z"),
        ];
        assert_eq!(
            classify(&pool(1, Some((conditions.clone(), 1))), now(), RETRY),
            Event::Skip {
                recheck_after: None
            }
        );
        assert_eq!(
            classify(&pool(2, Some((conditions, 1))), now(), RETRY),
            Event::Update
        );
    }

    #[test]
    fn failed_create_is_retried_after_delay() {
        let conditions = vec![
            condition("AlreadyExists", "2026-01-01T11:59:00Z"),
            condition("Initializing", "2026-01-01T11:59:00Z"),
        ];
        assert_eq!(
            classify(&pool(1, Some((conditions.clone(), 1))), now(), RETRY),
            Event::Skip {
                recheck_after: Some(Duration::from_secs(240))
            }
        );

        let later = now() + chrono::Duration::seconds(300);
        assert_eq!(
            classify(&pool(1, Some((conditions.clone(), 1))), later, RETRY),
            Event::RetryCreate
        );

        // a spec change retries right away
        assert_eq!(
            classify(&pool(2, Some((conditions, 1))), now(), RETRY),
            Event::RetryCreate
        );
    }

    #[test]
    fn failed_update_is_retried_as_update() {
        let conditions = vec![
            condition("NotFound", "2026-01-01T10:00:00Z"),
            condition("Updating", "2026-01-01T10:00:00Z"),
            condition("Ready", "2026-01-01T09:00:00Z"),
            condition("Initializing", "2026-01-01T09:00:00Z"),
        ];
        assert_eq!(
            classify(&pool(2, Some((conditions, 2))), now(), RETRY),
            Event::Update
        );
    }

    #[test]
    fn interrupted_pass_is_resumed() {
        let creating = vec![condition("Initializing", "2026-01-01T11:59:59Z")];
        assert_eq!(
            classify(&pool(1, Some((creating, 0))), now(), RETRY),
            Event::RetryCreate
        );

        let updating = vec![
            condition("Updating", "2026-01-01T11:59:59Z"),
            condition("Ready", "2026-01-01T11:00:00Z"),
        ];
        assert!(is_interrupted(&pool(2, Some((updating.clone(), 1)))));
        assert_eq!(
            classify(&pool(2, Some((updating, 1))), now(), RETRY),
            Event::Update
        );
    }

    #[test]
    fn finished_pass_is_not_interrupted() {
        let done = vec![
            condition("Ready", "2026-01-01T11:00:00Z"),
            condition("Initializing", "2026-01-01T11:00:00Z"),
        ];
        assert!(!is_interrupted(&pool(1, Some((done, 1)))));
        assert!(!is_interrupted(&pool(1, None)));
    }
}
