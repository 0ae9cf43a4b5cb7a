//! Wiring of the reconciler into the kube controller runtime.
//!
//! The runtime provides the event source: it watches `WorkerPool` objects,
//! never runs two reconciliations of the same object at once and redelivers
//! an object when asked to requeue it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use api_types::WorkerPool;
use chrono::Utc;
use error_stack::Report;
use error_stack::ResultExt;
use futures::StreamExt;
use kube::api::ListParams;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use kube::ResourceExt;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::app::dispatch;
use crate::app::dispatch::Event;
use crate::domain::error::StoreError;
use crate::domain::reconciler::Reconciler;
use crate::domain::traits::ClusterStore;
use crate::infrastructure::k8s::KubernetesError;

/// State shared by every reconciliation.
pub struct Context<S: ?Sized> {
    pub reconciler: Reconciler<S>,
    /// Delay before a failed pass is attempted again
    pub retry_after: Duration,
}

/// A status read or the final status write of a pass failed.
#[derive(Debug)]
pub struct StatusStoreFailed(pub Report<StoreError>);

impl fmt::Display for StatusStoreFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "status store call failed: {}", self.0.current_context())
    }
}

impl std::error::Error for StatusStoreFailed {}

/// Handles one delivery of `pool` and tells the runtime when to look again.
pub async fn handle<S: ClusterStore + ?Sized>(
    pool: &WorkerPool,
    ctx: &Context<S>,
) -> Result<Action, StatusStoreFailed> {
    // The runtime's cache can lag behind the status written at the end of
    // the previous pass; a transient condition on top is checked against the
    // stored status before it is resumed.
    let refreshed = if dispatch::is_interrupted(pool) {
        let status = ctx
            .reconciler
            .current_status(pool)
            .await
            .map_err(StatusStoreFailed)?;
        if status != pool.status {
            debug!(pool = %pool.name_any(), "cached status is stale, using stored status");
            Some(WorkerPool {
                status,
                ..pool.clone()
            })
        } else {
            None
        }
    } else {
        None
    };
    let pool = refreshed.as_ref().unwrap_or(pool);

    let event = dispatch::classify(pool, Utc::now(), ctx.retry_after);
    let outcome = dispatch::dispatch(&ctx.reconciler, pool, event)
        .await
        .map_err(StatusStoreFailed)?;

    let action = match (event, outcome) {
        (Event::Skip { recheck_after: Some(delay) }, _) => Action::requeue(delay),
        (_, Some(outcome)) if !outcome.is_ready() => Action::requeue(ctx.retry_after),
        _ => Action::await_change(),
    };
    Ok(action)
}

async fn reconcile<S: ClusterStore + ?Sized>(
    pool: Arc<WorkerPool>,
    ctx: Arc<Context<S>>,
) -> Result<Action, StatusStoreFailed> {
    handle(&pool, &ctx).await
}

fn error_policy<S: ClusterStore + ?Sized>(
    pool: Arc<WorkerPool>,
    error: &StatusStoreFailed,
    ctx: Arc<Context<S>>,
) -> Action {
    warn!(pool = %pool.name_any(), "{error}, retrying in {:?}", ctx.retry_after);
    Action::requeue(ctx.retry_after)
}

/// Watches worker pools (in `namespace`, or everywhere) until `token` is
/// cancelled.
///
/// # Errors
///
/// - [`KubernetesError::WatchFailed`] if the `WorkerPool` resource cannot be
///   listed, usually because its CRD is not installed
#[tracing::instrument(skip(client, ctx, token))]
pub async fn run<S: ClusterStore + 'static>(
    client: Client,
    namespace: Option<String>,
    ctx: Arc<Context<S>>,
    token: CancellationToken,
) -> Result<(), Report<KubernetesError>> {
    let api: Api<WorkerPool> = match &namespace {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    api.list(&ListParams::default().limit(1))
        .await
        .change_context(KubernetesError::WatchFailed {
            message: "cannot list WorkerPool resources, is the CRD installed?".to_string(),
        })?;

    info!("Starting worker pool controller");
    let controller = Controller::new(api, watcher::Config::default())
        .run(reconcile::<S>, error_policy::<S>, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, action)) => debug!(%object, ?action, "reconciled"),
                Err(e) => error!("Controller error: {e}"),
            }
        });

    select! {
        _ = token.cancelled() => {
            info!("Worker pool controller shutdown requested");
        }
        _ = controller => {
            warn!("Worker pool controller stream ended");
        }
    }
    Ok(())
}
