use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service};
use kube::{
    Api, Client, ResourceExt,
    runtime::{
        controller::{Action, Controller},
        reflector::ObjectRef,
        watcher,
    },
};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    config::OperatorDefaults,
    crds::{
        service_scrape::VMServiceScrape,
        vmsingle::{VMSingle, VMSingleStatus},
    },
    dispatch::select_parents,
    error::ReconcileError,
    reconcile::{Children, Reconciler},
    store::{ClusterStore, ObjectStore},
};

#[derive(Clone)]
pub struct Ctx {
    pub client: Client,
    pub defaults: OperatorDefaults,
    pub store_timeout: Duration,
    pub shutdown: CancellationToken,
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<DynamicType = (), Scope = k8s_openapi::NamespaceResourceScope>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// VMSingle controller. Owned objects re-trigger their parent; a changed
/// VMServiceScrape re-triggers every VMSingle whose selectors match it.
pub fn controller(client: Client, namespace: Option<&str>) -> Controller<VMSingle> {
    let controller = Controller::new(
        scoped::<VMSingle>(&client, namespace),
        watcher::Config::default(),
    );
    let parents = controller.store();
    controller
        .owns(
            scoped::<Deployment>(&client, namespace),
            watcher::Config::default(),
        )
        .owns(
            scoped::<Service>(&client, namespace),
            watcher::Config::default(),
        )
        .owns(
            scoped::<PersistentVolumeClaim>(&client, namespace),
            watcher::Config::default(),
        )
        .watches(
            scoped::<VMServiceScrape>(&client, namespace),
            watcher::Config::default(),
            move |scrape| {
                let (matched, errors) = select_parents(&scrape, &parents.state());
                debug!(
                    scrape = %scrape.name_any(),
                    matched = matched.len(),
                    selector_errors = errors.len(),
                    "mapped service scrape to vmsingles"
                );
                matched
                    .iter()
                    .map(|parent| ObjectRef::from_obj(parent.as_ref()))
                    .collect::<Vec<_>>()
            },
        )
        .shutdown_on_signal()
}

pub async fn reconcile(cr: Arc<VMSingle>, ctx: Arc<Ctx>) -> Result<Action, ReconcileError> {
    if cr.metadata.deletion_timestamp.is_some() {
        // owned children are garbage collected through their owner references
        return Ok(Action::await_change());
    }
    info!(namespace = %cr.namespace().unwrap_or_default(), name = %cr.name_any(), "reconciling vmsingle");

    let reconciler = Reconciler::new(ClusterStore::new(ctx.client.clone()))
        .with_cancellation(ctx.shutdown.child_token())
        .with_timeout(ctx.store_timeout);
    run_pass(&reconciler, &cr, &ctx.defaults).await?;

    Ok(Action::requeue(Duration::from_secs(300)))
}

pub fn error_policy(cr: Arc<VMSingle>, err: &ReconcileError, _ctx: Arc<Ctx>) -> Action {
    if err.is_retryable() {
        warn!(name = %cr.name_any(), error = %err, "vmsingle reconcile failed, requeueing");
        Action::requeue(Duration::from_secs(30))
    } else {
        error!(name = %cr.name_any(), error = %err, "vmsingle reconcile failed permanently");
        Action::await_change()
    }
}

/// Runs one pass for `cr` and records its outcome in the VMSingle status.
///
/// The status is only written when the outcome differs from what `cr`
/// already carries; every status write is itself a watch event on the VMSingle.
pub async fn run_pass<S: ObjectStore>(
    reconciler: &Reconciler<S>,
    cr: &VMSingle,
    defaults: &OperatorDefaults,
) -> Result<Children, ReconcileError> {
    let ns = cr.namespace().unwrap_or_default();
    let name = cr.name_any();
    let result = reconciler.reconcile_vmsingle(cr, defaults).await;
    if matches!(result, Err(ReconcileError::Cancelled)) {
        return result;
    }

    let status = status_for(result.as_ref().err());
    if cr.status.as_ref().is_some_and(|current| same_outcome(current, &status)) {
        debug!(namespace = %ns, %name, "status unchanged, not writing it");
        return result;
    }
    let write = reconciler
        .store()
        .patch_status::<VMSingle>(&ns, &name, serde_json::to_value(&status)?)
        .await;
    match (result, write) {
        (Ok(children), Ok(())) => Ok(children),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), write) => {
            if let Err(we) = write {
                warn!(namespace = %ns, %name, error = %we, "cannot record failure in status");
            }
            Err(e)
        }
    }
}

/// Equal apart from `last_update`.
fn same_outcome(a: &VMSingleStatus, b: &VMSingleStatus) -> bool {
    a.ready == b.ready && a.reason == b.reason && a.message == b.message
}

fn status_for(err: Option<&ReconcileError>) -> VMSingleStatus {
    VMSingleStatus {
        ready: err.is_none(),
        reason: err.map(|e| e.reason().to_string()),
        message: err.map(ToString::to_string),
        last_update: OffsetDateTime::now_utc().format(&Rfc3339).ok(),
    }
}

#[cfg(test)]
mod tests_vmsingle_controller {
    use super::*;

    #[test]
    fn status_carries_error_reason() {
        let ok = status_for(None);
        assert!(ok.ready);
        assert!(ok.reason.is_none());
        assert!(ok.last_update.is_some());

        let err = ReconcileError::UnknownContainerOverride("sidecar".into());
        let failed = status_for(Some(&err));
        assert!(!failed.ready);
        assert_eq!(failed.reason.as_deref(), Some("UnknownContainerOverride"));
        assert!(failed.message.as_deref().unwrap().contains("sidecar"));
    }

    #[test]
    fn timestamp_alone_is_not_a_new_outcome() {
        let mut earlier = status_for(None);
        earlier.last_update = Some("2026-01-01T00:00:00Z".into());
        assert!(same_outcome(&earlier, &status_for(None)));

        let err = ReconcileError::StoreUnavailable("apiserver down".into());
        assert!(!same_outcome(&earlier, &status_for(Some(&err))));
    }
}
