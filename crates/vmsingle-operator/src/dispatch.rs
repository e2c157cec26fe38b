//! Fan-out from a changed VMServiceScrape to the VMSingle objects selecting it.

use std::sync::Arc;

use futures::future::join_all;
use kube::ResourceExt;
use tracing::{info, warn};

use crate::{
    config::OperatorDefaults,
    crds::{service_scrape::VMServiceScrape, vmsingle::VMSingle},
    error::ReconcileError,
    reconcile::Reconciler,
    selector,
    store::ObjectStore,
};

/// Parents that select `changed`, plus one error per parent whose selector
/// could not be evaluated. Parents being deleted are skipped.
pub fn select_parents(
    changed: &VMServiceScrape,
    parents: &[Arc<VMSingle>],
) -> (Vec<Arc<VMSingle>>, Vec<ReconcileError>) {
    let target_ns = changed.namespace().unwrap_or_default();
    let mut matched = Vec::new();
    let mut errors = Vec::new();
    for parent in parents {
        if parent.metadata.deletion_timestamp.is_some() {
            continue;
        }
        let parent_ns = parent.namespace().unwrap_or_default();
        match selector::matches(
            &parent.scrape_selector(),
            &target_ns,
            changed.labels(),
            &parent_ns,
        ) {
            Ok(true) => matched.push(parent.clone()),
            Ok(false) => {}
            Err(e) => {
                warn!(
                    vmsingle = %parent.name_any(),
                    namespace = %parent_ns,
                    error = %e,
                    "cannot match vmsingle against service scrape, skipping"
                );
                errors.push(e);
            }
        }
    }
    (matched, errors)
}

/// Runs a full reconciliation pass for every parent selecting `changed`.
///
/// Passes for different parents are independent and run concurrently. All
/// per-parent errors are returned; the caller decides whether to retry.
pub async fn dispatch_on_scrape_target_change<S: ObjectStore>(
    reconciler: &Reconciler<S>,
    defaults: &OperatorDefaults,
    changed: &VMServiceScrape,
    parents: &[Arc<VMSingle>],
) -> Vec<ReconcileError> {
    let (matched, mut errors) = select_parents(changed, parents);
    info!(
        scrape = %changed.name_any(),
        namespace = %changed.namespace().unwrap_or_default(),
        parents = parents.len(),
        matched = matched.len(),
        "dispatching service scrape change"
    );
    let passes = matched.iter().map(|parent| async move {
        reconciler
            .reconcile_vmsingle(parent, defaults)
            .await
            .map_err(|e| {
                warn!(vmsingle = %parent.name_any(), error = %e, "cannot reconcile vmsingle");
                e
            })
    });
    errors.extend(join_all(passes).await.into_iter().filter_map(Result::err));
    errors
}
