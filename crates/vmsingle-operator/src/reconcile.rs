//! Create-or-update of the objects owned by a VMSingle.
//!
//! A child object is either absent, and gets created from the desired state,
//! or present, and gets the desired state written over it. Fields that only
//! the live object knows about are carried forward according to the kind's
//! [`FieldRule`] table before the update is sent.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{PersistentVolumeClaim, Service, VolumeResourceRequirements};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    config::OperatorDefaults,
    crds::vmsingle::VMSingle,
    error::ReconcileError,
    quantity::resource_maps_equal,
    resources::{build_deployment, build_pvc, build_service},
    store::{ObjectStore, StoreObject, kind_of},
};

/// A field that may exist on the live object without the synthesizer knowing it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    ResourceVersion,
    Annotations,
    TemplateAnnotations,
    ClusterIp,
    ClusterIps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    /// The desired value is written as-is.
    Overwrite,
    /// A non-empty live value replaces the desired one.
    PreserveFromLive,
    /// Every live entry is copied onto the desired map, so the live value
    /// wins on collision and keys set by other writers survive.
    MergeMaps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldRule {
    pub field: Field,
    pub policy: FieldPolicy,
}

const fn rule(field: Field, policy: FieldPolicy) -> FieldRule {
    FieldRule { field, policy }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// The kind has no such field.
    Unsupported,
    Text(Option<String>),
    List(Option<Vec<String>>),
    Map(Option<BTreeMap<String, String>>),
}

impl FieldValue {
    fn is_empty(&self) -> bool {
        match self {
            FieldValue::Unsupported => true,
            FieldValue::Text(v) => v.as_deref().is_none_or(str::is_empty),
            FieldValue::List(v) => v.as_ref().is_none_or(Vec::is_empty),
            FieldValue::Map(v) => v.as_ref().is_none_or(BTreeMap::is_empty),
        }
    }
}

/// An owned object that is always updated when present.
pub trait ChildObject: StoreObject {
    const FIELD_POLICY: &'static [FieldRule];

    fn read_field(&self, field: Field) -> FieldValue {
        read_meta_field(self, field)
    }

    fn write_field(&mut self, field: Field, value: FieldValue) {
        write_meta_field(self, field, value)
    }
}

fn read_meta_field<K: StoreObject>(obj: &K, field: Field) -> FieldValue {
    match field {
        Field::ResourceVersion => FieldValue::Text(obj.meta().resource_version.clone()),
        Field::Annotations => FieldValue::Map(obj.meta().annotations.clone()),
        _ => FieldValue::Unsupported,
    }
}

fn write_meta_field<K: StoreObject>(obj: &mut K, field: Field, value: FieldValue) {
    match (field, value) {
        (Field::ResourceVersion, FieldValue::Text(v)) => obj.meta_mut().resource_version = v,
        (Field::Annotations, FieldValue::Map(v)) => obj.meta_mut().annotations = v,
        (field, value) => debug!(?field, ?value, "ignoring write to unsupported field"),
    }
}

impl ChildObject for Deployment {
    const FIELD_POLICY: &'static [FieldRule] = &[
        rule(Field::ResourceVersion, FieldPolicy::PreserveFromLive),
        rule(Field::Annotations, FieldPolicy::MergeMaps),
        rule(Field::TemplateAnnotations, FieldPolicy::MergeMaps),
    ];

    fn read_field(&self, field: Field) -> FieldValue {
        match field {
            Field::TemplateAnnotations => FieldValue::Map(
                self.spec
                    .as_ref()
                    .and_then(|s| s.template.metadata.as_ref())
                    .and_then(|m| m.annotations.clone()),
            ),
            other => read_meta_field(self, other),
        }
    }

    fn write_field(&mut self, field: Field, value: FieldValue) {
        match (field, value) {
            (Field::TemplateAnnotations, FieldValue::Map(v)) => {
                if let Some(spec) = self.spec.as_mut() {
                    spec.template
                        .metadata
                        .get_or_insert_with(Default::default)
                        .annotations = v;
                }
            }
            (field, value) => write_meta_field(self, field, value),
        }
    }
}

impl ChildObject for Service {
    const FIELD_POLICY: &'static [FieldRule] = &[
        rule(Field::ResourceVersion, FieldPolicy::PreserveFromLive),
        rule(Field::Annotations, FieldPolicy::MergeMaps),
        rule(Field::ClusterIp, FieldPolicy::PreserveFromLive),
        rule(Field::ClusterIps, FieldPolicy::PreserveFromLive),
    ];

    fn read_field(&self, field: Field) -> FieldValue {
        match field {
            Field::ClusterIp => {
                FieldValue::Text(self.spec.as_ref().and_then(|s| s.cluster_ip.clone()))
            }
            Field::ClusterIps => {
                FieldValue::List(self.spec.as_ref().and_then(|s| s.cluster_ips.clone()))
            }
            other => read_meta_field(self, other),
        }
    }

    fn write_field(&mut self, field: Field, value: FieldValue) {
        match (field, value) {
            (Field::ClusterIp, FieldValue::Text(v)) => {
                self.spec.get_or_insert_with(Default::default).cluster_ip = v
            }
            (Field::ClusterIps, FieldValue::List(v)) => {
                self.spec.get_or_insert_with(Default::default).cluster_ips = v
            }
            (field, value) => write_meta_field(self, field, value),
        }
    }
}

/// Carries live-only fields onto `desired` according to `K::FIELD_POLICY`.
pub fn apply_field_policy<K: ChildObject>(desired: &mut K, live: &K) {
    for FieldRule { field, policy } in K::FIELD_POLICY.iter().copied() {
        match policy {
            FieldPolicy::Overwrite => {}
            FieldPolicy::PreserveFromLive => {
                let value = live.read_field(field);
                if !value.is_empty() {
                    desired.write_field(field, value);
                }
            }
            FieldPolicy::MergeMaps => {
                if let (FieldValue::Map(live_map), FieldValue::Map(desired_map)) =
                    (live.read_field(field), desired.read_field(field))
                {
                    let mut merged = desired_map.unwrap_or_default();
                    merged.extend(live_map.unwrap_or_default());
                    desired.write_field(field, FieldValue::Map((!merged.is_empty()).then_some(merged)));
                }
            }
        }
    }
}

/// The API server stores quantities in canonical form (`1024Mi` becomes
/// `1Gi`), so requests and limits are compared by value.
fn volume_resources_equal(
    a: Option<&VolumeResourceRequirements>,
    b: Option<&VolumeResourceRequirements>,
) -> bool {
    fn limits(r: Option<&VolumeResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
        r.and_then(|r| r.limits.as_ref())
    }
    fn requests(r: Option<&VolumeResourceRequirements>) -> Option<&BTreeMap<String, Quantity>> {
        r.and_then(|r| r.requests.as_ref())
    }
    resource_maps_equal(limits(a), limits(b)) && resource_maps_equal(requests(a), requests(b))
}

/// Objects reconciled for one VMSingle.
#[derive(Debug, Clone)]
pub struct Children {
    pub claim: Option<PersistentVolumeClaim>,
    pub deployment: Deployment,
    pub service: Service,
}

/// Drives child objects toward their desired state through an [`ObjectStore`].
///
/// Every store call is bounded by the optional timeout and aborted when the
/// cancellation token fires. Nothing is retried here.
pub struct Reconciler<S> {
    store: S,
    cancel: CancellationToken,
    timeout: Option<Duration>,
}

impl<S: ObjectStore> Reconciler<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            cancel: CancellationToken::new(),
            timeout: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn guard<T, F>(&self, call: F) -> Result<T, ReconcileError>
    where
        F: Future<Output = Result<T, ReconcileError>>,
    {
        let bounded = async {
            match self.timeout {
                Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                    ReconcileError::StoreUnavailable(format!("store call timed out after {limit:?}"))
                })?,
                None => call.await,
            }
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ReconcileError::Cancelled),
            res = bounded => res,
        }
    }

    /// Fetches the live object, or creates `desired` when there is none.
    /// Returns the live object and whether it was just created.
    async fn get_or_create<K: StoreObject>(&self, desired: &K) -> Result<(K, bool), ReconcileError> {
        let ns = desired.namespace().unwrap_or_default();
        let name = desired.name_any();
        let kind = kind_of::<K>();
        match self.guard(self.store.get::<K>(&ns, &name)).await {
            Ok(live) => Ok((live, false)),
            Err(e) if e.is_not_found() => {
                info!(%kind, namespace = %ns, %name, "object not found, creating");
                match self.guard(self.store.create(desired)).await {
                    Ok(created) => Ok((created, true)),
                    Err(ReconcileError::AlreadyExists { .. }) => {
                        debug!(%kind, namespace = %ns, %name, "lost creation race, updating instead");
                        let live = self.guard(self.store.get::<K>(&ns, &name)).await?;
                        Ok((live, false))
                    }
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Creates `desired` when absent, otherwise merges live-only fields into it and updates.
    pub async fn create_or_update<K: ChildObject>(&self, mut desired: K) -> Result<K, ReconcileError> {
        let (live, created) = self.get_or_create(&desired).await?;
        if created {
            return Ok(live);
        }
        apply_field_policy(&mut desired, &live);
        let updated = self.guard(self.store.update(&desired)).await?;
        debug!(
            kind = %kind_of::<K>(),
            namespace = %desired.namespace().unwrap_or_default(),
            name = %desired.name_any(),
            "object reconciled"
        );
        Ok(updated)
    }

    /// Reconciles a claim. Only the resource requests are ever updated; every
    /// other claim field is immutable once bound. A failed resize is logged and
    /// the claim is returned unchanged.
    pub async fn reconcile_claim(
        &self,
        desired: PersistentVolumeClaim,
    ) -> Result<PersistentVolumeClaim, ReconcileError> {
        let (live, created) = self.get_or_create(&desired).await?;
        if created {
            return Ok(live);
        }
        let wanted = desired.spec.as_ref().and_then(|s| s.resources.clone());
        let current = live.spec.as_ref().and_then(|s| s.resources.as_ref());
        if volume_resources_equal(wanted.as_ref(), current) {
            return Ok(live);
        }

        let ns = live.namespace().unwrap_or_default();
        let name = live.name_any();
        info!(namespace = %ns, %name, "volume requests differ, resizing claim");
        let mut resized = live.clone();
        resized.spec.get_or_insert_with(Default::default).resources = wanted;
        match self.guard(self.store.update(&resized)).await {
            Ok(updated) => Ok(updated),
            Err(ReconcileError::Cancelled) => Err(ReconcileError::Cancelled),
            Err(e) => {
                warn!(namespace = %ns, %name, error = %e, "cannot resize claim, keeping current size");
                Ok(live)
            }
        }
    }

    /// One reconciliation pass: claim first, then deployment, then service.
    ///
    /// All objects are synthesized before any store call, so an invalid CR
    /// leaves the cluster untouched.
    pub async fn reconcile_vmsingle(
        &self,
        cr: &VMSingle,
        defaults: &OperatorDefaults,
    ) -> Result<Children, ReconcileError> {
        let claim = build_pvc(cr, defaults);
        let deployment = build_deployment(cr, defaults)?;
        let service = build_service(cr, defaults);

        let claim = match claim {
            Some(pvc) => Some(self.reconcile_claim(pvc).await?),
            None => None,
        };
        let deployment = self.create_or_update(deployment).await?;
        let service = self.create_or_update(service).await?;
        Ok(Children {
            claim,
            deployment,
            service,
        })
    }
}
