//! Access to the cluster object store.
//!
//! Every object is keyed by kind, namespace and name. Implementations map
//! their failures onto [`ReconcileError::NotFound`],
//! [`ReconcileError::AlreadyExists`], [`ReconcileError::Conflict`] and
//! [`ReconcileError::StoreUnavailable`].

use std::fmt::Debug;

use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::ReconcileError;

mod cluster;
mod memory;

pub use cluster::ClusterStore;
pub use memory::{MemoryStore, StoreCall, StoreOp};

/// A namespaced object the store can hold.
pub trait StoreObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> StoreObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K, ReconcileError>;

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, ReconcileError>;

    /// Replaces the object. Fails with `Conflict` when its resource version is stale.
    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, ReconcileError>;

    /// Lists objects in one namespace, or in all namespaces for `None`.
    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>, ReconcileError>;

    /// Merges `status` into the status subresource.
    async fn patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ReconcileError>;
}

pub(crate) fn kind_of<K: StoreObject>() -> String {
    K::kind(&()).into_owned()
}
