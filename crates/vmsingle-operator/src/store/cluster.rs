use kube::{
    Api, Client, ResourceExt,
    api::{ListParams, Patch, PatchParams, PostParams},
};

use super::{ObjectStore, StoreObject, kind_of};
use crate::error::ReconcileError;

pub const FIELD_MANAGER: &str = "vmsingle-operator";

/// Object store backed by the Kubernetes API server.
#[derive(Clone)]
pub struct ClusterStore {
    client: Client,
}

impl ClusterStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ObjectStore for ClusterStore {
    async fn get<K: StoreObject>(&self, namespace: &str, name: &str) -> Result<K, ReconcileError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        api.get(name)
            .await
            .map_err(|e| ReconcileError::from_kube(e, &kind_of::<K>(), namespace, name))
    }

    async fn create<K: StoreObject>(&self, obj: &K) -> Result<K, ReconcileError> {
        let ns = obj.namespace().unwrap_or_default();
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        api.create(&PostParams::default(), obj)
            .await
            .map_err(|e| ReconcileError::from_kube(e, &kind_of::<K>(), &ns, &obj.name_any()))
    }

    async fn update<K: StoreObject>(&self, obj: &K) -> Result<K, ReconcileError> {
        let ns = obj.namespace().unwrap_or_default();
        let name = obj.name_any();
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        api.replace(&name, &PostParams::default(), obj)
            .await
            .map_err(|e| ReconcileError::from_kube(e, &kind_of::<K>(), &ns, &name))
    }

    async fn list<K: StoreObject>(&self, namespace: Option<&str>) -> Result<Vec<K>, ReconcileError> {
        let api: Api<K> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| ReconcileError::from_kube(e, &kind_of::<K>(), namespace.unwrap_or(""), ""))?;
        Ok(list.items)
    }

    async fn patch_status<K: StoreObject>(
        &self,
        namespace: &str,
        name: &str,
        status: serde_json::Value,
    ) -> Result<(), ReconcileError> {
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let pp = PatchParams::apply(FIELD_MANAGER);
        let _ = api
            .patch_status(
                name,
                &pp,
                &Patch::Merge(serde_json::json!({ "status": status })),
            )
            .await
            .map_err(|e| ReconcileError::from_kube(e, &kind_of::<K>(), namespace, name))?;
        Ok(())
    }
}
