use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, EnvVar, LocalObjectReference, PersistentVolumeClaimSpec,
    PodSecurityContext, ResourceRequirements, Toleration, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::selector::SelectorDescriptor;

pub const API_VERSION: &str = "operator.victoriametrics.com/v1beta1";
pub const KIND: &str = "VMSingle";

const NAME_PREFIX: &str = "vmsingle";

#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "operator.victoriametrics.com",
    version = "v1beta1",
    kind = "VMSingle",
    plural = "vmsingles",
    namespaced,
    status = "VMSingleStatus",
    shortname = "vms"
)]
#[serde(rename_all = "camelCase")]
pub struct VMSingleSpec {
    /// Image repository, defaults to the operator-wide image
    pub image: Option<String>,
    /// Image tag, defaults to the operator-wide version
    pub version: Option<String>,
    /// HTTP listen port, defaults to the operator-wide port (8428)
    pub port: Option<u16>,
    pub replica_count: Option<i32>,
    /// Passed verbatim as -retentionPeriod, e.g. "1" (months) or "30d"
    pub retention_period: String,
    pub log_level: Option<String>,
    pub log_format: Option<String>,
    /// Memory and cpu requests/limits; unset entries get operator defaults
    pub resources: Option<ResourceRequirements>,
    /// Persistent storage. Absent means an emptyDir data volume.
    pub storage: Option<PersistentVolumeClaimSpec>,
    /// Attach a controller owner reference to the claim so it is removed with the CR
    #[serde(default)]
    pub remove_pvc_after_delete: bool,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub volume_mounts: Vec<VolumeMount>,
    /// Extra `--key=value` flags
    #[serde(default)]
    pub extra_args: BTreeMap<String, String>,
    #[serde(default)]
    pub extra_envs: Vec<EnvVar>,
    /// Secrets mounted read-only under /etc/vm/secrets/<name>
    #[serde(default)]
    pub secrets: Vec<String>,
    /// ConfigMaps mounted read-only under /etc/vm/configs/<name>
    #[serde(default)]
    pub config_maps: Vec<String>,
    /// Patches for operator-generated containers, matched by name
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub init_containers: Vec<Container>,
    pub pod_metadata: Option<EmbeddedObjectMetadata>,
    pub service_account_name: Option<String>,
    pub security_context: Option<PodSecurityContext>,
    #[serde(default)]
    pub image_pull_secrets: Vec<LocalObjectReference>,
    pub affinity: Option<Affinity>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
    pub priority_class_name: Option<String>,
    pub host_network: Option<bool>,
    pub dns_policy: Option<String>,
    /// Selects VMServiceScrape objects by label
    pub service_scrape_selector: Option<LabelSelector>,
    /// Selects namespaces to look for VMServiceScrape objects in.
    /// Absent means only the VMSingle's own namespace.
    pub service_scrape_namespace_selector: Option<LabelSelector>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
pub struct EmbeddedObjectMetadata {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VMSingleStatus {
    pub ready: bool,
    /// Reason of the last failure, e.g. "Conflict"
    pub reason: Option<String>,
    pub message: Option<String>,
    /// RFC 3339 timestamp of the last status write
    pub last_update: Option<String>,
}

/// Where the data directory lives.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Ephemeral,
    Persistent(PersistentVolumeClaimSpec),
}

impl VMSingle {
    /// Name shared by the claim, deployment and service.
    pub fn prefixed_name(&self) -> String {
        format!("{}-{}", NAME_PREFIX, self.name_any())
    }

    pub fn storage(&self) -> Storage {
        match &self.spec.storage {
            Some(spec) => Storage::Persistent(spec.clone()),
            None => Storage::Ephemeral,
        }
    }

    /// Labels used by the deployment and service selectors. Never removed from live objects.
    pub fn selector_labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("app.kubernetes.io/name".to_string(), NAME_PREFIX.to_string()),
            ("app.kubernetes.io/instance".to_string(), self.name_any()),
            (
                "app.kubernetes.io/component".to_string(),
                "monitoring".to_string(),
            ),
            ("managed-by".to_string(), "vm-operator".to_string()),
        ])
    }

    pub fn pod_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self
            .spec
            .pod_metadata
            .as_ref()
            .map(|m| m.labels.clone())
            .unwrap_or_default();
        labels.extend(self.selector_labels());
        labels
    }

    /// CR labels with the selector labels layered on top.
    pub fn final_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels().clone();
        labels.extend(self.selector_labels());
        labels
    }

    /// CR annotations without the kubectl bookkeeping keys.
    pub fn child_annotations(&self) -> BTreeMap<String, String> {
        self.annotations()
            .iter()
            .filter(|(k, _)| !k.starts_with("kubectl.kubernetes.io/"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    pub fn pod_annotations(&self) -> BTreeMap<String, String> {
        self.spec
            .pod_metadata
            .as_ref()
            .map(|m| m.annotations.clone())
            .unwrap_or_default()
    }

    pub fn as_owner(&self) -> OwnerReference {
        OwnerReference {
            api_version: API_VERSION.into(),
            kind: KIND.into(),
            name: self.name_any(),
            uid: self.metadata.uid.clone().unwrap_or_default(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    pub fn scrape_selector(&self) -> SelectorDescriptor {
        SelectorDescriptor {
            label_selector: self.spec.service_scrape_selector.clone(),
            namespace_selector: self.spec.service_scrape_namespace_selector.clone(),
        }
    }
}
