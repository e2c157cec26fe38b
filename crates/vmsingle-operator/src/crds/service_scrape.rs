use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Describes a set of Services to scrape. Selected by VMSingle objects, never owned by them.
#[derive(CustomResource, Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[kube(
    group = "operator.victoriametrics.com",
    version = "v1beta1",
    kind = "VMServiceScrape",
    plural = "vmservicescrapes",
    namespaced,
    shortname = "vmss"
)]
#[serde(rename_all = "camelCase")]
pub struct VMServiceScrapeSpec {
    /// Service label that becomes the `job` label of scraped series
    pub job_label: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
    /// Services to scrape
    pub selector: LabelSelector,
    /// Namespaces to look for Services in
    pub namespace_selector: Option<NamespaceSelector>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    /// Named service port
    pub port: Option<String>,
    pub path: Option<String>,
    pub scheme: Option<String>,
    /// Scrape interval, e.g. "30s"
    pub interval: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceSelector {
    #[serde(default)]
    pub any: bool,
    #[serde(default)]
    pub match_names: Vec<String>,
}
