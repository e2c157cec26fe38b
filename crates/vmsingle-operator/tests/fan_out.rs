mod common;

use std::sync::Arc;

use common::{labels, vmsingle};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use kube::core::ObjectMeta;
use vmsingle_operator::{
    config::OperatorDefaults,
    crds::{
        service_scrape::{VMServiceScrape, VMServiceScrapeSpec},
        vmsingle::{VMSingle, VMSingleSpec},
    },
    dispatch::{dispatch_on_scrape_target_change, select_parents},
    error::ReconcileError,
    reconcile::Reconciler,
    store::MemoryStore,
};

fn scrape(namespace: &str, name: &str, pairs: &[(&str, &str)]) -> VMServiceScrape {
    let mut obj = VMServiceScrape::new(name, VMServiceScrapeSpec::default());
    obj.metadata = ObjectMeta {
        name: Some(name.into()),
        namespace: Some(namespace.into()),
        labels: Some(labels(pairs)),
        ..Default::default()
    };
    obj
}

fn selecting(namespace: &str, name: &str, selector: LabelSelector) -> Arc<VMSingle> {
    Arc::new(vmsingle(
        namespace,
        name,
        VMSingleSpec {
            retention_period: "1".into(),
            service_scrape_selector: Some(selector),
            ..Default::default()
        },
    ))
}

fn match_labels(pairs: &[(&str, &str)]) -> LabelSelector {
    LabelSelector {
        match_labels: Some(labels(pairs)),
        ..Default::default()
    }
}

#[tokio::test]
async fn change_reconciles_only_matching_parents() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(store.clone());
    let parents = vec![
        selecting("ns1", "p", match_labels(&[("app", "web")])),
        selecting("ns2", "q", match_labels(&[("app", "web")])),
    ];
    let changed = scrape("ns1", "web", &[("app", "web")]);

    let errors = dispatch_on_scrape_target_change(
        &reconciler,
        &OperatorDefaults::default(),
        &changed,
        &parents,
    )
    .await;
    assert!(errors.is_empty());
    assert!(store.object::<Deployment>("ns1", "vmsingle-p").is_some());
    assert!(store.object::<Deployment>("ns2", "vmsingle-q").is_none());
    assert!(store.mutations().iter().all(|c| c.namespace == "ns1"));
}

#[test]
fn namespace_selector_opens_other_namespaces() {
    let mut any_ns = vmsingle(
        "ns2",
        "q",
        VMSingleSpec {
            retention_period: "1".into(),
            service_scrape_namespace_selector: Some(LabelSelector::default()),
            ..Default::default()
        },
    );
    any_ns.spec.service_scrape_selector = None;
    let parents = vec![Arc::new(any_ns)];
    let (matched, errors) = select_parents(&scrape("ns1", "web", &[]), &parents);
    assert_eq!(matched.len(), 1);
    assert!(errors.is_empty());
}

#[tokio::test]
async fn malformed_selector_is_isolated_to_its_parent() {
    let store = MemoryStore::new();
    let reconciler = Reconciler::new(store.clone());
    let broken = LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: "app".into(),
            operator: "Around".into(),
            values: Some(vec!["web".into()]),
        }]),
        ..Default::default()
    };
    let parents = vec![
        selecting("ns1", "broken", broken),
        selecting("ns1", "p", match_labels(&[("app", "web")])),
    ];
    let changed = scrape("ns1", "web", &[("app", "web")]);

    let errors = dispatch_on_scrape_target_change(
        &reconciler,
        &OperatorDefaults::default(),
        &changed,
        &parents,
    )
    .await;
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], ReconcileError::SelectorParse(_)));
    assert!(store.object::<Deployment>("ns1", "vmsingle-p").is_some());
    assert!(store.object::<Deployment>("ns1", "vmsingle-broken").is_none());
}

#[test]
fn deleting_parent_is_skipped() {
    let mut p = vmsingle(
        "ns1",
        "p",
        VMSingleSpec {
            retention_period: "1".into(),
            service_scrape_selector: Some(match_labels(&[("app", "web")])),
            ..Default::default()
        },
    );
    p.metadata.deletion_timestamp =
        serde_json::from_value(serde_json::json!("2026-01-01T00:00:00Z")).unwrap();
    let (matched, _) = select_parents(&scrape("ns1", "web", &[("app", "web")]), &[Arc::new(p)]);
    assert!(matched.is_empty());
}
