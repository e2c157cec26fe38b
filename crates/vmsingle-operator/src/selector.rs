//! Decides whether a VMSingle selects a scrape-target object.
//!
//! The checks run cheapest first; the label selector is only parsed when the
//! namespace gate alone cannot decide.

use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{Selector, SelectorExt};

use crate::error::ReconcileError;

/// Label and namespace selectors of a selecting object. Either may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectorDescriptor {
    pub label_selector: Option<LabelSelector>,
    pub namespace_selector: Option<LabelSelector>,
}

/// Returns whether `selector`, owned by an object in `selector_namespace`,
/// selects a candidate with the given namespace and labels.
///
/// Both selectors absent means the parent manages its scrape config by hand
/// and never matches. A missing namespace selector restricts matching to the
/// parent's own namespace. A missing label selector with a namespace selector
/// present matches every candidate that passes the namespace gate.
pub fn matches(
    selector: &SelectorDescriptor,
    candidate_namespace: &str,
    candidate_labels: &BTreeMap<String, String>,
    selector_namespace: &str,
) -> Result<bool, ReconcileError> {
    if selector.label_selector.is_none() && selector.namespace_selector.is_none() {
        return Ok(false);
    }
    if selector.namespace_selector.is_none() && candidate_namespace != selector_namespace {
        return Ok(false);
    }
    let Some(label_selector) = selector.label_selector.as_ref() else {
        return Ok(true);
    };
    let parsed = Selector::try_from(label_selector.clone())
        .map_err(|e| ReconcileError::SelectorParse(e.to_string()))?;
    Ok(parsed.matches(candidate_labels))
}

#[cfg(test)]
mod tests_selector {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn match_labels(pairs: &[(&str, &str)]) -> LabelSelector {
        LabelSelector {
            match_labels: Some(labels(pairs)),
            ..Default::default()
        }
    }

    #[test]
    fn no_selectors_never_match() {
        let sel = SelectorDescriptor::default();
        for ns in ["ns1", "ns2"] {
            assert!(!matches(&sel, ns, &labels(&[("team", "x")]), "ns1").unwrap());
            assert!(!matches(&sel, ns, &BTreeMap::new(), "ns1").unwrap());
        }
    }

    #[test]
    fn other_namespace_rejected_without_namespace_selector() {
        let sel = SelectorDescriptor {
            label_selector: Some(match_labels(&[("team", "x")])),
            namespace_selector: None,
        };
        assert!(!matches(&sel, "ns2", &labels(&[("team", "x")]), "ns1").unwrap());
        assert!(matches(&sel, "ns1", &labels(&[("team", "x")]), "ns1").unwrap());
    }

    #[test]
    fn namespace_gate_is_checked_before_parsing() {
        // a malformed selector is never parsed when the namespace already excludes the candidate
        let sel = SelectorDescriptor {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "team".into(),
                    operator: "Bogus".into(),
                    values: None,
                }]),
                ..Default::default()
            }),
            namespace_selector: None,
        };
        assert!(!matches(&sel, "ns2", &BTreeMap::new(), "ns1").unwrap());
        assert!(matches!(
            matches(&sel, "ns1", &BTreeMap::new(), "ns1"),
            Err(ReconcileError::SelectorParse(_))
        ));
    }

    #[test]
    fn namespace_selector_alone_matches_any_labels() {
        let sel = SelectorDescriptor {
            label_selector: None,
            namespace_selector: Some(LabelSelector::default()),
        };
        assert!(matches(&sel, "other", &BTreeMap::new(), "ns1").unwrap());
        assert!(matches(&sel, "ns1", &labels(&[("a", "b")]), "ns1").unwrap());
    }

    #[test]
    fn label_selector_is_evaluated_across_namespaces() {
        let sel = SelectorDescriptor {
            label_selector: Some(LabelSelector {
                match_expressions: Some(vec![LabelSelectorRequirement {
                    key: "team".into(),
                    operator: "In".into(),
                    values: Some(vec!["x".into(), "y".into()]),
                }]),
                ..Default::default()
            }),
            namespace_selector: Some(LabelSelector::default()),
        };
        assert!(matches(&sel, "ns9", &labels(&[("team", "y")]), "ns1").unwrap());
        assert!(!matches(&sel, "ns9", &labels(&[("team", "z")]), "ns1").unwrap());
    }
}
