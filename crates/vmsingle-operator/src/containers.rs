use k8s_openapi::api::core::v1::Container;
use serde_json::Value;

use crate::error::ReconcileError;

/// Patches operator-generated containers with user-supplied fragments matched by name.
///
/// Fields set in a fragment replace the base field, nested objects are merged
/// key by key, lists are replaced wholesale. A fragment naming a container that
/// is not in `base` is rejected; new sidecars go through their own list.
/// The result keeps the order of `base`.
pub fn merge_patch_containers(
    base: Vec<Container>,
    overrides: &[Container],
) -> Result<Vec<Container>, ReconcileError> {
    if let Some(unknown) = overrides
        .iter()
        .find(|o| !base.iter().any(|b| b.name == o.name))
    {
        return Err(ReconcileError::UnknownContainerOverride(unknown.name.clone()));
    }
    if overrides.is_empty() {
        return Ok(base);
    }

    base.into_iter()
        .map(|container| {
            let mut patches = overrides.iter().filter(|o| o.name == container.name).peekable();
            if patches.peek().is_none() {
                return Ok(container);
            }
            let mut merged = serde_json::to_value(&container)?;
            for patch in patches {
                merge_value(&mut merged, serde_json::to_value(patch)?);
            }
            Ok(serde_json::from_value(merged)?)
        })
        .collect()
}

fn merge_value(target: &mut Value, patch: Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                let nested = value.is_object() && target.get(&key).is_some_and(Value::is_object);
                match target.get_mut(&key) {
                    Some(existing) if nested => merge_value(existing, value),
                    _ => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (target, patch) => *target = patch,
    }
}

#[cfg(test)]
mod tests_containers {
    use super::*;
    use k8s_openapi::api::core::v1::{EnvVar, ResourceRequirements};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn base() -> Vec<Container> {
        vec![
            Container {
                name: "vmsingle".into(),
                image: Some("victoriametrics/victoria-metrics:v1.40.0".into()),
                args: Some(vec!["-retentionPeriod=1".into()]),
                resources: Some(ResourceRequirements {
                    limits: Some(BTreeMap::from([
                        ("cpu".to_string(), Quantity("1200m".into())),
                        ("memory".to_string(), Quantity("1500Mi".into())),
                    ])),
                    ..Default::default()
                }),
                ..Default::default()
            },
            Container {
                name: "config-reloader".into(),
                image: Some("reloader:1".into()),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn empty_overrides_return_base() {
        assert_eq!(merge_patch_containers(base(), &[]).unwrap(), base());
    }

    #[test]
    fn set_fields_win_and_unset_fields_are_kept() {
        let patch = Container {
            name: "vmsingle".into(),
            image: Some("custom/vm:v2".into()),
            env: Some(vec![EnvVar {
                name: "GOMAXPROCS".into(),
                value: Some("2".into()),
                ..Default::default()
            }]),
            ..Default::default()
        };
        let merged = merge_patch_containers(base(), &[patch]).unwrap();
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].image.as_deref(), Some("custom/vm:v2"));
        assert_eq!(merged[0].env.as_ref().unwrap()[0].name, "GOMAXPROCS");
        assert_eq!(merged[0].args, base()[0].args);
        assert_eq!(merged[0].resources, base()[0].resources);
        assert_eq!(merged[1], base()[1]);
    }

    #[test]
    fn nested_maps_merge_by_key() {
        let patch = Container {
            name: "vmsingle".into(),
            resources: Some(ResourceRequirements {
                limits: Some(BTreeMap::from([(
                    "memory".to_string(),
                    Quantity("4Gi".into()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        };
        let merged = merge_patch_containers(base(), &[patch]).unwrap();
        let limits = merged[0]
            .resources
            .as_ref()
            .unwrap()
            .limits
            .as_ref()
            .unwrap()
            .clone();
        assert_eq!(limits["memory"], Quantity("4Gi".into()));
        assert_eq!(limits["cpu"], Quantity("1200m".into()));
    }

    #[test]
    fn unknown_override_is_rejected() {
        let patch = Container {
            name: "sidecar".into(),
            ..Default::default()
        };
        match merge_patch_containers(base(), &[patch]) {
            Err(ReconcileError::UnknownContainerOverride(name)) => assert_eq!(name, "sidecar"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn order_follows_base() {
        let patches = [
            Container {
                name: "config-reloader".into(),
                image: Some("reloader:2".into()),
                ..Default::default()
            },
            Container {
                name: "vmsingle".into(),
                image: Some("vm:3".into()),
                ..Default::default()
            },
        ];
        let merged = merge_patch_containers(base(), &patches).unwrap();
        let names: Vec<_> = merged.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["vmsingle", "config-reloader"]);
        assert_eq!(merged, merge_patch_containers(base(), &patches).unwrap());
    }
}
