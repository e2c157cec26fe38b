//! Desired state of the objects owned by a VMSingle.
//!
//! Everything here is pure: the same CR and defaults always produce equal
//! objects, and the CR itself is only borrowed.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, HTTPGetAction,
    PersistentVolumeClaim, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecretVolumeSource, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{ResourceExt, core::ObjectMeta};
use regex::Regex;
use std::sync::LazyLock;

use crate::{
    config::OperatorDefaults,
    containers::merge_patch_containers,
    crds::vmsingle::{Storage, VMSingle},
    error::ReconcileError,
};

pub const SECRETS_DIR: &str = "/etc/vm/secrets";
pub const CONFIG_MAPS_DIR: &str = "/etc/vm/configs";
pub const DATA_DIR: &str = "/victoria-metrics-data";
pub const DATA_VOLUME: &str = "data";
pub const HEALTH_PATH: &str = "/health";
pub const CONTAINER_NAME: &str = "vmsingle";

const PROBE_PERIOD_SECONDS: i32 = 5;
const PROBE_TIMEOUT_SECONDS: i32 = 5;
const LIVENESS_FAILURE_THRESHOLD: i32 = 3;
const READINESS_FAILURE_THRESHOLD: i32 = 10;
const MAX_VOLUME_NAME_LEN: usize = 63;
/// Service names are DNS-1035 labels; the same name is used for every child.
pub const MAX_CHILD_NAME_LEN: usize = 63;

static INVALID_VOLUME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^-a-z0-9]+").expect("volume name regex is valid"));

/// Claim for the data directory, or `None` when the CR asks for ephemeral storage.
///
/// The storage spec is copied verbatim; its size is never defaulted.
pub fn build_pvc(cr: &VMSingle, defaults: &OperatorDefaults) -> Option<PersistentVolumeClaim> {
    let Storage::Persistent(spec) = cr.storage() else {
        return None;
    };
    Some(PersistentVolumeClaim {
        metadata: child_meta(cr, defaults, cr.spec.remove_pvc_after_delete),
        spec: Some(spec),
        ..Default::default()
    })
}

pub fn build_service(cr: &VMSingle, defaults: &OperatorDefaults) -> Service {
    let port = i32::from(cr.spec.port.unwrap_or(defaults.port));
    Service {
        metadata: child_meta(cr, defaults, true),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            selector: Some(cr.selector_labels()),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                protocol: Some("TCP".into()),
                port,
                target_port: Some(IntOrString::Int(port)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Fails when the CR name is too long to name its children. The API server
/// would reject them on every pass.
pub fn check_child_name(cr: &VMSingle) -> Result<(), ReconcileError> {
    let name = cr.prefixed_name();
    if name.len() > MAX_CHILD_NAME_LEN {
        return Err(ReconcileError::InvalidName {
            message: format!(
                "child name is {} characters, at most {MAX_CHILD_NAME_LEN} are allowed",
                name.len()
            ),
            name,
        });
    }
    Ok(())
}

/// Deployment running the database. Fails when the CR name is too long or a
/// container override is invalid.
pub fn build_deployment(
    cr: &VMSingle,
    defaults: &OperatorDefaults,
) -> Result<Deployment, ReconcileError> {
    check_child_name(cr)?;
    Ok(Deployment {
        metadata: child_meta(cr, defaults, true),
        spec: Some(DeploymentSpec {
            replicas: cr.spec.replica_count,
            selector: LabelSelector {
                match_labels: Some(cr.selector_labels()),
                ..Default::default()
            },
            // the data volume is ReadWriteOnce, a rolling update would never get it attached
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".into()),
                rolling_update: None,
            }),
            template: build_pod_template(cr, defaults)?,
            ..Default::default()
        }),
        ..Default::default()
    })
}

fn child_meta(cr: &VMSingle, defaults: &OperatorDefaults, owned: bool) -> ObjectMeta {
    let mut labels = defaults.labels.clone();
    labels.extend(cr.final_labels());
    ObjectMeta {
        name: Some(cr.prefixed_name()),
        namespace: cr.namespace(),
        labels: Some(labels),
        annotations: non_empty(cr.child_annotations()),
        owner_references: owned.then(|| vec![cr.as_owner()]),
        ..Default::default()
    }
}

fn non_empty(map: BTreeMap<String, String>) -> Option<BTreeMap<String, String>> {
    (!map.is_empty()).then_some(map)
}

fn resources_with_defaults(cr: &VMSingle, defaults: &OperatorDefaults) -> ResourceRequirements {
    let mut resources = cr.spec.resources.clone().unwrap_or_default();
    let limits = resources.limits.get_or_insert_with(BTreeMap::new);
    limits
        .entry("memory".into())
        .or_insert_with(|| defaults.limits.mem.clone());
    limits
        .entry("cpu".into())
        .or_insert_with(|| defaults.limits.cpu.clone());
    let requests = resources.requests.get_or_insert_with(BTreeMap::new);
    requests
        .entry("memory".into())
        .or_insert_with(|| defaults.requests.mem.clone());
    requests
        .entry("cpu".into())
        .or_insert_with(|| defaults.requests.cpu.clone());
    resources
}

fn build_args(cr: &VMSingle, port: u16) -> Vec<String> {
    let mut args = vec![
        format!("-storageDataPath={DATA_DIR}"),
        format!("-retentionPeriod={}", cr.spec.retention_period),
    ];
    if let Some(level) = cr.spec.log_level.as_deref().filter(|l| !l.is_empty()) {
        args.push(format!("-loggerLevel={level}"));
    }
    if let Some(format) = cr.spec.log_format.as_deref().filter(|f| !f.is_empty()) {
        args.push(format!("-loggerFormat={format}"));
    }
    args.extend(
        cr.spec
            .extra_args
            .iter()
            .map(|(arg, value)| format!("--{arg}={value}")),
    );
    args.push(format!("-httpListenAddr=:{port}"));
    args
}

fn health_probe(port: i32, failure_threshold: i32) -> Probe {
    Probe {
        http_get: Some(HTTPGetAction {
            path: Some(HEALTH_PATH.into()),
            port: IntOrString::Int(port),
            scheme: Some("HTTP".into()),
            ..Default::default()
        }),
        period_seconds: Some(PROBE_PERIOD_SECONDS),
        timeout_seconds: Some(PROBE_TIMEOUT_SECONDS),
        failure_threshold: Some(failure_threshold),
        ..Default::default()
    }
}

fn build_pod_template(
    cr: &VMSingle,
    defaults: &OperatorDefaults,
) -> Result<PodTemplateSpec, ReconcileError> {
    let spec = &cr.spec;
    let port = spec.port.unwrap_or(defaults.port);
    let image = format!(
        "{}:{}",
        spec.image.as_deref().unwrap_or(&defaults.image),
        spec.version.as_deref().unwrap_or(&defaults.version)
    );

    let data_volume = match cr.storage() {
        Storage::Ephemeral => Volume {
            name: DATA_VOLUME.into(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        },
        Storage::Persistent(_) => Volume {
            name: DATA_VOLUME.into(),
            persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                claim_name: cr.prefixed_name(),
                read_only: None,
            }),
            ..Default::default()
        },
    };
    let mut volumes = vec![data_volume];
    volumes.extend(spec.volumes.iter().cloned());

    let mut mounts = vec![VolumeMount {
        name: DATA_VOLUME.into(),
        mount_path: DATA_DIR.into(),
        ..Default::default()
    }];
    mounts.extend(spec.volume_mounts.iter().cloned());

    for secret in &spec.secrets {
        let name = sanitize_volume_name(&format!("secret-{secret}"));
        volumes.push(Volume {
            name: name.clone(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(secret.clone()),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name,
            read_only: Some(true),
            mount_path: format!("{SECRETS_DIR}/{secret}"),
            ..Default::default()
        });
    }
    for config_map in &spec.config_maps {
        let name = sanitize_volume_name(&format!("configmap-{config_map}"));
        volumes.push(Volume {
            name: name.clone(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(VolumeMount {
            name,
            read_only: Some(true),
            mount_path: format!("{CONFIG_MAPS_DIR}/{config_map}"),
            ..Default::default()
        });
    }

    let container_port = i32::from(port);
    let operator_containers = vec![Container {
        name: CONTAINER_NAME.into(),
        image: Some(image),
        args: Some(build_args(cr, port)),
        ports: Some(vec![ContainerPort {
            name: Some("http".into()),
            protocol: Some("TCP".into()),
            container_port,
            ..Default::default()
        }]),
        env: (!spec.extra_envs.is_empty()).then(|| spec.extra_envs.clone()),
        volume_mounts: Some(mounts),
        liveness_probe: Some(health_probe(container_port, LIVENESS_FAILURE_THRESHOLD)),
        readiness_probe: Some(health_probe(container_port, READINESS_FAILURE_THRESHOLD)),
        resources: Some(resources_with_defaults(cr, defaults)),
        termination_message_policy: Some("FallbackToLogsOnError".into()),
        ..Default::default()
    }];
    let containers = merge_patch_containers(operator_containers, &spec.containers)?;

    Ok(PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(cr.pod_labels()),
            annotations: non_empty(cr.pod_annotations()),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            volumes: Some(volumes),
            init_containers: (!spec.init_containers.is_empty())
                .then(|| spec.init_containers.clone()),
            containers,
            service_account_name: spec.service_account_name.clone(),
            security_context: spec.security_context.clone(),
            image_pull_secrets: (!spec.image_pull_secrets.is_empty())
                .then(|| spec.image_pull_secrets.clone()),
            affinity: spec.affinity.clone(),
            tolerations: (!spec.tolerations.is_empty()).then(|| spec.tolerations.clone()),
            priority_class_name: spec.priority_class_name.clone(),
            host_network: spec.host_network,
            dns_policy: spec.dns_policy.clone(),
            ..Default::default()
        }),
    })
}

/// Maps `name` onto a valid DNS-1123 label: lowercase, runs of other
/// characters collapsed to `-`, at most 63 characters, no leading or trailing `-`.
pub fn sanitize_volume_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let mut out = INVALID_VOLUME_CHARS.replace_all(&lowered, "-").into_owned();
    out.truncate(MAX_VOLUME_NAME_LEN);
    out.trim_matches('-').to_string()
}
