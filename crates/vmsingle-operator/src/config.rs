//! Operator-wide defaults, read once from the environment at startup.

use std::collections::BTreeMap;
use std::time::Duration;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::ReconcileError;
use crate::quantity::parse_quantity;

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceDefaults {
    pub mem: Quantity,
    pub cpu: Quantity,
}

/// Values filled into a VMSingle when it leaves them unset.
#[derive(Debug, Clone, PartialEq)]
pub struct OperatorDefaults {
    pub image: String,
    pub version: String,
    pub port: u16,
    pub limits: ResourceDefaults,
    pub requests: ResourceDefaults,
    /// Added to every generated object; CR-derived labels take precedence.
    pub labels: BTreeMap<String, String>,
}

impl Default for OperatorDefaults {
    fn default() -> Self {
        Self {
            image: "victoriametrics/victoria-metrics".into(),
            version: "v1.40.0".into(),
            port: 8428,
            limits: ResourceDefaults {
                mem: Quantity("1500Mi".into()),
                cpu: Quantity("1200m".into()),
            },
            requests: ResourceDefaults {
                mem: Quantity("500Mi".into()),
                cpu: Quantity("150m".into()),
            },
            labels: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub defaults: OperatorDefaults,
    /// Restrict watches to one namespace
    pub watch_namespace: Option<String>,
    /// Upper bound for a single object-store call
    pub store_timeout: Duration,
}

impl OperatorConfig {
    pub fn from_env() -> Result<Self, ReconcileError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup and validates every default.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ReconcileError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base = OperatorDefaults::default();
        let get = |key: &str, fallback: &str| lookup(key).unwrap_or_else(|| fallback.to_string());

        let port_raw = get("VM_VMSINGLEDEFAULT_PORT", &base.port.to_string());
        let port = port_raw
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| invalid("VM_VMSINGLEDEFAULT_PORT", &port_raw, "not a valid port"))?;

        let defaults = OperatorDefaults {
            image: get("VM_VMSINGLEDEFAULT_IMAGE", &base.image),
            version: get("VM_VMSINGLEDEFAULT_VERSION", &base.version),
            port,
            limits: ResourceDefaults {
                mem: quantity(&lookup, "VM_VMSINGLEDEFAULT_RESOURCE_LIMIT_MEM", &base.limits.mem)?,
                cpu: quantity(&lookup, "VM_VMSINGLEDEFAULT_RESOURCE_LIMIT_CPU", &base.limits.cpu)?,
            },
            requests: ResourceDefaults {
                mem: quantity(
                    &lookup,
                    "VM_VMSINGLEDEFAULT_RESOURCE_REQUEST_MEM",
                    &base.requests.mem,
                )?,
                cpu: quantity(
                    &lookup,
                    "VM_VMSINGLEDEFAULT_RESOURCE_REQUEST_CPU",
                    &base.requests.cpu,
                )?,
            },
            labels: match lookup("VM_LABELS") {
                Some(raw) => parse_labels(&raw)?,
                None => BTreeMap::new(),
            },
        };
        if defaults.image.is_empty() {
            return Err(invalid("VM_VMSINGLEDEFAULT_IMAGE", "", "must not be empty"));
        }

        let timeout_raw = get("VM_RECONCILE_TIMEOUT_SECS", "30");
        let store_timeout = timeout_raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|e| invalid("VM_RECONCILE_TIMEOUT_SECS", &timeout_raw, &e.to_string()))?;

        Ok(Self {
            defaults,
            watch_namespace: lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty()),
            store_timeout,
        })
    }
}

fn invalid(key: &str, value: &str, message: &str) -> ReconcileError {
    ReconcileError::ValidationDefault {
        key: key.to_string(),
        value: value.to_string(),
        message: message.to_string(),
    }
}

fn quantity<F>(lookup: &F, key: &str, fallback: &Quantity) -> Result<Quantity, ReconcileError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => parse_quantity(&raw).map_err(|message| invalid(key, &raw, message)),
        None => Ok(fallback.clone()),
    }
}

fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>, ReconcileError> {
    raw.split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.trim().to_string())),
            _ => Err(invalid("VM_LABELS", raw, "expected key=value pairs")),
        })
        .collect()
}

#[cfg(test)]
mod tests_config {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_yields_builtin_defaults() {
        let cfg = OperatorConfig::from_lookup(env(&[])).unwrap();
        assert_eq!(cfg.defaults, OperatorDefaults::default());
        assert_eq!(cfg.watch_namespace, None);
        assert_eq!(cfg.store_timeout, Duration::from_secs(30));
    }

    #[test]
    fn overrides_and_labels_are_read() {
        let cfg = OperatorConfig::from_lookup(env(&[
            ("VM_VMSINGLEDEFAULT_VERSION", "v1.50.0"),
            ("VM_VMSINGLEDEFAULT_RESOURCE_LIMIT_MEM", "2Gi"),
            ("VM_LABELS", "env=prod, team=obs"),
            ("WATCH_NAMESPACE", "monitoring"),
        ]))
        .unwrap();
        assert_eq!(cfg.defaults.version, "v1.50.0");
        assert_eq!(cfg.defaults.limits.mem, Quantity("2Gi".into()));
        assert_eq!(cfg.defaults.labels["team"], "obs");
        assert_eq!(cfg.watch_namespace.as_deref(), Some("monitoring"));
    }

    #[test]
    fn bad_defaults_are_fatal() {
        for (key, value) in [
            ("VM_VMSINGLEDEFAULT_PORT", "http"),
            ("VM_VMSINGLEDEFAULT_RESOURCE_REQUEST_CPU", "lots"),
            ("VM_VMSINGLEDEFAULT_RESOURCE_LIMIT_MEM", "1.5.5Gi"),
            ("VM_LABELS", "novalue"),
        ] {
            let err = OperatorConfig::from_lookup(env(&[(key, value)])).unwrap_err();
            assert!(!err.is_retryable(), "{key} should be fatal");
            assert!(err.to_string().contains(key));
        }
    }
}
