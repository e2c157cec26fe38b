use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("{kind} {namespace}/{name} already exists")]
    AlreadyExists {
        kind: String,
        namespace: String,
        name: String,
    },
    #[error("conflict updating {kind} {namespace}/{name}: {message}")]
    Conflict {
        kind: String,
        namespace: String,
        name: String,
        message: String,
    },
    #[error("cannot parse label selector: {0}")]
    SelectorParse(String),
    #[error("container override {0:?} does not match any operator-managed container")]
    UnknownContainerOverride(String),
    #[error("object store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("invalid operator default {key}={value:?}: {message}")]
    ValidationDefault {
        key: String,
        value: String,
        message: String,
    },
    #[error("invalid object name {name:?}: {message}")]
    InvalidName {
        name: String,
        message: String,
    },
    #[error("reconciliation cancelled")]
    Cancelled,
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

impl ReconcileError {
    /// Classifies a kube client error for the object `kind` at `namespace/name`.
    pub fn from_kube(err: kube::Error, kind: &str, namespace: &str, name: &str) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => ReconcileError::NotFound {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                ReconcileError::AlreadyExists {
                    kind: kind.to_string(),
                    namespace: namespace.to_string(),
                    name: name.to_string(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => ReconcileError::Conflict {
                kind: kind.to_string(),
                namespace: namespace.to_string(),
                name: name.to_string(),
                message: ae.message,
            },
            other => ReconcileError::StoreUnavailable(other.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ReconcileError::NotFound { .. })
    }

    /// Whether another pass can fix this error. A broken operator default or
    /// an unusable CR name cannot.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ReconcileError::ValidationDefault { .. } | ReconcileError::InvalidName { .. }
        )
    }

    /// Stable reason string written into `VMSingleStatus`.
    pub fn reason(&self) -> &'static str {
        match self {
            ReconcileError::NotFound { .. } => "NotFound",
            ReconcileError::AlreadyExists { .. } => "AlreadyExists",
            ReconcileError::Conflict { .. } => "Conflict",
            ReconcileError::SelectorParse(_) => "SelectorParseError",
            ReconcileError::UnknownContainerOverride(_) => "UnknownContainerOverride",
            ReconcileError::StoreUnavailable(_) => "StoreUnavailable",
            ReconcileError::ValidationDefault { .. } => "InvalidOperatorDefault",
            ReconcileError::InvalidName { .. } => "InvalidName",
            ReconcileError::Cancelled => "Cancelled",
            ReconcileError::Serialization(_) => "SerializationError",
        }
    }
}
