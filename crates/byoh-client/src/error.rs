//! Object store errors

use thiserror::Error;

/// Errors returned by [`crate::ObjectStore`] and [`crate::WorkloadClusterClient`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// Object does not exist; renders as `byohosts "host-1" not found`
    #[error("{resource} \"{name}\" not found")]
    NotFound { resource: String, name: String },

    /// Write carried a stale resourceVersion
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Create of an object that already exists
    #[error("AlreadyExists: {0}")]
    AlreadyExists(String),

    /// Any other Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (bad selector, unreadable kubeconfig, ...)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl StoreError {
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}

/// Maps API status codes onto the typed variants.
pub(crate) fn from_kube(err: kube::Error, resource: &str, name: &str) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound {
            resource: resource.to_string(),
            name: name.to_string(),
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(ae.message)
        }
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
        other => StoreError::Kube(other),
    }
}
