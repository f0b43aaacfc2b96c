//! Controller-specific error types.
//!
//! This module defines error types specific to the BYOH manager that are not
//! covered by upstream library errors.

use byoh_client::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

use crate::installer::InstallerError;

/// Errors that can occur in the BYOH manager.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error
    #[error("{0}")]
    Store(#[from] StoreError),

    /// No installer for the host platform
    #[error("{0}")]
    Installer(#[from] InstallerError),

    /// The owning Cluster could not be read
    #[error("failed to get Cluster/{name}: {source}")]
    ClusterFetch { name: String, source: StoreError },

    /// No unclaimed ByoHost matches the machine's selector
    #[error("no hosts found")]
    NoHostsFound,

    /// Node already carries a provider id of another host
    #[error("invalid format for node.Spec.ProviderID")]
    InvalidProviderId,

    /// Ready installer config without a secret reference
    #[error("installation secret not set on ready installerconfig K8sInstallerConfig {0}")]
    InstallationSecretNotSet(String),

    /// Installation secret could not be written
    #[error("failed to create/update installation secret for K8sInstallerConfig {namespace}/{name}: {source}")]
    InstallationSecretWrite {
        namespace: String,
        name: String,
        source: StoreError,
    },

    /// BootstrapKubeconfig spec failed validation
    #[error("invalid BootstrapKubeconfig {namespace}/{name}: {reasons}")]
    InvalidBootstrapKubeconfig {
        namespace: String,
        name: String,
        reasons: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Leader election failed or leadership was lost
    #[error("Leader election failed: {0}")]
    LeaderElection(String),

    /// Metrics or probe server failed
    #[error("Metrics server failed: {0}")]
    Metrics(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}
