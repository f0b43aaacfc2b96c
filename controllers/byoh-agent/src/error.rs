//! Agent-specific error types.

use byoh_client::StoreError;
use kube::Error as KubeError;
use thiserror::Error;

use crate::cloudinit::CloudInitError;
use crate::runtime::RuntimeError;

/// Errors that can occur in the host agent.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Object store error
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Script or command execution error
    #[error("{0}")]
    CloudInit(#[from] CloudInitError),

    /// Container runtime error
    #[error("{0}")]
    Runtime(#[from] RuntimeError),

    /// Secret is missing the expected key or is unreadable
    #[error("{0}")]
    Secret(String),

    /// Bootstrap script failed; `reset` holds the error of the node reset run
    /// afterwards, when that failed too
    #[error("{source}{}", reset_suffix(.reset))]
    BootstrapFailed {
        source: CloudInitError,
        reset: Option<Box<AgentError>>,
    },

    /// Node reset failed
    #[error("{0}")]
    Reset(String),

    /// No uninstall script could be resolved for the host
    #[error("UninstallationScript not found in Byohost {0}: installation secret reference is nil")]
    UninstallScriptNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

fn reset_suffix(reset: &Option<Box<AgentError>>) -> String {
    match reset {
        Some(e) => format!("; node reset failed: {}", e),
        None => String::new(),
    }
}
