//! Container runtime access used while resetting a node.
//!
//! After `kubeadm reset` some pod sandboxes may survive; they are stopped and
//! removed through the CRI endpoint the host uses.

pub mod crictl;

pub use crictl::CrictlRuntime;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

/// Used when no known socket is found on the host.
pub const DEFAULT_CRI_SOCKET: &str = "unix:///var/run/containerd/containerd.sock";

/// Sockets checked by [`detect_cri_socket`], in order.
pub const KNOWN_CRI_SOCKETS: [&str; 3] = [
    "unix:///var/run/containerd/containerd.sock",
    "unix:///var/run/crio/crio.sock",
    "unix:///var/run/docker.sock",
];

/// Attempts per pod sandbox in [`ContainerRuntime::remove_containers`].
pub const REMOVE_CONTAINER_RETRY: usize = 5;

#[derive(Debug, Error)]
pub enum RuntimeError {
    /// More than one known CRI socket answers
    #[error(
        "found multiple CRI endpoints on the host. Please define which one do you wish to use by setting CRI_SOCKET: {0}"
    )]
    MultipleEndpoints(String),

    #[error("failed to connect to container runtime: {0}")]
    Connect(String),

    #[error("container runtime is not running: {0}")]
    NotRunning(String),

    #[error("failed to list pod sandboxes: {0}")]
    List(String),

    #[error("failed to stop running pod {id}: {reason}")]
    Stop { id: String, reason: String },

    #[error("failed to remove pod {id}: {reason}")]
    Remove { id: String, reason: String },

    /// One error per sandbox that could not be removed
    #[error("[{}]", join_errors(.0))]
    Aggregate(Vec<RuntimeError>),
}

fn join_errors(errors: &[RuntimeError]) -> String {
    errors.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
}

/// The CRI operations needed to clean up after kubeadm.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn connect(&self) -> Result<(), RuntimeError>;

    /// Fails when the runtime is down or reports RuntimeReady=false.
    async fn is_running(&self) -> Result<(), RuntimeError>;

    /// Ids of all pod sandboxes.
    async fn list_kube_containers(&self) -> Result<Vec<String>, RuntimeError>;

    async fn stop_pod_sandbox(&self, id: &str) -> Result<(), RuntimeError>;

    async fn remove_pod_sandbox(&self, id: &str) -> Result<(), RuntimeError>;

    /// Stops then removes each sandbox, retrying up to [`REMOVE_CONTAINER_RETRY`]
    /// times. Failures are collected and returned together.
    async fn remove_containers(&self, ids: &[String]) -> Result<(), RuntimeError> {
        let mut errors = Vec::new();
        for id in ids {
            let mut last_err = None;
            for _ in 0..REMOVE_CONTAINER_RETRY {
                info!("Attempting to remove container {}", id);
                if let Err(e) = self.stop_pod_sandbox(id).await {
                    last_err = Some(e);
                    continue;
                }
                info!("Successfully stopped container {}", id);
                if let Err(e) = self.remove_pod_sandbox(id).await {
                    last_err = Some(e);
                    continue;
                }
                info!("Successfully removed container {}", id);
                last_err = None;
                break;
            }
            errors.extend(last_err);
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(RuntimeError::Aggregate(errors))
        }
    }
}

/// Picks the CRI socket among `known` for which `is_socket` holds.
///
/// None found falls back to [`DEFAULT_CRI_SOCKET`]; several found is an error.
pub fn detect_cri_socket(is_socket: impl Fn(&str) -> bool, known: &[&str]) -> Result<String, RuntimeError> {
    let found: Vec<&str> = known.iter().copied().filter(|s| is_socket(s)).collect();
    match found.as_slice() {
        [] => Ok(DEFAULT_CRI_SOCKET.to_string()),
        [one] => Ok((*one).to_string()),
        many => Err(RuntimeError::MultipleEndpoints(many.join(", "))),
    }
}

/// True when `endpoint` (`unix://` URL or plain path) accepts connections.
pub fn is_existing_socket(endpoint: &str) -> bool {
    let path = endpoint.strip_prefix("unix://").unwrap_or(endpoint);
    std::os::unix::net::UnixStream::connect(path).is_ok()
}

/// Detects the CRI socket of this host.
pub fn detect_host_cri_socket() -> Result<String, RuntimeError> {
    detect_cri_socket(is_existing_socket, &KNOWN_CRI_SOCKETS)
}
