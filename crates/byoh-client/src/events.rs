//! Kubernetes Event recording for BYOH controllers and the host agent.
//!
//! Events are fire-and-forget: failures are logged as warnings and never
//! propagate. A failed event must never break reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

/// Publishes Kubernetes Events on objects.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// * `resource_ref` - object the event is about
    /// * `type_` - Normal or Warning
    /// * `reason` - machine-readable reason, see [`reasons`]
    /// * `note` - human-readable message
    async fn publish(&self, resource_ref: &ObjectReference, type_: EventType, reason: &str, note: Option<String>);

    async fn normal(&self, resource_ref: &ObjectReference, reason: &str, note: String) {
        self.publish(resource_ref, EventType::Normal, reason, Some(note)).await;
    }

    async fn warning(&self, resource_ref: &ObjectReference, reason: &str, note: String) {
        self.publish(resource_ref, EventType::Warning, reason, Some(note)).await;
    }
}

/// Production implementation wrapping `kube::runtime::events::Recorder`.
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    /// `controller_name` is the reporting component, e.g. "byoh-manager".
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(&self, resource_ref: &ObjectReference, type_: EventType, reason: &str, note: Option<String>) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: "Reconcile".to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, error = %e, "Failed to publish Kubernetes event");
        }
    }
}

/// Drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _resource_ref: &ObjectReference, _type_: EventType, _reason: &str, _note: Option<String>) {}
}

/// Event reasons, as shown in the REASON column of `kubectl get events`.
pub mod reasons {
    // Machine controller
    pub const BYO_HOST_ATTACH_SUCCEEDED: &str = "ByoHostAttachSucceeded";
    pub const BYO_HOST_RELEASE_SUCCEEDED: &str = "ByoHostReleaseSucceeded";
    pub const BYO_HOST_SELECTION_FAILED: &str = "ByoHostSelectionFailed";
    pub const SET_NODE_PROVIDER_FAILED: &str = "SetNodeProviderFailed";
    pub const NODE_PROVISIONED_SUCCEEDED: &str = "NodeProvisionedSucceeded";

    // Host agent
    pub const READ_BOOTSTRAP_SECRET_FAILED: &str = "ReadBootstrapSecretFailed";
    pub const READ_INSTALLATION_SECRET_FAILED: &str = "ReadInstallationSecretFailed";
    pub const INSTALL_SCRIPT_EXECUTION_FAILED: &str = "InstallScriptExecutionFailed";
    pub const INSTALL_SCRIPT_EXECUTION_SUCCEEDED: &str = "InstallScriptExecutionSucceeded";
    pub const UNINSTALL_SCRIPT_EXECUTION_FAILED: &str = "UninstallScriptExecutionFailed";
    pub const BOOTSTRAP_K8S_NODE_FAILED: &str = "BootstrapK8sNodeFailed";
    pub const BOOTSTRAP_K8S_NODE_SUCCEEDED: &str = "BootstrapK8sNodeSucceeded";
    pub const RESET_K8S_NODE_FAILED: &str = "ResetK8sNodeFailed";
    pub const RESET_K8S_NODE_SUCCEEDED: &str = "ResetK8sNodeSucceeded";
}
