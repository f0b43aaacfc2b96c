//! Node reset and host release.

use byoh_client::events::reasons;
use crds::ByoHost;
use crds::conditions::{self, ConditionSeverity};
use crds::constants::{
    BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION, END_POINT_IP_ANNOTATION, HOST_CLEANUP_ANNOTATION, K8S_VERSION_ANNOTATION,
};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use tracing::{info, warn};

use super::HostReconciler;
use crate::error::AgentError;

const KUBELET_BINARY: &str = "/usr/bin/kubelet";

impl HostReconciler {
    /// Returns the host to the pool: resets the node, uninstalls k8s components
    /// and clears every trace of the previous claim.
    ///
    /// On failure the host is left as is, so the next pass retries the whole
    /// sequence.
    pub(crate) async fn cleanup(&self, host: &mut ByoHost) -> Result<Action, AgentError> {
        let name = host.name_any();
        let namespace = host.namespace().unwrap_or_default();
        let host_ref = host.object_ref(&());
        info!("Cleaning up ByoHost {}/{}", namespace, name);

        let install_failed = host
            .status
            .as_ref()
            .is_some_and(|s| conditions::is_false(s, conditions::K8S_COMPONENTS_INSTALLATION_SUCCEEDED));

        if install_failed {
            info!("Skipping node reset on ByoHost {}: k8s components were never installed", name);
        } else {
            if let Err(e) = self.reset_node().await {
                self.events
                    .warning(&host_ref, reasons::RESET_K8S_NODE_FAILED, "k8s Node Reset failed".to_string())
                    .await;
                return Err(e);
            }
            self.events
                .normal(&host_ref, reasons::RESET_K8S_NODE_SUCCEEDED, "k8s Node Reset completed".to_string())
                .await;

            if self.skip_k8s_installation {
                info!("Skipping uninstall on ByoHost {}", name);
            } else {
                let script = self.uninstall_script(host, &namespace).await?;
                info!("Running uninstall script on ByoHost {}", name);
                if let Err(e) = self.runner.run_cmd(&script).await {
                    self.events
                        .warning(
                            &host_ref,
                            reasons::UNINSTALL_SCRIPT_EXECUTION_FAILED,
                            "uninstall script execution failed".to_string(),
                        )
                        .await;
                    return Err(e.into());
                }
            }
        }

        release(host);
        info!("ByoHost {}/{} released", namespace, name);
        Ok(Action::await_change())
    }

    /// Uninstall script saved at install time, otherwise read from the
    /// installation secret.
    async fn uninstall_script(&self, host: &ByoHost, namespace: &str) -> Result<String, AgentError> {
        if let Some(script) = host.spec.uninstallation_script.as_ref().filter(|s| !s.is_empty()) {
            return Ok(script.clone());
        }
        match host.spec.installation_secret.as_ref() {
            Some(reference) => self.read_secret_key(reference, namespace, "uninstall").await,
            None => Err(AgentError::UninstallScriptNotFound(host.name_any())),
        }
    }

    /// Tears down whatever kubeadm set up on this host.
    pub(crate) async fn reset_node(&self) -> Result<(), AgentError> {
        info!("Running kubeadm reset");

        if let Err(e) = self.runner.run_cmd(&format!("rm -f {}", KUBELET_BINARY)).await {
            warn!("Failed to remove kubelet binary: {}", e);
        }

        if self.runner.run_cmd("systemctl is-active --quiet kubelet").await.is_ok() {
            self.runner
                .run_cmd("systemctl stop kubelet")
                .await
                .map_err(|e| AgentError::Reset(format!("failed to stop kubelet: {}", e)))?;
        }

        self.runner
            .run_cmd("kubeadm reset --force")
            .await
            .map_err(|e| AgentError::Reset(format!("failed to exec kubeadm reset: {}", e)))?;

        if let Err(e) = self.remove_leftover_pods().await {
            warn!("Failed to clean up pod sandboxes: {}", e);
        }

        info!("Kubernetes Node reset completed");
        Ok(())
    }

    async fn remove_leftover_pods(&self) -> Result<(), AgentError> {
        self.runtime.connect().await?;
        self.runtime.is_running().await?;
        let ids = self.runtime.list_kube_containers().await?;
        if ids.is_empty() {
            return Ok(());
        }
        self.runtime.remove_containers(&ids).await?;
        Ok(())
    }
}

/// Drops claim labels, annotations, secrets and markers; both conditions go
/// back to K8sNodeAbsent.
fn release(host: &mut ByoHost) {
    if let Some(labels) = host.metadata.labels.as_mut() {
        labels.remove(crds::constants::CLUSTER_NAME_LABEL);
        labels.remove(crds::constants::ATTACHED_BYO_MACHINE_LABEL);
    }
    if let Some(annotations) = host.metadata.annotations.as_mut() {
        for key in [
            HOST_CLEANUP_ANNOTATION,
            END_POINT_IP_ANNOTATION,
            K8S_VERSION_ANNOTATION,
            BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION,
        ] {
            annotations.remove(key);
        }
    }
    host.spec.bootstrap_secret = None;
    host.spec.installation_secret = None;
    host.spec.uninstallation_script = None;

    let status = host.status_mut();
    status.machine_ref = None;
    status.executed = Default::default();
    for type_ in [
        conditions::K8S_NODE_BOOTSTRAP_SUCCEEDED,
        conditions::K8S_COMPONENTS_INSTALLATION_SUCCEEDED,
    ] {
        conditions::mark_false(status, type_, conditions::K8S_NODE_ABSENT_REASON, ConditionSeverity::Info, "");
    }
}
