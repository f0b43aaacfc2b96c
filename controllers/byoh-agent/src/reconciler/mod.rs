//! ByoHost reconciliation on the host itself.
//!
//! Drives the host through install, bootstrap and cleanup. Each script runs at
//! most once per secret, tracked by `status.executed`. The host object is
//! written back after every pass, including failed ones, so conditions set on
//! the way are never lost. Scripts can run for minutes; the write-back is
//! rebased onto the latest host when another writer got there first, so the
//! execution markers survive the Conflict.

mod cleanup;


use std::sync::Arc;

use byoh_client::{EventPublisher, ObjectStore, persist_rebased};
use byoh_client::events::reasons;
use crds::conditions::{self, ConditionSeverity};
use crds::constants::HOST_CLEANUP_ANNOTATION;
use crds::references::name_and_namespace;
use crds::ByoHost;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use tracing::{debug, error, info};

use crate::cloudinit::{CommandRunner, ScriptExecutor};
use crate::error::AgentError;
use crate::runtime::ContainerRuntime;

/// External collaborators of the [`HostReconciler`].
pub struct Collaborators {
    pub hosts: Arc<dyn ObjectStore<ByoHost>>,
    pub secrets: Arc<dyn ObjectStore<Secret>>,
    pub events: Arc<dyn EventPublisher>,
    pub runner: Arc<dyn CommandRunner>,
    pub executor: ScriptExecutor,
    pub runtime: Arc<dyn ContainerRuntime>,
}

/// Reconciles the ByoHost representing this machine.
pub struct HostReconciler {
    pub(crate) hosts: Arc<dyn ObjectStore<ByoHost>>,
    pub(crate) secrets: Arc<dyn ObjectStore<Secret>>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) runner: Arc<dyn CommandRunner>,
    pub(crate) executor: ScriptExecutor,
    pub(crate) runtime: Arc<dyn ContainerRuntime>,
    pub(crate) skip_k8s_installation: bool,
}

impl std::fmt::Debug for HostReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostReconciler")
            .field("skip_k8s_installation", &self.skip_k8s_installation)
            .finish_non_exhaustive()
    }
}

/// `namespace/name` of a secret reference, used as execution marker.
fn marker(reference: &ObjectReference, default_ns: &str) -> Option<String> {
    name_and_namespace(reference, default_ns).map(|(ns, name)| format!("{}/{}", ns, name))
}

impl HostReconciler {
    pub fn new(collaborators: Collaborators, skip_k8s_installation: bool) -> Self {
        let Collaborators { hosts, secrets, events, runner, executor, runtime } = collaborators;
        Self {
            hosts,
            secrets,
            events,
            runner,
            executor,
            runtime,
            skip_k8s_installation,
        }
    }

    /// Reconciles the ByoHost `namespace/name`.
    pub async fn reconcile(&self, namespace: &str, name: &str) -> Result<Action, AgentError> {
        info!("Reconciling ByoHost {}/{}", namespace, name);
        let host = self.hosts.get(namespace, name).await?;

        if host.metadata.deletion_timestamp.is_some() {
            debug!("ByoHost {}/{} is being deleted", namespace, name);
            return Ok(Action::await_change());
        }

        let mut desired = host.clone();
        let result = if host.annotations().contains_key(HOST_CLEANUP_ANNOTATION) {
            self.cleanup(&mut desired).await
        } else {
            self.reconcile_normal(&mut desired).await
        };

        let written = persist_rebased(self.hosts.as_ref(), &host, &desired).await;
        match (result, written) {
            (Err(e), Err(write_err)) => {
                error!("Failed to persist ByoHost {}/{}: {}", namespace, name, write_err);
                Err(e)
            }
            (Err(e), Ok(_)) => Err(e),
            (Ok(_), Err(write_err)) => Err(write_err.into()),
            (Ok(action), Ok(_)) => Ok(action),
        }
    }

    async fn reconcile_normal(&self, host: &mut ByoHost) -> Result<Action, AgentError> {
        let namespace = host.namespace().unwrap_or_default();
        let name = host.name_any();
        let host_ref = host.object_ref(&());

        if host.machine_ref().is_none() {
            info!("ByoHost {}/{} has no machineRef, waiting", namespace, name);
            conditions::mark_false(
                host.status_mut(),
                conditions::K8S_NODE_BOOTSTRAP_SUCCEEDED,
                conditions::WAITING_FOR_MACHINE_REF_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Ok(Action::await_change());
        }

        let Some(bootstrap_ref) = host.spec.bootstrap_secret.clone() else {
            info!("ByoHost {}/{} has no bootstrap secret yet", namespace, name);
            conditions::mark_false(
                host.status_mut(),
                conditions::K8S_NODE_BOOTSTRAP_SUCCEEDED,
                conditions::BOOTSTRAP_DATA_SECRET_UNAVAILABLE_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Ok(Action::await_change());
        };

        let bootstrap_marker = marker(&bootstrap_ref, &namespace);
        if host.executed().bootstrap_secret.is_some() && host.executed().bootstrap_secret == bootstrap_marker {
            debug!("Bootstrap already executed for ByoHost {}/{}", namespace, name);
            return Ok(Action::await_change());
        }

        let bootstrap_script = match self.read_secret_key(&bootstrap_ref, &namespace, "value").await {
            Ok(script) => script,
            Err(e) => {
                let secret_name = bootstrap_ref.name.clone().unwrap_or_default();
                self.events
                    .warning(&host_ref, reasons::READ_BOOTSTRAP_SECRET_FAILED, format!("bootstrap secret {} not found", secret_name))
                    .await;
                return Err(e);
            }
        };

        if self.skip_k8s_installation {
            info!("Skipping k8s installation on ByoHost {}/{}", namespace, name);
        } else {
            let Some(install_ref) = host.spec.installation_secret.clone() else {
                info!("ByoHost {}/{} has no installation secret yet", namespace, name);
                conditions::mark_false(
                    host.status_mut(),
                    conditions::K8S_COMPONENTS_INSTALLATION_SUCCEEDED,
                    conditions::K8S_INSTALLATION_SECRET_UNAVAILABLE_REASON,
                    ConditionSeverity::Info,
                    "",
                );
                return Ok(Action::await_change());
            };
            let install_marker = marker(&install_ref, &namespace);
            if host.executed().installation_secret.is_none() || host.executed().installation_secret != install_marker {
                self.install(host, &install_ref, install_marker).await?;
            }
        }

        if let Err(e) = self.executor.execute(&bootstrap_script).await {
            error!("Bootstrap of ByoHost {}/{} failed: {}", namespace, name, e);
            self.events
                .warning(&host_ref, reasons::BOOTSTRAP_K8S_NODE_FAILED, "k8s Node Bootstrap failed".to_string())
                .await;
            conditions::mark_false(
                host.status_mut(),
                conditions::K8S_NODE_BOOTSTRAP_SUCCEEDED,
                conditions::CLOUDINIT_EXEC_FAILED_REASON,
                ConditionSeverity::Error,
                e.to_string(),
            );
            let reset = match self.reset_node().await {
                Ok(()) => None,
                Err(reset_err) => {
                    error!("Reset of ByoHost {}/{} after failed bootstrap failed: {}", namespace, name, reset_err);
                    self.events
                        .warning(&host_ref, reasons::RESET_K8S_NODE_FAILED, "k8s Node Reset failed".to_string())
                        .await;
                    Some(Box::new(reset_err))
                }
            };
            return Err(AgentError::BootstrapFailed { source: e, reset });
        }

        info!("ByoHost {}/{} bootstrapped", namespace, name);
        self.events
            .normal(&host_ref, reasons::BOOTSTRAP_K8S_NODE_SUCCEEDED, "k8s Node Bootstraped".to_string())
            .await;
        conditions::mark_true(host.status_mut(), conditions::K8S_NODE_BOOTSTRAP_SUCCEEDED);
        host.status_mut().executed.bootstrap_secret = bootstrap_marker;
        Ok(Action::await_change())
    }

    async fn install(
        &self,
        host: &mut ByoHost,
        install_ref: &ObjectReference,
        install_marker: Option<String>,
    ) -> Result<(), AgentError> {
        let namespace = host.namespace().unwrap_or_default();
        let host_ref = host.object_ref(&());
        let secret_name = install_ref.name.clone().unwrap_or_default();

        let scripts = match self.read_install_scripts(install_ref, &namespace).await {
            Ok(scripts) => scripts,
            Err(e) => {
                self.events
                    .warning(
                        &host_ref,
                        reasons::READ_INSTALLATION_SECRET_FAILED,
                        format!("install and uninstall script {} not found", secret_name),
                    )
                    .await;
                return Err(e);
            }
        };
        let (install, uninstall) = scripts;

        info!("Running install script from secret {} on ByoHost {}", secret_name, host.name_any());
        if let Err(e) = self.runner.run_cmd(&install).await {
            error!("Install script failed on ByoHost {}: {}", host.name_any(), e);
            conditions::mark_false(
                host.status_mut(),
                conditions::K8S_COMPONENTS_INSTALLATION_SUCCEEDED,
                conditions::K8S_COMPONENTS_INSTALLATION_FAILED_REASON,
                ConditionSeverity::Error,
                "",
            );
            self.events
                .warning(&host_ref, reasons::INSTALL_SCRIPT_EXECUTION_FAILED, "install script execution failed".to_string())
                .await;
            return Err(e.into());
        }

        conditions::mark_true(host.status_mut(), conditions::K8S_COMPONENTS_INSTALLATION_SUCCEEDED);
        host.status_mut().executed.installation_secret = install_marker;
        host.spec.uninstallation_script = Some(uninstall);
        self.events
            .normal(&host_ref, reasons::INSTALL_SCRIPT_EXECUTION_SUCCEEDED, "install script executed".to_string())
            .await;
        Ok(())
    }

    async fn read_install_scripts(
        &self,
        install_ref: &ObjectReference,
        default_ns: &str,
    ) -> Result<(String, String), AgentError> {
        let secret = self.get_secret(install_ref, default_ns).await?;
        Ok((secret_value(&secret, "install")?, secret_value(&secret, "uninstall")?))
    }

    pub(crate) async fn read_secret_key(
        &self,
        reference: &ObjectReference,
        default_ns: &str,
        key: &str,
    ) -> Result<String, AgentError> {
        let secret = self.get_secret(reference, default_ns).await?;
        secret_value(&secret, key)
    }

    async fn get_secret(&self, reference: &ObjectReference, default_ns: &str) -> Result<Secret, AgentError> {
        let (ns, name) = name_and_namespace(reference, default_ns)
            .ok_or_else(|| AgentError::Secret("secret reference has no name".to_string()))?;
        Ok(self.secrets.get(ns, name).await?)
    }
}

fn secret_value(secret: &Secret, key: &str) -> Result<String, AgentError> {
    let name = secret.name_any();
    let bytes = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| AgentError::Secret(format!("secret {} has no key {}", name, key)))?;
    String::from_utf8(bytes.0.clone())
        .map_err(|e| AgentError::Secret(format!("secret {} key {} is not utf-8: {}", name, key, e)))
}
