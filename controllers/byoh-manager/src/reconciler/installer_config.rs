//! K8sInstallerConfig reconciliation.
//!
//! Once the owning ByoMachine has a host and is waiting for its installation
//! secret, renders the install/uninstall scripts for the host's platform into a
//! Secret named after the config and marks the config ready.
//!
//! The Secret write and the status write are separate: a crash in between
//! leaves an orphaned Secret, which the next pass overwrites.

use std::collections::BTreeMap;

use byoh_client::persist;
use crds::conditions;
use crds::constants::{
    CLUSTER_NAME_LABEL, CLUSTER_SECRET_TYPE, INFRASTRUCTURE_GROUP, K8S_INSTALLER_CONFIG_FINALIZER,
    K8S_VERSION_ANNOTATION,
};
use crds::references::secret_reference;
use crds::{ByoMachine, K8sInstallerConfig};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use tracing::{debug, error, info};

use super::{Reconciler, add_finalizer, is_paused, merge_results, owner_of_kind, remove_finalizer};
use crate::error::ControllerError;
use crate::installer::{Bundle, select_installer};

impl Reconciler {
    /// Reconciles the K8sInstallerConfig `namespace/name`.
    pub async fn reconcile_installer_config(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        info!("Reconciling K8sInstallerConfig {}/{}", namespace, name);
        let Some(config) = self.installer_configs.get_opt(namespace, name).await? else {
            debug!("K8sInstallerConfig {}/{} not found", namespace, name);
            return Ok(Action::await_change());
        };

        let mut desired = config.clone();
        let result = self.reconcile_installer_config_inner(&mut desired).await;
        let written = persist(self.installer_configs.as_ref(), &config, &desired).await;
        merge_results("K8sInstallerConfig", &format!("{}/{}", namespace, name), result, written)
    }

    async fn reconcile_installer_config_inner(&self, config: &mut K8sInstallerConfig) -> Result<Action, ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();

        add_finalizer(&mut config.metadata, K8S_INSTALLER_CONFIG_FINALIZER);

        if config.metadata.deletion_timestamp.is_some() {
            info!("Deleting K8sInstallerConfig {}/{}", namespace, name);
            remove_finalizer(&mut config.metadata, K8S_INSTALLER_CONFIG_FINALIZER);
            return Ok(Action::await_change());
        }

        let Some(byo_machine) = self.owner_byo_machine(config).await? else {
            info!("Waiting for ByoMachine controller to set OwnerRef on K8sInstallerConfig {}/{}", namespace, name);
            return Ok(Action::await_change());
        };

        let cluster_name = config
            .labels()
            .get(CLUSTER_NAME_LABEL)
            .or_else(|| byo_machine.labels().get(CLUSTER_NAME_LABEL))
            .cloned()
            .unwrap_or_default();
        let cluster = self
            .clusters
            .get(&namespace, &cluster_name)
            .await
            .map_err(|source| ControllerError::ClusterFetch { name: cluster_name.clone(), source })?;

        if is_paused(&cluster, &*config) {
            info!("Reconciliation is paused for K8sInstallerConfig {}/{}", namespace, name);
            return Ok(Action::await_change());
        }

        let waiting_reason = byo_machine
            .status
            .as_ref()
            .and_then(|s| conditions::get(s, conditions::BYO_HOST_READY))
            .and_then(|c| c.reason.clone())
            .unwrap_or_default();
        if waiting_reason != conditions::INSTALLATION_SECRET_NOT_AVAILABLE_REASON {
            info!(
                "ByoMachine {} is not waiting for an installation secret (reason {:?})",
                byo_machine.name_any(),
                waiting_reason
            );
            return Ok(Action::await_change());
        }
        if config.is_ready() {
            debug!("K8sInstallerConfig {}/{} is ready", namespace, name);
            return Ok(Action::await_change());
        }

        let host_info = byo_machine.status.as_ref().map(|s| s.host_info.clone()).unwrap_or_default();
        let k8s_version = config.annotations().get(K8S_VERSION_ANNOTATION).cloned().unwrap_or_default();
        let bundle = Bundle::new(config.spec.bundle_type.clone(), config.spec.bundle_repo.clone())?;
        let installer = select_installer(&host_info.os_image, &host_info.architecture, &k8s_version, bundle).map_err(|e| {
            error!(
                "Failed to create installer for os {:?}, architecture {:?}, k8s version {:?}: {}",
                host_info.os_image, host_info.architecture, k8s_version, e
            );
            e
        })?;

        self.store_installation_data(config, &cluster_name, installer.install(), installer.uninstall())
            .await?;
        Ok(Action::await_change())
    }

    /// Owning ByoMachine, by owner reference; `None` when there is no such
    /// reference or the machine is gone.
    async fn owner_byo_machine(&self, config: &K8sInstallerConfig) -> Result<Option<ByoMachine>, ControllerError> {
        let Some(owner) = owner_of_kind(&config.metadata, "ByoMachine", INFRASTRUCTURE_GROUP) else {
            return Ok(None);
        };
        let namespace = config.namespace().unwrap_or_default();
        Ok(self.byo_machines.get_opt(&namespace, &owner.name).await?)
    }

    /// Writes the scripts into Secret `<config name>` and points the config at it.
    async fn store_installation_data(
        &self,
        config: &mut K8sInstallerConfig,
        cluster_name: &str,
        install: String,
        uninstall: String,
    ) -> Result<(), ControllerError> {
        let namespace = config.namespace().unwrap_or_default();
        let name = config.name_any();
        info!("Creating installation secret for K8sInstallerConfig {}/{}", namespace, name);

        let secret = Secret {
            metadata: ObjectMeta {
                name: Some(name.clone()),
                namespace: Some(namespace.clone()),
                labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string())])),
                owner_references: config.controller_owner_ref(&()).map(|owner| vec![owner]),
                ..Default::default()
            },
            data: Some(BTreeMap::from([
                ("install".to_string(), ByteString(install.into_bytes())),
                ("uninstall".to_string(), ByteString(uninstall.into_bytes())),
            ])),
            type_: Some(CLUSTER_SECRET_TYPE.to_string()),
            ..Default::default()
        };

        let write_err = |source| ControllerError::InstallationSecretWrite {
            namespace: namespace.clone(),
            name: name.clone(),
            source,
        };
        match self.secrets.create(&secret).await {
            Ok(_) => {}
            Err(e) if e.is_already_exists() => {
                info!("Installation secret {}/{} already exists, updating", namespace, name);
                let mut existing = self.secrets.get(&namespace, &name).await.map_err(write_err)?;
                existing.metadata.labels = secret.metadata.labels.clone();
                existing.metadata.owner_references = secret.metadata.owner_references.clone();
                existing.data = secret.data.clone();
                existing.type_ = secret.type_.clone();
                self.secrets.update(&existing).await.map_err(write_err)?;
            }
            Err(e) => return Err(write_err(e)),
        }

        let status = config.status_mut();
        status.installation_secret = Some(secret_reference(&namespace, &name));
        status.ready = true;
        info!("Created installation secret for K8sInstallerConfig {}/{}", namespace, name);
        Ok(())
    }
}
