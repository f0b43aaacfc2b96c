//! ByoMachine reconciliation.
//!
//! A ByoMachine is satisfied by claiming exactly one free ByoHost. The claim is
//! the conditional write of the host's cluster-name and attached-machine
//! labels: two machines racing for the same host cannot both win, the loser
//! gets a Conflict and picks another host on its next pass.
//!
//! Deleting the ByoMachine hands the host back to its agent by setting the
//! cleanup annotation; the agent resets the node and clears the claim.

use std::collections::BTreeMap;
use std::time::Duration;

use byoh_client::events::reasons;
use byoh_client::{Selector, StoreError, persist};
use crds::conditions::{self, ConditionSeverity};
use crds::constants::{
    ATTACHED_BYO_MACHINE_LABEL, BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION, CLUSTER_API_GROUP, CLUSTER_NAME_LABEL,
    END_POINT_IP_ANNOTATION, HOST_CLEANUP_ANNOTATION, K8S_VERSION_ANNOTATION, MACHINE_FINALIZER, PAUSED_ANNOTATION,
    PROVIDER_ID_PREFIX, attached_machine_label_value, k8s_version_without_metadata,
};
use crds::references::{object_reference, secret_reference};
use crds::{ByoCluster, ByoHost, ByoMachine, Cluster, K8sInstallerConfig, Machine};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use kube_runtime::controller::Action;
use rand::Rng;
use tracing::{debug, error, info};

use super::{Reconciler, add_finalizer, is_paused, merge_results, owner_of_kind, remove_finalizer};
use crate::error::ControllerError;

/// Requeue delay while the installer config has not produced its secret.
pub const INSTALLER_CONFIG_REQUEUE: Duration = Duration::from_secs(10);

const PROVIDER_ID_SUFFIX_LENGTH: usize = 6;
const PROVIDER_ID_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Objects a ByoMachine pass works with, resolved up front.
struct MachineScope {
    machine: Machine,
    cluster: Cluster,
    byo_cluster: ByoCluster,
    host: Option<ByoHost>,
}

impl Reconciler {
    /// Reconciles the ByoMachine `namespace/name`.
    pub async fn reconcile_byo_machine(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        info!("Reconciling ByoMachine {}/{}", namespace, name);
        let Some(byo_machine) = self.byo_machines.get_opt(namespace, name).await? else {
            debug!("ByoMachine {}/{} not found", namespace, name);
            return Ok(Action::await_change());
        };

        let mut desired = byo_machine.clone();
        let result = self.reconcile_byo_machine_inner(&mut desired).await;
        let written = persist(self.byo_machines.as_ref(), &byo_machine, &desired).await;
        merge_results("ByoMachine", &format!("{}/{}", namespace, name), result, written)
    }

    async fn reconcile_byo_machine_inner(&self, byo_machine: &mut ByoMachine) -> Result<Action, ControllerError> {
        let namespace = byo_machine.namespace().unwrap_or_default();
        let name = byo_machine.name_any();

        let Some(owner) = owner_of_kind(&byo_machine.metadata, "Machine", CLUSTER_API_GROUP).cloned() else {
            info!("Waiting for Machine controller to set OwnerRef on ByoMachine {}/{}", namespace, name);
            return Ok(Action::await_change());
        };
        let machine = self.machines.get(&namespace, &owner.name).await.map_err(|e| {
            error!("Failed to get owner Machine {} of ByoMachine {}/{}: {}", owner.name, namespace, name, e);
            e
        })?;

        let Some(cluster_name) = byo_machine.labels().get(CLUSTER_NAME_LABEL).cloned() else {
            info!(
                "ByoMachine {}/{} is not associated with a cluster, set the label {}: <name of cluster>",
                namespace, name, CLUSTER_NAME_LABEL
            );
            return Ok(Action::await_change());
        };
        let cluster = self
            .clusters
            .get(&namespace, &cluster_name)
            .await
            .map_err(|source| ControllerError::ClusterFetch { name: cluster_name.clone(), source })?;

        let infra_name = cluster
            .spec
            .infrastructure_ref
            .as_ref()
            .and_then(|r| r.name.clone())
            .unwrap_or_default();
        let byo_cluster = match self.byo_clusters.get(&namespace, &infra_name).await {
            Ok(byo_cluster) => byo_cluster,
            Err(e) => {
                error!("Failed to get ByoCluster {}/{} for Cluster {}: {}", namespace, infra_name, cluster_name, e);
                return Ok(Action::await_change());
            }
        };

        let host = self.attached_host(&namespace, &name).await?;
        let mut scope = MachineScope { machine, cluster, byo_cluster, host };

        if is_paused(&scope.cluster, &*byo_machine) {
            info!("ByoMachine {}/{} or its Cluster is paused, skipping", namespace, name);
            if let Some(host) = scope.host.as_ref() {
                if let Err(e) = self.set_host_paused(host, true).await {
                    error!("Failed to set paused annotation on ByoHost {}: {}", host.name_any(), e);
                }
            }
            conditions::mark_false(
                byo_machine.status_mut(),
                conditions::BYO_HOST_READY,
                conditions::CLUSTER_OR_RESOURCE_PAUSED_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Ok(Action::await_change());
        }

        if byo_machine.metadata.deletion_timestamp.is_some() {
            return self.reconcile_byo_machine_delete(byo_machine, &scope).await;
        }

        self.reconcile_byo_machine_normal(byo_machine, &mut scope).await
    }

    /// ByoHost carrying this machine's attached-machine label, across all
    /// namespaces.
    pub(crate) async fn attached_host(&self, namespace: &str, name: &str) -> Result<Option<ByoHost>, ControllerError> {
        let selector = Selector::everything().equals(ATTACHED_BYO_MACHINE_LABEL, attached_machine_label_value(namespace, name));
        let hosts = self.byo_hosts.list(None, &selector).await?;
        if hosts.len() > 1 {
            error!(
                "More than one ByoHost attached to ByoMachine {}/{}, using {}; detach the others manually",
                namespace,
                name,
                hosts[0].name_any()
            );
        }
        Ok(hosts.into_iter().next())
    }

    async fn reconcile_byo_machine_delete(
        &self,
        byo_machine: &mut ByoMachine,
        scope: &MachineScope,
    ) -> Result<Action, ControllerError> {
        let machine_name = byo_machine.name_any();
        info!("Deleting ByoMachine {} of Cluster {}", machine_name, scope.cluster.name_any());

        if let Some(host) = scope.host.as_ref() {
            let host_name = host.name_any();
            info!("Releasing ByoHost {}", host_name);
            let mut desired = host.clone();
            desired
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(HOST_CLEANUP_ANNOTATION.to_string(), String::new());
            persist(self.byo_hosts.as_ref(), host, &desired).await?;

            self.events
                .normal(
                    &host.object_ref(&()),
                    reasons::BYO_HOST_RELEASE_SUCCEEDED,
                    format!("ByoHost Released by {}", machine_name),
                )
                .await;
            self.events
                .normal(
                    &byo_machine.object_ref(&()),
                    reasons::BYO_HOST_RELEASE_SUCCEEDED,
                    format!("Released ByoHost {}", host_name),
                )
                .await;
        }

        remove_finalizer(&mut byo_machine.metadata, MACHINE_FINALIZER);
        Ok(Action::await_change())
    }

    async fn reconcile_byo_machine_normal(
        &self,
        byo_machine: &mut ByoMachine,
        scope: &mut MachineScope,
    ) -> Result<Action, ControllerError> {
        let namespace = byo_machine.namespace().unwrap_or_default();
        let name = byo_machine.name_any();
        info!("Reconciling ByoMachine {}/{} of Cluster {}", namespace, name, scope.cluster.name_any());

        add_finalizer(&mut byo_machine.metadata, MACHINE_FINALIZER);

        if let Some(host) = scope.host.take() {
            let resumed = self.resume_host(byo_machine, &host).await.map_err(|e| {
                error!("Failed to resume ByoHost {}: {}", host.name_any(), e);
                e
            })?;
            scope.host = Some(resumed);
        }

        if let Some(installer_ref) = byo_machine.spec.installer_ref.clone() {
            self.ensure_installer_config(byo_machine, &installer_ref, scope).await.map_err(|e| {
                error!("Failed to create installer config for ByoMachine {}/{}: {}", namespace, name, e);
                e
            })?;
        }

        if !scope.cluster.infrastructure_ready() {
            info!("Cluster {} infrastructure is not ready yet", scope.cluster.name_any());
            conditions::mark_false(
                byo_machine.status_mut(),
                conditions::BYO_HOST_READY,
                conditions::WAITING_FOR_CLUSTER_INFRASTRUCTURE_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Ok(Action::await_change());
        }

        let Some(data_secret_name) = scope.machine.spec.bootstrap.data_secret_name.clone() else {
            info!("Bootstrap data secret for ByoMachine {}/{} not available yet", namespace, name);
            conditions::mark_false(
                byo_machine.status_mut(),
                conditions::BYO_HOST_READY,
                conditions::WAITING_FOR_BOOTSTRAP_DATA_SECRET_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Ok(Action::await_change());
        };

        let host = match scope.host.take() {
            Some(host) => host,
            None => {
                info!("Attempting host reservation for ByoMachine {}/{}", namespace, name);
                let host = self.attach_byo_host(byo_machine, scope, &data_secret_name).await?;
                conditions::mark_false(
                    byo_machine.status_mut(),
                    conditions::BYO_HOST_READY,
                    conditions::INSTALLATION_SECRET_NOT_AVAILABLE_REASON,
                    ConditionSeverity::Info,
                    "",
                );
                self.events
                    .normal(
                        &host.object_ref(&()),
                        reasons::BYO_HOST_ATTACH_SUCCEEDED,
                        format!("Attached to ByoMachine {}", name),
                    )
                    .await;
                self.events
                    .normal(
                        &byo_machine.object_ref(&()),
                        reasons::BYO_HOST_ATTACH_SUCCEEDED,
                        format!("Attached ByoHost {}", host.name_any()),
                    )
                    .await;
                host
            }
        };

        if byo_machine.status.as_ref().is_none_or(|s| s.host_info.is_zero()) {
            let details = host.status.as_ref().map(|s| s.host_details.clone()).unwrap_or_default();
            byo_machine.status_mut().host_info = details;
        }

        let host = if byo_machine.spec.installer_ref.is_some() && host.spec.installation_secret.is_none() {
            match self.set_installation_secret(byo_machine, &host).await {
                Ok(Some(host)) => host,
                Ok(None) => return Ok(Action::requeue(INSTALLER_CONFIG_REQUEUE)),
                Err(e) => {
                    error!("Failed to set installation secret on ByoHost {}: {}", host.name_any(), e);
                    return Err(e);
                }
            }
        } else {
            host
        };

        info!("Updating Node {} with ProviderID", host.name_any());
        self.update_node_provider_id(byo_machine, &scope.cluster, &host).await
    }

    /// Picks the first free host matching the machine's selector and claims it.
    async fn attach_byo_host(
        &self,
        byo_machine: &mut ByoMachine,
        scope: &MachineScope,
        data_secret_name: &str,
    ) -> Result<ByoHost, ControllerError> {
        let namespace = byo_machine.namespace().unwrap_or_default();
        let name = byo_machine.name_any();

        let selector = match byo_machine.spec.selector.as_ref() {
            Some(label_selector) => Selector::from_label_selector(label_selector)?,
            None => Selector::everything(),
        }
        .does_not_exist(CLUSTER_NAME_LABEL);

        let hosts = self.byo_hosts.list(None, &selector).await.map_err(|e| {
            error!("Failed to list ByoHosts: {}", e);
            e
        })?;

        // TODO: prefer hosts whose hostDetails match the installer's supported platforms.
        let Some(host) = hosts.into_iter().next() else {
            info!("No hosts found for ByoMachine {}/{}, waiting", namespace, name);
            self.events
                .warning(
                    &byo_machine.object_ref(&()),
                    reasons::BYO_HOST_SELECTION_FAILED,
                    "No available ByoHost".to_string(),
                )
                .await;
            conditions::mark_false(
                byo_machine.status_mut(),
                conditions::BYO_HOST_READY,
                conditions::BYO_HOSTS_UNAVAILABLE_REASON,
                ConditionSeverity::Info,
                "",
            );
            return Err(ControllerError::NoHostsFound);
        };

        let mut desired = host.clone();
        desired.status_mut().machine_ref = Some(object_reference(&*byo_machine));

        let cluster_label = byo_machine.labels().get(CLUSTER_NAME_LABEL).cloned().unwrap_or_default();
        let labels = desired.metadata.labels.get_or_insert_with(BTreeMap::new);
        labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster_label);
        labels.insert(ATTACHED_BYO_MACHINE_LABEL.to_string(), attached_machine_label_value(&namespace, &name));

        desired.spec.bootstrap_secret = Some(secret_reference(&namespace, data_secret_name));

        let k8s_version = scope.machine.spec.version.as_deref().map(k8s_version_without_metadata).unwrap_or_default();
        let annotations = desired.metadata.annotations.get_or_insert_with(BTreeMap::new);
        annotations.insert(END_POINT_IP_ANNOTATION.to_string(), scope.cluster.spec.control_plane_endpoint.host.clone());
        annotations.insert(K8S_VERSION_ANNOTATION.to_string(), k8s_version.to_string());
        annotations.insert(
            BUNDLE_LOOKUP_BASE_REGISTRY_ANNOTATION.to_string(),
            scope.byo_cluster.spec.bundle_lookup_base_registry.clone(),
        );

        let attached = persist(self.byo_hosts.as_ref(), &host, &desired).await.map_err(|e| {
            error!("Failed to attach ByoHost {}: {}", host.name_any(), e);
            e
        })?;
        info!("Attached ByoHost {} to ByoMachine {}/{}", attached.name_any(), namespace, name);
        Ok(attached)
    }

    /// Adds or removes the paused annotation on a host.
    async fn set_host_paused(&self, host: &ByoHost, paused: bool) -> Result<ByoHost, StoreError> {
        let mut desired = host.clone();
        if paused {
            desired
                .metadata
                .annotations
                .get_or_insert_with(BTreeMap::new)
                .insert(PAUSED_ANNOTATION.to_string(), String::new());
        } else if let Some(annotations) = desired.metadata.annotations.as_mut() {
            annotations.remove(PAUSED_ANNOTATION);
        }
        persist(self.byo_hosts.as_ref(), host, &desired).await
    }

    /// Unpauses an attached host. A claim whose status write was lost gets its
    /// machineRef back here.
    async fn resume_host(&self, byo_machine: &ByoMachine, host: &ByoHost) -> Result<ByoHost, StoreError> {
        let mut desired = host.clone();
        if let Some(annotations) = desired.metadata.annotations.as_mut() {
            annotations.remove(PAUSED_ANNOTATION);
        }
        if desired.machine_ref().is_none() {
            desired.status_mut().machine_ref = Some(object_reference(byo_machine));
        }
        persist(self.byo_hosts.as_ref(), host, &desired).await
    }

    /// Creates the machine's K8sInstallerConfig from the referenced template
    /// unless it already exists.
    async fn ensure_installer_config(
        &self,
        byo_machine: &ByoMachine,
        installer_ref: &ObjectReference,
        scope: &MachineScope,
    ) -> Result<(), ControllerError> {
        let namespace = byo_machine.namespace().unwrap_or_default();
        let name = byo_machine.name_any();
        if self.installer_configs.get_opt(&namespace, &name).await?.is_some() {
            return Ok(());
        }

        let template_ns = installer_ref
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(&namespace);
        let template_name = installer_ref.name.as_deref().unwrap_or_default();
        let template = self.installer_config_templates.get(template_ns, template_name).await.map_err(|e| {
            error!("Failed to get installer config template {}/{}: {}", template_ns, template_name, e);
            e
        })?;

        let k8s_version = scope.machine.spec.version.as_deref().map(k8s_version_without_metadata).unwrap_or_default();
        let mut config = K8sInstallerConfig::new(&name, template.spec.template.spec.clone());
        config.metadata.namespace = Some(namespace.clone());
        config.metadata.annotations = Some(BTreeMap::from([(K8S_VERSION_ANNOTATION.to_string(), k8s_version.to_string())]));
        config.metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), scope.cluster.name_any())]));
        config.metadata.owner_references = byo_machine.controller_owner_ref(&()).map(|owner| vec![owner]);

        match self.installer_configs.create(&config).await {
            Ok(_) => {
                info!("Created K8sInstallerConfig {}/{} from template {}", namespace, name, template_name);
                Ok(())
            }
            Err(e) if e.is_already_exists() => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Copies the installer config's secret reference onto the host. `None`
    /// while the config is not ready yet.
    async fn set_installation_secret(
        &self,
        byo_machine: &ByoMachine,
        host: &ByoHost,
    ) -> Result<Option<ByoHost>, ControllerError> {
        let namespace = byo_machine.namespace().unwrap_or_default();
        let config = self.installer_configs.get(&namespace, &byo_machine.name_any()).await?;
        if !config.is_ready() {
            info!("K8sInstallerConfig {}/{} is not ready, requeuing", namespace, config.name_any());
            return Ok(None);
        }

        let secret_ref = config
            .status
            .as_ref()
            .and_then(|s| s.installation_secret.clone())
            .ok_or_else(|| ControllerError::InstallationSecretNotSet(config.name_any()))?;

        let mut desired = host.clone();
        desired.spec.installation_secret = Some(secret_ref);
        Ok(Some(persist(self.byo_hosts.as_ref(), host, &desired).await?))
    }

    async fn update_node_provider_id(
        &self,
        byo_machine: &mut ByoMachine,
        cluster: &Cluster,
        host: &ByoHost,
    ) -> Result<Action, ControllerError> {
        let host_name = host.name_any();
        match self.set_node_provider_id(cluster, &host_name).await {
            Ok(provider_id) => {
                byo_machine.spec.provider_id = Some(provider_id);
                byo_machine.status_mut().ready = true;
                conditions::mark_true(byo_machine.status_mut(), conditions::BYO_HOST_READY);
                self.events
                    .normal(
                        &byo_machine.object_ref(&()),
                        reasons::NODE_PROVISIONED_SUCCEEDED,
                        format!("Provisioned Node {}", host_name),
                    )
                    .await;
                Ok(Action::await_change())
            }
            Err(e) => {
                error!("Failed to set providerID on Node {}: {}", host_name, e);
                self.events
                    .warning(
                        &byo_machine.object_ref(&()),
                        reasons::SET_NODE_PROVIDER_FAILED,
                        format!("Node {} does not exist", host_name),
                    )
                    .await;
                Err(e)
            }
        }
    }

    /// Reuses the Node's provider id when it belongs to this host, otherwise
    /// generates one and patches it onto the Node.
    async fn set_node_provider_id(&self, cluster: &Cluster, node_name: &str) -> Result<String, ControllerError> {
        let cluster_ns = cluster.namespace().unwrap_or_default();
        let cluster_name = cluster.name_any();

        let existing = self
            .workload
            .get_node_provider_id(&cluster_ns, &cluster_name, node_name)
            .await?
            .filter(|id| !id.is_empty());
        if let Some(provider_id) = existing {
            if provider_id_matches(&provider_id, node_name) {
                return Ok(provider_id);
            }
            return Err(ControllerError::InvalidProviderId);
        }

        let provider_id = new_provider_id(node_name);
        self.workload
            .set_node_provider_id(&cluster_ns, &cluster_name, node_name, &provider_id)
            .await?;
        Ok(provider_id)
    }
}

/// `byoh://<host>/` followed by at least one character.
pub fn provider_id_matches(provider_id: &str, host_name: &str) -> bool {
    provider_id
        .strip_prefix(PROVIDER_ID_PREFIX)
        .and_then(|rest| rest.strip_prefix(host_name))
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|suffix| !suffix.is_empty())
}

/// `byoh://<host>/<6 random [a-z0-9]>`
pub fn new_provider_id(host_name: &str) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..PROVIDER_ID_SUFFIX_LENGTH)
        .map(|_| PROVIDER_ID_CHARSET[rng.random_range(0..PROVIDER_ID_CHARSET.len())] as char)
        .collect();
    format!("{}{}/{}", PROVIDER_ID_PREFIX, host_name, suffix)
}
