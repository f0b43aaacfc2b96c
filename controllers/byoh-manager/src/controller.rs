//! Main controller implementation.
//!
//! Wires the kube-backed stores into the [`Reconciler`], optionally waits for
//! leadership, then runs one watcher per reconciled kind next to the metrics
//! and health probe servers. The first task to exit stops the manager.

use std::sync::Arc;

use byoh_client::{KubeEventPublisher, KubeStore, KubeWorkloadClusterClient};
use crds::{BootstrapKubeconfig, ByoCluster, ByoHost, ByoMachine, Cluster, K8sInstallerConfig, K8sInstallerConfigTemplate, Machine};
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ManagerConfig;
use crate::error::ControllerError;
use crate::leader_election::LeaderElector;
use crate::metrics::{self, Metrics};
use crate::reconciler::byo_admission::CsrApprover;
use crate::reconciler::{ObjectStores, Reconciler};
use crate::watcher::{Context, WatchApis, Watcher};

const CONTROLLER_NAME: &str = "byoh-controller-manager";

/// Main controller for the BYOH infrastructure kinds.
pub struct Controller {
    byo_machine_watcher: JoinHandle<Result<(), ControllerError>>,
    installer_config_watcher: JoinHandle<Result<(), ControllerError>>,
    byo_cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    bootstrap_kubeconfig_watcher: JoinHandle<Result<(), ControllerError>>,
    csr_watcher: JoinHandle<Result<(), ControllerError>>,
    leader_lease: JoinHandle<Result<(), ControllerError>>,
    metrics_server: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

fn scoped<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ManagerConfig) -> Result<Self, ControllerError> {
        info!("Initializing BYOH controller manager");

        let client = Client::try_default().await?;

        let metrics = Arc::new(Metrics::new()?);
        let metrics_server = {
            let router = metrics::metrics_router(metrics.clone());
            let addr = config.metrics_bind_address;
            tokio::spawn(async move { metrics::serve(addr, router).await })
        };
        let probe_server = {
            let addr = config.health_probe_bind_address;
            tokio::spawn(async move { metrics::serve(addr, metrics::probe_router()).await })
        };

        let leader_lease = if config.enable_leader_election {
            let elector = LeaderElector::new(client.clone(), &config.leader_election_namespace, &config.identity);
            elector.acquire().await;
            tokio::spawn(async move { elector.hold().await })
        } else {
            tokio::spawn(futures::future::pending::<Result<(), ControllerError>>())
        };

        let reconciler = Reconciler::new(ObjectStores {
            byo_hosts: Arc::new(KubeStore::<ByoHost>::new(client.clone())),
            byo_machines: Arc::new(KubeStore::<ByoMachine>::new(client.clone())),
            byo_clusters: Arc::new(KubeStore::<ByoCluster>::new(client.clone())),
            installer_configs: Arc::new(KubeStore::<K8sInstallerConfig>::new(client.clone())),
            installer_config_templates: Arc::new(KubeStore::<K8sInstallerConfigTemplate>::new(client.clone())),
            machines: Arc::new(KubeStore::<Machine>::new(client.clone())),
            clusters: Arc::new(KubeStore::<Cluster>::new(client.clone())),
            secrets: Arc::new(KubeStore::<Secret>::new(client.clone())),
            bootstrap_kubeconfigs: Arc::new(KubeStore::<BootstrapKubeconfig>::new(client.clone())),
            workload: Arc::new(KubeWorkloadClusterClient::new(client.clone())),
            events: Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
        });

        let csr_approver = if config.manual_csr_approval {
            None
        } else {
            let api: Api<CertificateSigningRequest> = Api::all(client.clone());
            Some(CsrApprover::new(api))
        };

        let ctx = Arc::new(Context {
            reconciler: Arc::new(reconciler),
            metrics,
            csr_approver,
        });

        // ByoHosts are listed across namespaces when claiming, so their watch is too.
        let ns = config.namespace.as_deref();
        let watcher_instance = Arc::new(Watcher::new(
            ctx,
            WatchApis {
                byo_machines: scoped(&client, ns),
                byo_hosts: Api::all(client.clone()),
                byo_clusters: scoped(&client, ns),
                installer_configs: scoped(&client, ns),
                machines: scoped(&client, ns),
                clusters: scoped(&client, ns),
                bootstrap_kubeconfigs: scoped(&client, ns),
            },
        ));

        let byo_machine_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_byo_machines().await })
        };

        let installer_config_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_installer_configs().await })
        };

        let byo_cluster_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_byo_clusters().await })
        };

        let bootstrap_kubeconfig_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_bootstrap_kubeconfigs().await })
        };

        let csr_watcher = if config.manual_csr_approval {
            info!("Manual CSR approval enabled, host agent CSRs are left to an operator");
            tokio::spawn(futures::future::pending::<Result<(), ControllerError>>())
        } else {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_csrs().await })
        };

        Ok(Self {
            byo_machine_watcher,
            installer_config_watcher,
            byo_cluster_watcher,
            bootstrap_kubeconfig_watcher,
            csr_watcher,
            leader_lease,
            metrics_server,
            probe_server,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("BYOH controller manager running");

        tokio::select! {
            result = &mut self.byo_machine_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ByoMachine watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ByoMachine watcher error: {}", e)))?;
            }
            result = &mut self.installer_config_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("K8sInstallerConfig watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("K8sInstallerConfig watcher error: {}", e)))?;
            }
            result = &mut self.byo_cluster_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("ByoCluster watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("ByoCluster watcher error: {}", e)))?;
            }
            result = &mut self.bootstrap_kubeconfig_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("BootstrapKubeconfig watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("BootstrapKubeconfig watcher error: {}", e)))?;
            }
            result = &mut self.csr_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("CertificateSigningRequest watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("CertificateSigningRequest watcher error: {}", e)))?;
            }
            result = &mut self.leader_lease => {
                result.map_err(|e| ControllerError::LeaderElection(format!("Lease renewal panicked: {}", e)))??;
            }
            result = &mut self.metrics_server => {
                result.map_err(|e| ControllerError::Metrics(format!("metrics server panicked: {}", e)))??;
            }
            result = &mut self.probe_server => {
                result.map_err(|e| ControllerError::Metrics(format!("health probe server panicked: {}", e)))??;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
        }

        Ok(())
    }
}
