//! Kubernetes resource watchers.
//!
//! One kube_runtime `Controller` per reconciled kind. Related kinds are mapped
//! onto the primary through typed mappers, so a Cluster or Machine change
//! re-triggers the ByoMachines that depend on it. Failed reconciles requeue
//! with per-object Fibonacci backoff, reset on the next success.

use std::sync::Arc;
use std::time::Duration;

use crds::constants::{CLUSTER_NAME_LABEL, INFRASTRUCTURE_GROUP};
use crds::{BootstrapKubeconfig, ByoCluster, ByoHost, ByoMachine, Cluster, K8sInstallerConfig, Machine};
use futures::StreamExt;
use futures::future::BoxFuture;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Api, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, watcher, controller::{Action, Config as ControllerConfig}};
use tracing::{debug, error, info};

use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::reconciler::byo_admission::CsrApprover;
use crate::reconciler::{Reconciler, api_group};

/// Shared state handed to every reconcile and error policy call.
pub struct Context {
    pub reconciler: Arc<Reconciler>,
    pub metrics: Arc<Metrics>,
    pub csr_approver: Option<CsrApprover>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context").finish_non_exhaustive()
    }
}

type ReconcileFn<K> = fn(Arc<Context>, Arc<K>) -> BoxFuture<'static, Result<Action, ControllerError>>;

/// `Kind/namespace/name`, the key backoff state is tracked under.
fn resource_key<K: Resource<DynamicType = ()>>(obj: &K) -> String {
    match obj.meta().namespace.as_deref() {
        Some(ns) => format!("{}/{}/{}", K::kind(&()), ns, obj.name_any()),
        None => format!("{}/{}", K::kind(&()), obj.name_any()),
    }
}

/// Drives `controller` until its stream ends.
async fn run_controller<K>(
    controller: Controller<K>,
    ctx: Arc<Context>,
    reconcile_fn: ReconcileFn<K>,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static + std::fmt::Debug + serde::de::DeserializeOwned,
{
    let kind = K::kind(&()).to_string();
    info!("Starting {} watcher", kind);

    let error_policy = |obj: Arc<K>, error: &ControllerError, ctx: Arc<Context>| {
        let key = resource_key(obj.as_ref());
        ctx.metrics.record_error(&K::kind(&()));
        let (backoff_seconds, error_count) = ctx.reconciler.get_backoff_for_resource(&key);
        ctx.reconciler.increment_error(&key);
        error!(
            "Reconciliation error for {} (attempt {}, retrying in {}s): {}",
            key,
            error_count + 1,
            backoff_seconds,
            error
        );
        Action::requeue(Duration::from_secs(backoff_seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Context>| async move {
        let key = resource_key(obj.as_ref());
        debug!("Reconciling {}", key);
        ctx.metrics.record_reconcile(&K::kind(&()));
        let result = reconcile_fn(ctx.clone(), obj).await;
        if result.is_ok() {
            ctx.reconciler.reset_error(&key);
        }
        result
    };

    let controller_config = ControllerConfig::default().debounce(Duration::from_secs(5)).concurrency(3);

    controller
        .with_config(controller_config)
        .run(reconcile, error_policy, ctx)
        .for_each(|res| {
            let kind = kind.clone();
            async move {
                if let Err(e) = res {
                    error!("Controller error for {}: {}", kind, e);
                }
            }
        })
        .await;

    Ok(())
}

/// Watches the BYOH kinds and the Cluster API kinds they depend on.
pub struct Watcher {
    ctx: Arc<Context>,
    byo_machine_api: Api<ByoMachine>,
    byo_host_api: Api<ByoHost>,
    byo_cluster_api: Api<ByoCluster>,
    installer_config_api: Api<K8sInstallerConfig>,
    machine_api: Api<Machine>,
    cluster_api: Api<Cluster>,
    bootstrap_kubeconfig_api: Api<BootstrapKubeconfig>,
    csr_api: Option<Api<CertificateSigningRequest>>,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").finish_non_exhaustive()
    }
}

/// APIs the watchers list and watch, scoped to the watch namespace.
#[derive(Clone)]
pub struct WatchApis {
    pub byo_machines: Api<ByoMachine>,
    pub byo_hosts: Api<ByoHost>,
    pub byo_clusters: Api<ByoCluster>,
    pub installer_configs: Api<K8sInstallerConfig>,
    pub machines: Api<Machine>,
    pub clusters: Api<Cluster>,
    pub bootstrap_kubeconfigs: Api<BootstrapKubeconfig>,
}

impl std::fmt::Debug for WatchApis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchApis").finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(ctx: Arc<Context>, apis: WatchApis) -> Self {
        let csr_api = ctx.csr_approver.as_ref().map(|approver| approver.api().clone());
        Self {
            ctx,
            byo_machine_api: apis.byo_machines,
            byo_host_api: apis.byo_hosts,
            byo_cluster_api: apis.byo_clusters,
            installer_config_api: apis.installer_configs,
            machine_api: apis.machines,
            cluster_api: apis.clusters,
            bootstrap_kubeconfig_api: apis.bootstrap_kubeconfigs,
            csr_api,
        }
    }

    /// ByoMachines, re-triggered by their host, Machine and Cluster.
    pub async fn watch_byo_machines(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.byo_machine_api.clone(), watcher::Config::default());
        let machines = controller.store();
        let controller = controller
            .watches(self.byo_host_api.clone(), watcher::Config::default(), |host: ByoHost| {
                byo_host_to_byo_machine(&host)
            })
            .watches(self.machine_api.clone(), watcher::Config::default(), |machine: Machine| {
                machine_to_byo_machine(&machine)
            })
            .watches(self.cluster_api.clone(), watcher::Config::default(), move |cluster: Cluster| {
                cluster_to_labelled(&cluster, &machines.state())
            });

        run_controller(controller, self.ctx.clone(), |ctx, obj| {
            Box::pin(async move {
                ctx.reconciler
                    .reconcile_byo_machine(&obj.namespace().unwrap_or_default(), &obj.name_any())
                    .await
            })
        })
        .await
    }

    /// K8sInstallerConfigs, re-triggered by their ByoMachine and Cluster.
    pub async fn watch_installer_configs(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.installer_config_api.clone(), watcher::Config::default());
        let configs = controller.store();
        let controller = controller
            .watches(self.byo_machine_api.clone(), watcher::Config::default(), |machine: ByoMachine| {
                byo_machine_to_installer_config(&machine)
            })
            .watches(self.cluster_api.clone(), watcher::Config::default(), move |cluster: Cluster| {
                cluster_to_labelled(&cluster, &configs.state())
            });

        run_controller(controller, self.ctx.clone(), |ctx, obj| {
            Box::pin(async move {
                ctx.reconciler
                    .reconcile_installer_config(&obj.namespace().unwrap_or_default(), &obj.name_any())
                    .await
            })
        })
        .await
    }

    /// ByoClusters, re-triggered by the Cluster that references them.
    pub async fn watch_byo_clusters(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.byo_cluster_api.clone(), watcher::Config::default()).watches(
            self.cluster_api.clone(),
            watcher::Config::default(),
            |cluster: Cluster| cluster_to_byo_cluster(&cluster),
        );

        run_controller(controller, self.ctx.clone(), |ctx, obj| {
            Box::pin(async move {
                ctx.reconciler
                    .reconcile_byo_cluster(&obj.namespace().unwrap_or_default(), &obj.name_any())
                    .await
            })
        })
        .await
    }

    /// BootstrapKubeconfigs; nothing else feeds them.
    pub async fn watch_bootstrap_kubeconfigs(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.bootstrap_kubeconfig_api.clone(), watcher::Config::default());

        run_controller(controller, self.ctx.clone(), |ctx, obj| {
            Box::pin(async move {
                ctx.reconciler
                    .reconcile_bootstrap_kubeconfig(&obj.namespace().unwrap_or_default(), &obj.name_any())
                    .await
            })
        })
        .await
    }

    /// Host agent CSRs; a no-op when manual approval is configured.
    pub async fn watch_csrs(&self) -> Result<(), ControllerError> {
        let Some(api) = self.csr_api.clone() else {
            info!("Manual CSR approval enabled, not watching CertificateSigningRequests");
            return Ok(());
        };

        run_controller(Controller::new(api, watcher::Config::default()), self.ctx.clone(), |ctx, obj| {
            Box::pin(async move {
                match ctx.csr_approver.as_ref() {
                    Some(approver) => approver.reconcile_csr(&obj).await,
                    None => Ok(Action::await_change()),
                }
            })
        })
        .await
    }
}

fn is_infrastructure_ref(reference: &ObjectReference, kind: &str) -> bool {
    reference.kind.as_deref() == Some(kind)
        && reference.api_version.as_deref().map(api_group) == Some(INFRASTRUCTURE_GROUP)
}

/// ByoMachine named by the host's machineRef.
pub fn byo_host_to_byo_machine(host: &ByoHost) -> Option<ObjectRef<ByoMachine>> {
    let machine_ref = host.machine_ref()?;
    if !is_infrastructure_ref(machine_ref, "ByoMachine") {
        return None;
    }
    let name = machine_ref.name.as_deref()?;
    let namespace = machine_ref.namespace.clone().or_else(|| host.namespace())?;
    Some(ObjectRef::new(name).within(&namespace))
}

/// ByoMachine named by the Machine's infrastructureRef.
pub fn machine_to_byo_machine(machine: &Machine) -> Option<ObjectRef<ByoMachine>> {
    let infra_ref = machine.spec.infrastructure_ref.as_ref()?;
    if !is_infrastructure_ref(infra_ref, "ByoMachine") {
        return None;
    }
    Some(ObjectRef::new(infra_ref.name.as_deref()?).within(&machine.namespace()?))
}

/// ByoCluster named by the Cluster's infrastructureRef.
pub fn cluster_to_byo_cluster(cluster: &Cluster) -> Option<ObjectRef<ByoCluster>> {
    let infra_ref = cluster.spec.infrastructure_ref.as_ref()?;
    if !is_infrastructure_ref(infra_ref, "ByoCluster") {
        return None;
    }
    Some(ObjectRef::new(infra_ref.name.as_deref()?).within(&cluster.namespace()?))
}

/// Installer config the ByoMachine creates, named after it.
pub fn byo_machine_to_installer_config(machine: &ByoMachine) -> Option<ObjectRef<K8sInstallerConfig>> {
    machine.spec.installer_ref.as_ref()?;
    Some(ObjectRef::new(&machine.name_any()).within(&machine.namespace()?))
}

/// Objects in the Cluster's namespace carrying its cluster-name label.
/// Nothing for a Cluster being deleted.
pub fn cluster_to_labelled<K>(cluster: &Cluster, objects: &[Arc<K>]) -> Vec<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    if cluster.metadata.deletion_timestamp.is_some() {
        return Vec::new();
    }
    let name = cluster.name_any();
    let namespace = cluster.namespace();
    objects
        .iter()
        .filter(|obj| obj.meta().namespace == namespace)
        .filter(|obj| obj.labels().get(CLUSTER_NAME_LABEL) == Some(&name))
        .map(|obj| ObjectRef::from_obj(obj.as_ref()))
        .collect()
}
