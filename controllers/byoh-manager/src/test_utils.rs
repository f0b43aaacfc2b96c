//! Test utilities for unit testing reconcilers
//!
//! Builders for the BYOH and Cluster API objects plus a [`Fixture`] bundling
//! the in-memory stores a [`Reconciler`] runs against.

use std::collections::BTreeMap;
use std::sync::Arc;

use byoh_client::{MockStore, MockWorkloadCluster, RecordingEventPublisher};
use crds::constants::{CLUSTER_NAME_LABEL, INFRASTRUCTURE_API_VERSION};
use crds::*;
use k8s_openapi::api::core::v1::{ObjectReference, Secret};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

use crate::reconciler::{ObjectStores, Reconciler};

fn meta(namespace: &str, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        ..Default::default()
    }
}

fn owner(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}", name),
        controller: Some(true),
        ..Default::default()
    }
}

/// Cluster whose infrastructure is ready, backed by ByoCluster `name`.
pub fn create_test_cluster(namespace: &str, name: &str) -> Cluster {
    Cluster {
        metadata: meta(namespace, name),
        spec: ClusterSpec {
            paused: false,
            control_plane_endpoint: ApiEndpoint {
                host: "10.10.10.10".to_string(),
                port: 6443,
            },
            infrastructure_ref: Some(ObjectReference {
                api_version: Some(INFRASTRUCTURE_API_VERSION.to_string()),
                kind: Some("ByoCluster".to_string()),
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            }),
        },
        status: Some(ClusterStatus { infrastructure_ready: true }),
    }
}

/// ByoCluster, owned by Cluster `owner_cluster` when given.
pub fn create_test_byo_cluster(namespace: &str, name: &str, owner_cluster: Option<&str>) -> ByoCluster {
    let mut byo_cluster = ByoCluster::new(
        name,
        ByoClusterSpec {
            control_plane_endpoint: ApiEndpoint {
                host: "10.10.10.10".to_string(),
                port: 0,
            },
            bundle_lookup_base_registry: "projects.registry.vmware.com/cluster_api_provider_bringyourownhost".to_string(),
        },
    );
    byo_cluster.metadata.namespace = Some(namespace.to_string());
    byo_cluster.metadata.owner_references =
        owner_cluster.map(|c| vec![owner("cluster.x-k8s.io/v1beta1", "Cluster", c)]);
    byo_cluster
}

/// Machine of cluster `c1` running v1.30.2, with bootstrap data when
/// `data_secret` is given.
pub fn create_test_machine(namespace: &str, name: &str, data_secret: Option<&str>) -> Machine {
    Machine {
        metadata: meta(namespace, name),
        spec: MachineSpec {
            cluster_name: "c1".to_string(),
            bootstrap: Bootstrap {
                config_ref: None,
                data_secret_name: data_secret.map(str::to_string),
            },
            infrastructure_ref: Some(ObjectReference {
                api_version: Some(INFRASTRUCTURE_API_VERSION.to_string()),
                kind: Some("ByoMachine".to_string()),
                namespace: Some(namespace.to_string()),
                name: Some(name.to_string()),
                ..Default::default()
            }),
            version: Some("v1.30.2+byoh.1".to_string()),
            provider_id: None,
        },
    }
}

/// ByoMachine labelled for `cluster`, owned by the Machine of the same name.
pub fn create_test_byo_machine(namespace: &str, name: &str, cluster: &str) -> ByoMachine {
    let mut byo_machine = ByoMachine::new(name, ByoMachineSpec::default());
    byo_machine.metadata.namespace = Some(namespace.to_string());
    byo_machine.metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())]));
    byo_machine.metadata.owner_references = Some(vec![owner("cluster.x-k8s.io/v1beta1", "Machine", name)]);
    byo_machine
}

/// Free Ubuntu 22.04 amd64 host with the given labels.
pub fn create_test_host(namespace: &str, name: &str, labels: &[(&str, &str)]) -> ByoHost {
    let mut host = ByoHost::new(name, ByoHostSpec::default());
    host.metadata.namespace = Some(namespace.to_string());
    if !labels.is_empty() {
        host.metadata.labels = Some(labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect());
    }
    host.status_mut().host_details = HostInfo {
        os_name: "linux".to_string(),
        os_image: "Ubuntu 22.04.4 LTS".to_string(),
        architecture: "amd64".to_string(),
    };
    host
}

pub fn create_test_installer_template(namespace: &str, name: &str) -> K8sInstallerConfigTemplate {
    let mut template = K8sInstallerConfigTemplate::new(
        name,
        K8sInstallerConfigTemplateSpec {
            template: K8sInstallerConfigTemplateResource {
                spec: K8sInstallerConfigSpec {
                    bundle_repo: "projects.registry.vmware.com/cluster_api_provider_bringyourownhost".to_string(),
                    bundle_type: "k8s".to_string(),
                },
            },
        },
    );
    template.metadata.namespace = Some(namespace.to_string());
    template
}

pub fn installer_ref(namespace: &str, name: &str) -> ObjectReference {
    ObjectReference {
        api_version: Some(INFRASTRUCTURE_API_VERSION.to_string()),
        kind: Some("K8sInstallerConfigTemplate".to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

pub const TEST_CA_PEM: &str = "-----BEGIN CERTIFICATE-----\nMIIBszCCAVmgAwIBAgIUTest\n-----END CERTIFICATE-----\n";

/// BootstrapKubeconfig with the given API server and base64 CA data.
pub fn create_test_bootstrap_kubeconfig(namespace: &str, name: &str, api_server: &str, ca_data: &str) -> BootstrapKubeconfig {
    let mut bootstrap_kubeconfig = BootstrapKubeconfig::new(
        name,
        BootstrapKubeconfigSpec {
            api_server: api_server.to_string(),
            certificate_authority_data: ca_data.to_string(),
            insecure_skip_tls_verify: false,
        },
    );
    bootstrap_kubeconfig.metadata.namespace = Some(namespace.to_string());
    bootstrap_kubeconfig
}

/// Everything a [`Reconciler`] test needs to arrange and inspect.
pub struct Fixture {
    pub byo_hosts: MockStore<ByoHost>,
    pub byo_machines: MockStore<ByoMachine>,
    pub byo_clusters: MockStore<ByoCluster>,
    pub installer_configs: MockStore<K8sInstallerConfig>,
    pub installer_config_templates: MockStore<K8sInstallerConfigTemplate>,
    pub machines: MockStore<Machine>,
    pub clusters: MockStore<Cluster>,
    pub secrets: MockStore<Secret>,
    pub bootstrap_kubeconfigs: MockStore<BootstrapKubeconfig>,
    pub workload: MockWorkloadCluster,
    pub events: RecordingEventPublisher,
}

impl Fixture {
    pub fn new() -> Self {
        Self {
            byo_hosts: MockStore::new(),
            byo_machines: MockStore::new(),
            byo_clusters: MockStore::new(),
            installer_configs: MockStore::new(),
            installer_config_templates: MockStore::new(),
            machines: MockStore::new(),
            clusters: MockStore::new(),
            secrets: MockStore::new(),
            bootstrap_kubeconfigs: MockStore::new(),
            workload: MockWorkloadCluster::new(),
            events: RecordingEventPublisher::new(),
        }
    }

    /// Cluster `c1` with its ByoCluster, ready for machines.
    pub fn with_cluster() -> Self {
        let fx = Self::new();
        fx.clusters.insert(create_test_cluster("default", "c1"));
        fx.byo_clusters.insert(create_test_byo_cluster("default", "c1", Some("c1")));
        fx
    }

    /// Adds Machine and ByoMachine `name` of cluster `c1` with bootstrap data.
    pub fn add_machine(&self, name: &str) -> ByoMachine {
        self.machines.insert(create_test_machine("default", name, Some(&format!("{}-bootstrap", name))));
        self.byo_machines.insert(create_test_byo_machine("default", name, "c1"))
    }

    pub fn reconciler(&self) -> Reconciler {
        Reconciler::new(ObjectStores {
            byo_hosts: Arc::new(self.byo_hosts.clone()),
            byo_machines: Arc::new(self.byo_machines.clone()),
            byo_clusters: Arc::new(self.byo_clusters.clone()),
            installer_configs: Arc::new(self.installer_configs.clone()),
            installer_config_templates: Arc::new(self.installer_config_templates.clone()),
            machines: Arc::new(self.machines.clone()),
            clusters: Arc::new(self.clusters.clone()),
            secrets: Arc::new(self.secrets.clone()),
            bootstrap_kubeconfigs: Arc::new(self.bootstrap_kubeconfigs.clone()),
            workload: Arc::new(self.workload.clone()),
            events: Arc::new(self.events.clone()),
        })
    }

    pub fn host(&self, name: &str) -> ByoHost {
        self.byo_hosts.snapshot("default", name).unwrap()
    }

    pub fn byo_machine(&self, name: &str) -> ByoMachine {
        self.byo_machines.snapshot("default", name).unwrap()
    }
}
