//! ByoHost registration at agent start.

use std::collections::BTreeMap;
use std::sync::Arc;

use byoh_client::{ObjectStore, persist};
use crds::{ByoHost, ByoHostSpec, HostInfo};
use tracing::{info, warn};

use crate::error::AgentError;

const OS_RELEASE_PATH: &str = "/etc/os-release";

/// Ensures the ByoHost for this host exists and reports its OS details.
pub struct HostRegistrar {
    hosts: Arc<dyn ObjectStore<ByoHost>>,
}

impl std::fmt::Debug for HostRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostRegistrar").finish_non_exhaustive()
    }
}

impl HostRegistrar {
    pub fn new(hosts: Arc<dyn ObjectStore<ByoHost>>) -> Self {
        Self { hosts }
    }

    /// Gets or creates the ByoHost, adds missing labels and updates
    /// `status.hostDetails`.
    pub async fn register(
        &self,
        namespace: &str,
        name: &str,
        labels: &BTreeMap<String, String>,
        host_info: HostInfo,
    ) -> Result<ByoHost, AgentError> {
        let host = match self.hosts.get_opt(namespace, name).await? {
            Some(host) => host,
            None => {
                info!("Registering ByoHost {}/{}", namespace, name);
                let mut host = ByoHost::new(name, ByoHostSpec::default());
                host.metadata.namespace = Some(namespace.to_string());
                if !labels.is_empty() {
                    host.metadata.labels = Some(labels.clone());
                }
                match self.hosts.create(&host).await {
                    Ok(created) => created,
                    Err(e) if e.is_already_exists() => self.hosts.get(namespace, name).await?,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        let mut desired = host.clone();
        let existing = desired.metadata.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in labels {
            existing.entry(k.clone()).or_insert_with(|| v.clone());
        }
        desired.status_mut().host_details = host_info;

        Ok(persist(self.hosts.as_ref(), &host, &desired).await?)
    }
}

/// Host details from `/etc/os-release` and the build target.
pub fn detect_host_info() -> HostInfo {
    let content = match std::fs::read_to_string(OS_RELEASE_PATH) {
        Ok(c) => c,
        Err(e) => {
            warn!("Failed to read {}: {}", OS_RELEASE_PATH, e);
            String::new()
        }
    };
    host_info_from_os_release(&content, std::env::consts::OS, std::env::consts::ARCH)
}

/// `PRETTY_NAME` becomes the OS image; the architecture uses Go/Kubernetes
/// naming (`amd64`, `arm64`).
pub fn host_info_from_os_release(content: &str, os: &str, arch: &str) -> HostInfo {
    let os_image = content
        .lines()
        .filter_map(|l| l.split_once('='))
        .find(|(k, _)| k.trim() == "PRETTY_NAME")
        .map(|(_, v)| v.trim().trim_matches('"').to_string())
        .unwrap_or_default();
    let architecture = match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    HostInfo {
        os_name: os.to_string(),
        os_image,
        architecture: architecture.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byoh_client::MockStore;
    use kube::ResourceExt;

    const UBUNTU: &str = "NAME=\"Ubuntu\"\nVERSION_ID=\"22.04\"\nPRETTY_NAME=\"Ubuntu 22.04.4 LTS\"\nID=ubuntu\n";

    #[test]
    fn test_host_info_from_os_release() {
        let info = host_info_from_os_release(UBUNTU, "linux", "x86_64");
        assert_eq!(info.os_name, "linux");
        assert_eq!(info.os_image, "Ubuntu 22.04.4 LTS");
        assert_eq!(info.architecture, "amd64");
        assert_eq!(host_info_from_os_release("", "linux", "aarch64").architecture, "arm64");
    }

    #[tokio::test]
    async fn test_register_creates_host() {
        let store = MockStore::<ByoHost>::new();
        let registrar = HostRegistrar::new(Arc::new(store.clone()));
        let labels = BTreeMap::from([("site".to_string(), "a".to_string())]);

        registrar
            .register("default", "host-1", &labels, host_info_from_os_release(UBUNTU, "linux", "x86_64"))
            .await
            .unwrap();

        let host = store.snapshot("default", "host-1").unwrap();
        assert_eq!(host.labels().get("site").map(String::as_str), Some("a"));
        assert_eq!(host.status.unwrap().host_details.os_image, "Ubuntu 22.04.4 LTS");
    }

    #[tokio::test]
    async fn test_register_keeps_existing_labels() {
        let store = MockStore::<ByoHost>::new();
        let mut existing = ByoHost::new("host-1", ByoHostSpec::default());
        existing.metadata.namespace = Some("default".into());
        existing.metadata.labels = Some(BTreeMap::from([
            ("site".to_string(), "b".to_string()),
            ("cluster.x-k8s.io/cluster-name".to_string(), "c1".to_string()),
        ]));
        store.insert(existing);
        let registrar = HostRegistrar::new(Arc::new(store.clone()));
        let labels = BTreeMap::from([
            ("site".to_string(), "a".to_string()),
            ("rack".to_string(), "r1".to_string()),
        ]);

        registrar.register("default", "host-1", &labels, HostInfo::default()).await.unwrap();

        let host = store.snapshot("default", "host-1").unwrap();
        assert_eq!(host.labels().get("site").map(String::as_str), Some("b"));
        assert_eq!(host.labels().get("rack").map(String::as_str), Some("r1"));
        assert!(host.labels().contains_key("cluster.x-k8s.io/cluster-name"));
    }
}
