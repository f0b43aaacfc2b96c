//! Tests for K8sInstallerConfig reconciliation.

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use byoh_client::ObjectStore;
    use crds::conditions::{self, ConditionSeverity};
    use crds::constants::{CLUSTER_NAME_LABEL, K8S_INSTALLER_CONFIG_FINALIZER, K8S_VERSION_ANNOTATION};
    use crds::references::secret_reference;
    use crds::{HostInfo, K8sInstallerConfig};
    use k8s_openapi::ByteString;
    use k8s_openapi::api::core::v1::Secret;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use kube::{Resource, ResourceExt};

    use crate::test_utils::{Fixture, create_test_installer_template};

    /// Machine `m1` attached to a host of the given OS, waiting for its
    /// installation secret, plus its installer config `m1`.
    fn waiting_machine(fx: &Fixture, os_image: &str) {
        let mut machine = fx.add_machine("m1");
        machine.status_mut().host_info = HostInfo {
            os_name: "linux".to_string(),
            os_image: os_image.to_string(),
            architecture: "amd64".to_string(),
        };
        conditions::mark_false(
            machine.status_mut(),
            conditions::BYO_HOST_READY,
            conditions::INSTALLATION_SECRET_NOT_AVAILABLE_REASON,
            ConditionSeverity::Info,
            "",
        );
        let machine = fx.byo_machines.insert(machine);

        let template = create_test_installer_template("default", "ubuntu-k8s");
        let mut config = K8sInstallerConfig::new("m1", template.spec.template.spec);
        config.metadata.namespace = Some("default".to_string());
        config.metadata.annotations = Some(BTreeMap::from([(K8S_VERSION_ANNOTATION.to_string(), "v1.30.2".to_string())]));
        config.metadata.labels = Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), "c1".to_string())]));
        config.metadata.owner_references = machine.controller_owner_ref(&()).map(|owner| vec![owner]);
        fx.installer_configs.insert(config);
    }

    fn config(fx: &Fixture) -> K8sInstallerConfig {
        fx.installer_configs.snapshot("default", "m1").unwrap()
    }

    fn secret_text(secret: &Secret, key: &str) -> String {
        let data = secret.data.as_ref().unwrap();
        String::from_utf8(data[key].0.clone()).unwrap()
    }

    #[tokio::test]
    async fn test_renders_installation_secret() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "Ubuntu 22.04.4 LTS");

        fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap();

        let secret = fx.secrets.snapshot("default", "m1").unwrap();
        assert_eq!(secret.type_.as_deref(), Some("cluster.x-k8s.io/secret"));
        assert_eq!(secret.labels().get(CLUSTER_NAME_LABEL).map(String::as_str), Some("c1"));
        let owner = &secret.owner_references()[0];
        assert_eq!((owner.kind.as_str(), owner.name.as_str()), ("K8sInstallerConfig", "m1"));

        let install = secret_text(&secret, "install");
        assert!(install.contains(
            "projects.registry.vmware.com/cluster_api_provider_bringyourownhost/byoh-bundle-ubuntu_22.04_x86-64_k8s:v1.30.2"
        ));
        assert!(install.contains("containerd"));
        assert!(secret_text(&secret, "uninstall").contains("rm -rf $BUNDLE_PATH"));

        let config = config(&fx);
        assert!(config.is_ready());
        assert_eq!(
            config.status.unwrap().installation_secret,
            Some(secret_reference("default", "m1"))
        );
        assert_eq!(config.metadata.finalizers, Some(vec![K8S_INSTALLER_CONFIG_FINALIZER.to_string()]));
    }

    #[tokio::test]
    async fn test_skips_machine_not_waiting_for_secret() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "Ubuntu 22.04.4 LTS");
        let mut machine = fx.byo_machine("m1");
        conditions::mark_true(machine.status_mut(), conditions::BYO_HOST_READY);
        fx.byo_machines.insert(machine);

        fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap();

        assert!(fx.secrets.snapshot("default", "m1").is_none());
        let config = config(&fx);
        assert!(!config.is_ready());
        assert_eq!(config.metadata.finalizers, Some(vec![K8S_INSTALLER_CONFIG_FINALIZER.to_string()]));
    }

    #[tokio::test]
    async fn test_overwrites_existing_secret() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "Ubuntu 20.04.6 LTS");
        fx.secrets.insert(Secret {
            metadata: ObjectMeta {
                name: Some("m1".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            data: Some(BTreeMap::from([("install".to_string(), ByteString(b"stale".to_vec()))])),
            ..Default::default()
        });

        fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap();

        let secret = fx.secrets.snapshot("default", "m1").unwrap();
        assert!(secret_text(&secret, "install").contains("byoh-bundle-ubuntu_20.04_x86-64_k8s:v1.30.2"));
        assert!(secret.data.as_ref().unwrap().contains_key("uninstall"));
        assert!(config(&fx).is_ready());
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "CentOS Stream 9");

        let err = fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap_err();

        assert_eq!(
            err.to_string(),
            "no installer supports os \"CentOS Stream 9\" on architecture \"amd64\""
        );
        assert!(fx.secrets.snapshot("default", "m1").is_none());
        assert!(!config(&fx).is_ready());
    }

    #[tokio::test]
    async fn test_invalid_version() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "Ubuntu 22.04.4 LTS");
        let mut config = config(&fx);
        config
            .metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(K8S_VERSION_ANNOTATION.to_string(), "1.30".to_string());
        fx.installer_configs.insert(config);

        let err = fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap_err();

        assert_eq!(err.to_string(), "invalid Kubernetes version \"1.30\"");
    }

    #[tokio::test]
    async fn test_waits_for_owner_machine() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "Ubuntu 22.04.4 LTS");
        let mut config = config(&fx);
        config.metadata.owner_references = None;
        fx.installer_configs.insert(config);

        fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap();

        assert!(fx.secrets.snapshot("default", "m1").is_none());
        assert!(!self::config(&fx).is_ready());
    }

    #[tokio::test]
    async fn test_paused_cluster_is_skipped() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "Ubuntu 22.04.4 LTS");
        let mut cluster = fx.clusters.snapshot("default", "c1").unwrap();
        cluster.spec.paused = true;
        fx.clusters.insert(cluster);

        fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap();

        assert!(fx.secrets.snapshot("default", "m1").is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_finalizer() {
        let fx = Fixture::with_cluster();
        waiting_machine(&fx, "Ubuntu 22.04.4 LTS");
        fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap();

        fx.installer_configs.delete("default", "m1").await.unwrap();
        fx.reconciler().reconcile_installer_config("default", "m1").await.unwrap();

        assert!(fx.installer_configs.snapshot("default", "m1").is_none());
    }
}
