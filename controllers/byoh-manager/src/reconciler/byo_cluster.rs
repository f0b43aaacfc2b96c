//! ByoCluster reconciliation.

use std::time::Duration;

use byoh_client::{Selector, persist};
use crds::ByoCluster;
use crds::constants::{CLUSTER_FINALIZER, CLUSTER_NAME_LABEL};
use kube::ResourceExt;
use kube_runtime::controller::Action;
use tracing::{debug, info};

use super::{Reconciler, add_finalizer, is_paused, merge_results, owner_cluster, remove_finalizer};
use crate::error::ControllerError;

/// Port used when the control plane endpoint does not name one.
pub const DEFAULT_API_ENDPOINT_PORT: i32 = 6443;

/// Requeue delay while ByoMachines of a deleted cluster remain.
const MACHINES_REMAINING_REQUEUE: Duration = Duration::from_secs(10);

impl Reconciler {
    /// Reconciles the ByoCluster `namespace/name`.
    pub async fn reconcile_byo_cluster(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        info!("Reconciling ByoCluster {}/{}", namespace, name);
        let Some(byo_cluster) = self.byo_clusters.get_opt(namespace, name).await? else {
            debug!("ByoCluster {}/{} not found", namespace, name);
            return Ok(Action::await_change());
        };

        let Some(owner) = owner_cluster(&byo_cluster.metadata).cloned() else {
            info!("Waiting for Cluster controller to set OwnerRef on ByoCluster {}/{}", namespace, name);
            return Ok(Action::await_change());
        };
        let cluster = self
            .clusters
            .get(namespace, &owner.name)
            .await
            .map_err(|source| ControllerError::ClusterFetch { name: owner.name.clone(), source })?;
        if is_paused(&cluster, &byo_cluster) {
            debug!("ByoCluster {}/{} linked to a paused Cluster", namespace, name);
            return Ok(Action::await_change());
        }

        let mut desired = byo_cluster.clone();
        let result = if byo_cluster.metadata.deletion_timestamp.is_some() {
            self.reconcile_byo_cluster_delete(&mut desired, &cluster.name_any()).await
        } else {
            reconcile_byo_cluster_normal(&mut desired);
            Ok(Action::await_change())
        };
        let written = persist(self.byo_clusters.as_ref(), &byo_cluster, &desired).await;
        merge_results("ByoCluster", &format!("{}/{}", namespace, name), result, written)
    }

    /// Holds the finalizer until every ByoMachine of the cluster is gone.
    async fn reconcile_byo_cluster_delete(
        &self,
        byo_cluster: &mut ByoCluster,
        cluster_name: &str,
    ) -> Result<Action, ControllerError> {
        let namespace = byo_cluster.namespace().unwrap_or_default();
        let machines = self
            .byo_machines
            .list(Some(&namespace), &Selector::everything().equals(CLUSTER_NAME_LABEL, cluster_name))
            .await?;
        if !machines.is_empty() {
            info!("Waiting for {} ByoMachines of Cluster {} to be deleted", machines.len(), cluster_name);
            return Ok(Action::requeue(MACHINES_REMAINING_REQUEUE));
        }

        info!("Removing finalizer from ByoCluster {}/{}", namespace, byo_cluster.name_any());
        remove_finalizer(&mut byo_cluster.metadata, CLUSTER_FINALIZER);
        Ok(Action::await_change())
    }
}

fn reconcile_byo_cluster_normal(byo_cluster: &mut ByoCluster) {
    add_finalizer(&mut byo_cluster.metadata, CLUSTER_FINALIZER);
    if byo_cluster.spec.control_plane_endpoint.port == 0 {
        byo_cluster.spec.control_plane_endpoint.port = DEFAULT_API_ENDPOINT_PORT;
    }
    byo_cluster.status_mut().ready = true;
}

#[cfg(test)]
mod tests {
    use byoh_client::ObjectStore;
    use crds::constants::CLUSTER_FINALIZER;
    use kube_runtime::controller::Action;
    use std::time::Duration;

    use crate::test_utils::{Fixture, create_test_byo_cluster, create_test_byo_machine, create_test_cluster};

    #[tokio::test]
    async fn test_ready_with_default_port() {
        let fx = Fixture::new();
        fx.clusters.insert(create_test_cluster("default", "c1"));
        fx.byo_clusters.insert(create_test_byo_cluster("default", "c1", Some("c1")));

        fx.reconciler().reconcile_byo_cluster("default", "c1").await.unwrap();

        let stored = fx.byo_clusters.snapshot("default", "c1").unwrap();
        assert_eq!(stored.spec.control_plane_endpoint.port, 6443);
        assert!(stored.status.unwrap().ready);
        assert_eq!(stored.metadata.finalizers, Some(vec![CLUSTER_FINALIZER.to_string()]));
    }

    #[tokio::test]
    async fn test_missing_owner_cluster_errors() {
        let fx = Fixture::new();
        fx.byo_clusters.insert(create_test_byo_cluster("default", "c1", Some("c1")));

        let err = fx.reconciler().reconcile_byo_cluster("default", "c1").await.unwrap_err();

        assert_eq!(err.to_string(), "failed to get Cluster/c1: clusters \"c1\" not found");
        let stored = fx.byo_clusters.snapshot("default", "c1").unwrap();
        assert!(stored.status.is_none());
        assert!(stored.metadata.finalizers.is_none());
    }

    #[tokio::test]
    async fn test_waits_for_owner_cluster() {
        let fx = Fixture::new();
        fx.byo_clusters.insert(create_test_byo_cluster("default", "c1", None));

        fx.reconciler().reconcile_byo_cluster("default", "c1").await.unwrap();

        let stored = fx.byo_clusters.snapshot("default", "c1").unwrap();
        assert!(stored.status.is_none());
        assert!(stored.metadata.finalizers.is_none());
    }

    #[tokio::test]
    async fn test_paused_cluster_is_skipped() {
        let fx = Fixture::new();
        let mut cluster = create_test_cluster("default", "c1");
        cluster.spec.paused = true;
        fx.clusters.insert(cluster);
        fx.byo_clusters.insert(create_test_byo_cluster("default", "c1", Some("c1")));

        fx.reconciler().reconcile_byo_cluster("default", "c1").await.unwrap();

        assert!(fx.byo_clusters.snapshot("default", "c1").unwrap().status.is_none());
    }

    #[tokio::test]
    async fn test_delete_waits_for_machines() {
        let fx = Fixture::new();
        fx.clusters.insert(create_test_cluster("default", "c1"));
        let mut byo_cluster = create_test_byo_cluster("default", "c1", Some("c1"));
        byo_cluster.metadata.finalizers = Some(vec![CLUSTER_FINALIZER.to_string()]);
        fx.byo_clusters.insert(byo_cluster);
        fx.byo_clusters.delete("default", "c1").await.unwrap();
        fx.byo_machines.insert(create_test_byo_machine("default", "m1", "c1"));

        let action = fx.reconciler().reconcile_byo_cluster("default", "c1").await.unwrap();
        assert_eq!(action, Action::requeue(Duration::from_secs(10)));
        assert!(fx.byo_clusters.snapshot("default", "c1").is_some());

        fx.byo_machines.delete("default", "m1").await.unwrap();
        fx.reconciler().reconcile_byo_cluster("default", "c1").await.unwrap();
        assert!(fx.byo_clusters.snapshot("default", "c1").is_none());
    }
}
