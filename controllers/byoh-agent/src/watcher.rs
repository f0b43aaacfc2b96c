//! ByoHost watcher.
//!
//! The agent only ever watches its own ByoHost, selected by name with a field
//! selector, and feeds it to the [`HostReconciler`].

use std::sync::Arc;
use std::time::Duration;

use crds::ByoHost;
use futures::StreamExt;
use kube::{Api, ResourceExt};
use kube_runtime::{Controller, watcher, controller::{Action, Config as ControllerConfig}};
use tracing::{debug, error, info};

use crate::error::AgentError;
use crate::reconciler::HostReconciler;

/// Requeue delay after a failed reconcile.
const ERROR_REQUEUE: Duration = Duration::from_secs(10);

/// Watches this host's ByoHost and reconciles every change.
pub struct Watcher {
    reconciler: Arc<HostReconciler>,
    api: Api<ByoHost>,
    host_name: String,
}

impl std::fmt::Debug for Watcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Watcher").field("host_name", &self.host_name).finish_non_exhaustive()
    }
}

impl Watcher {
    pub fn new(reconciler: Arc<HostReconciler>, api: Api<ByoHost>, host_name: String) -> Self {
        Self { reconciler, api, host_name }
    }

    /// Runs until the watch stream ends.
    pub async fn watch_byo_host(&self) -> Result<(), AgentError> {
        info!("Starting ByoHost watcher for {}", self.host_name);

        let error_policy = |obj: Arc<ByoHost>, error: &AgentError, _ctx: Arc<HostReconciler>| {
            error!("Reconciliation error for ByoHost {}: {}", obj.name_any(), error);
            Action::requeue(ERROR_REQUEUE)
        };

        let reconcile = |obj: Arc<ByoHost>, ctx: Arc<HostReconciler>| async move {
            let namespace = obj.namespace().unwrap_or_default();
            let name = obj.name_any();
            debug!("Reconciling ByoHost {}/{}", namespace, name);
            ctx.reconcile(&namespace, &name).await
        };

        let config = watcher::Config::default().fields(&format!("metadata.name={}", self.host_name));
        Controller::new(self.api.clone(), config)
            .with_config(ControllerConfig::default().debounce(Duration::from_secs(1)).concurrency(1))
            .run(reconcile, error_policy, self.reconciler.clone())
            .for_each(|res| async move {
                if let Err(e) = res {
                    error!("Controller error for ByoHost: {}", e);
                }
            })
            .await;

        Ok(())
    }
}
