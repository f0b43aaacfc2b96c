//! Agent controller wiring.
//!
//! Builds the kube-backed collaborators, registers the ByoHost and starts the
//! watcher.

use std::sync::Arc;

use byoh_client::{KubeEventPublisher, KubeStore, ObjectStore};
use crds::ByoHost;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cloudinit::{BashCommandRunner, CommandRunner, FsFileWriter, ScriptExecutor, TimeoutCommandRunner};
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::reconciler::{Collaborators, HostReconciler};
use crate::registration::{HostRegistrar, detect_host_info};
use crate::runtime::{CrictlRuntime, detect_host_cri_socket};
use crate::watcher::Watcher;

const CONTROLLER_NAME: &str = "byoh-agent";

/// Host agent: one watcher on its own ByoHost.
pub struct Controller {
    host_watcher: JoinHandle<Result<(), AgentError>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller").finish_non_exhaustive()
    }
}

impl Controller {
    pub async fn new(config: AgentConfig) -> Result<Self, AgentError> {
        info!("Initializing BYOH agent for host {}", config.host_name);

        let client = Client::try_default().await?;

        let hosts: Arc<dyn ObjectStore<ByoHost>> = Arc::new(KubeStore::<ByoHost>::new(client.clone()));
        let secrets: Arc<dyn ObjectStore<Secret>> = Arc::new(KubeStore::<Secret>::new(client.clone()));

        HostRegistrar::new(hosts.clone())
            .register(&config.namespace, &config.host_name, &config.labels, detect_host_info())
            .await?;
        info!("ByoHost {}/{} registered", config.namespace, config.host_name);

        let cri_socket = match config.cri_socket.clone() {
            Some(socket) => socket,
            None => detect_host_cri_socket()?,
        };
        let runtime = CrictlRuntime::new(cri_socket);
        info!("Using CRI socket {}", runtime.endpoint());

        let runner: Arc<dyn CommandRunner> = match config.command_timeout {
            Some(timeout) => Arc::new(TimeoutCommandRunner::new(Arc::new(BashCommandRunner), timeout)),
            None => Arc::new(BashCommandRunner),
        };
        let executor = ScriptExecutor::new(Arc::new(FsFileWriter), runner.clone(), config.host_name.clone());
        let reconciler = HostReconciler::new(
            Collaborators {
                hosts,
                secrets,
                events: Arc::new(KubeEventPublisher::new(client.clone(), CONTROLLER_NAME)),
                runner,
                executor,
                runtime: Arc::new(runtime),
            },
            config.skip_k8s_installation,
        );
        if config.skip_k8s_installation {
            warn!("k8s installation is skipped; components must already be present on the host");
        }

        let api: Api<ByoHost> = Api::namespaced(client, &config.namespace);
        let watcher = Watcher::new(Arc::new(reconciler), api, config.host_name);
        let host_watcher = tokio::spawn(async move { watcher.watch_byo_host().await });

        Ok(Self { host_watcher })
    }

    /// Runs until the watcher exits or the process is interrupted.
    pub async fn run(mut self) -> Result<(), AgentError> {
        info!("BYOH agent running");

        tokio::select! {
            result = &mut self.host_watcher => {
                result.map_err(|e| AgentError::Watch(format!("ByoHost watcher panicked: {}", e)))?
                    .map_err(|e| AgentError::Watch(format!("ByoHost watcher error: {}", e)))?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                self.host_watcher.abort();
            }
        }

        Ok(())
    }
}
