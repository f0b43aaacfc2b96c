//! `crictl`-backed container runtime.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ContainerRuntime, RuntimeError};

/// Per-call timeout passed to crictl, same as its own default.
const CRICTL_TIMEOUT: Duration = Duration::from_secs(2);

/// Talks to the CRI endpoint through the `crictl` binary.
#[derive(Debug, Clone)]
pub struct CrictlRuntime {
    endpoint: String,
}

impl CrictlRuntime {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into() }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn crictl(&self, args: &[&str]) -> Result<String, String> {
        debug!("crictl {} (endpoint {})", args.join(" "), self.endpoint);
        let output = Command::new("crictl")
            .arg("--runtime-endpoint")
            .arg(&self.endpoint)
            .arg("--timeout")
            .arg(format!("{}s", CRICTL_TIMEOUT.as_secs()))
            .args(args)
            .output()
            .await
            .map_err(|e| e.to_string())?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(if stderr.is_empty() { output.status.to_string() } else { stderr });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[derive(Debug, Deserialize)]
struct InfoResponse {
    #[serde(default)]
    status: RuntimeStatus,
}

#[derive(Debug, Default, Deserialize)]
struct RuntimeStatus {
    #[serde(default)]
    conditions: Vec<RuntimeCondition>,
}

#[derive(Debug, Deserialize)]
struct RuntimeCondition {
    #[serde(rename = "type")]
    type_: String,
    status: bool,
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

/// Checks the RuntimeReady condition in `crictl info` output. NetworkReady is
/// not checked.
pub fn check_runtime_ready(info_json: &str) -> Result<(), RuntimeError> {
    let info: InfoResponse =
        serde_json::from_str(info_json).map_err(|e| RuntimeError::NotRunning(format!("unreadable runtime info: {}", e)))?;
    for c in info.status.conditions {
        if c.type_ == "RuntimeReady" && !c.status {
            return Err(RuntimeError::NotRunning(format!(
                "container runtime condition is not true: condition \"RuntimeReady\", reason: {}, message: {}",
                c.reason, c.message
            )));
        }
    }
    Ok(())
}

/// Splits `crictl pods -q` output into sandbox ids.
pub fn parse_pod_ids(output: &str) -> Vec<String> {
    output.lines().map(str::trim).filter(|l| !l.is_empty()).map(str::to_string).collect()
}

#[async_trait]
impl ContainerRuntime for CrictlRuntime {
    async fn connect(&self) -> Result<(), RuntimeError> {
        self.crictl(&["version"]).await.map(|_| ()).map_err(RuntimeError::Connect)
    }

    async fn is_running(&self) -> Result<(), RuntimeError> {
        let out = self.crictl(&["info"]).await.map_err(RuntimeError::NotRunning)?;
        check_runtime_ready(&out)
    }

    async fn list_kube_containers(&self) -> Result<Vec<String>, RuntimeError> {
        let out = self.crictl(&["pods", "-q"]).await.map_err(RuntimeError::List)?;
        let ids = parse_pod_ids(&out);
        for id in &ids {
            info!("Pod ID: {}", id);
        }
        Ok(ids)
    }

    async fn stop_pod_sandbox(&self, id: &str) -> Result<(), RuntimeError> {
        self.crictl(&["stopp", id])
            .await
            .map(|_| ())
            .map_err(|reason| RuntimeError::Stop { id: id.to_string(), reason })
    }

    async fn remove_pod_sandbox(&self, id: &str) -> Result<(), RuntimeError> {
        self.crictl(&["rmp", id])
            .await
            .map(|_| ())
            .map_err(|reason| RuntimeError::Remove { id: id.to_string(), reason })
    }
}
