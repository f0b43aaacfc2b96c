//! Shell command execution.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use super::CloudInitError;

/// Runs shell commands on the host.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run_cmd(&self, cmd: &str) -> Result<(), CloudInitError>;

    /// Kills the command once `timeout` elapses.
    async fn run_cmd_with_timeout(&self, cmd: &str, timeout: Duration) -> Result<(), CloudInitError>;
}

/// Runs commands through `/bin/bash -c`, inheriting stdout and stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct BashCommandRunner;

impl BashCommandRunner {
    fn command(cmd: &str) -> Command {
        let mut command = Command::new("/bin/bash");
        command
            .arg("-c")
            .arg(cmd)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl CommandRunner for BashCommandRunner {
    async fn run_cmd(&self, cmd: &str) -> Result<(), CloudInitError> {
        debug!("Running command: {}", cmd);
        let failed = |reason: String| CloudInitError::Command { cmd: cmd.to_string(), reason };

        let status = Self::command(cmd).status().await.map_err(|e| failed(e.to_string()))?;
        if !status.success() {
            return Err(failed(status.to_string()));
        }
        Ok(())
    }

    async fn run_cmd_with_timeout(&self, cmd: &str, timeout: Duration) -> Result<(), CloudInitError> {
        debug!("Running command with timeout {:?}: {}", timeout, cmd);
        let failed = |reason: String| CloudInitError::CommandTimeout {
            timeout,
            cmd: cmd.to_string(),
            reason,
        };

        let mut child = Self::command(cmd).spawn().map_err(|e| failed(e.to_string()))?;
        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => status.map_err(|e| failed(e.to_string()))?,
            Err(elapsed) => {
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command {}: {}", cmd, e);
                }
                return Err(failed(elapsed.to_string()));
            }
        };
        if !status.success() {
            return Err(failed(status.to_string()));
        }
        Ok(())
    }
}

/// Bounds every command of the wrapped runner by `timeout`.
#[derive(Clone)]
pub struct TimeoutCommandRunner {
    inner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl std::fmt::Debug for TimeoutCommandRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutCommandRunner").field("timeout", &self.timeout).finish_non_exhaustive()
    }
}

impl TimeoutCommandRunner {
    pub fn new(inner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl CommandRunner for TimeoutCommandRunner {
    async fn run_cmd(&self, cmd: &str) -> Result<(), CloudInitError> {
        self.inner.run_cmd_with_timeout(cmd, self.timeout).await
    }

    async fn run_cmd_with_timeout(&self, cmd: &str, timeout: Duration) -> Result<(), CloudInitError> {
        self.inner.run_cmd_with_timeout(cmd, timeout.min(self.timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_cmd_success() {
        BashCommandRunner.run_cmd("true").await.unwrap();
    }

    #[tokio::test]
    async fn test_run_cmd_failure_wraps_command() {
        let err = BashCommandRunner.run_cmd("exit 3").await.unwrap_err();
        assert!(err.to_string().starts_with("failed to run command: exit 3: "), "{}", err);
    }

    #[tokio::test]
    async fn test_run_cmd_with_timeout_kills_slow_command() {
        let err = BashCommandRunner
            .run_cmd_with_timeout("sleep 5", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(
            err.to_string().starts_with("failed to run command with timeout 100ms: sleep 5: "),
            "{}",
            err
        );
    }

    #[tokio::test]
    async fn test_run_cmd_with_timeout_fast_command() {
        BashCommandRunner
            .run_cmd_with_timeout("true", Duration::from_secs(5))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_timeout_runner_bounds_plain_commands() {
        let runner = TimeoutCommandRunner::new(Arc::new(BashCommandRunner), Duration::from_millis(100));
        let err = runner.run_cmd("sleep 5").await.unwrap_err();
        assert!(matches!(err, CloudInitError::CommandTimeout { .. }), "{}", err);
        runner.run_cmd("true").await.unwrap();
    }
}
