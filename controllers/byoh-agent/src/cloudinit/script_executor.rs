//! Cloud-init style bootstrap executor.

use std::path::Path;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::Deserialize;
use tracing::{debug, info};

use super::{CloudInitError, CommandRunner, FileWriter};

/// One `write_files` entry.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct WriteFile {
    pub path: String,

    /// "", "b64" or "base64"
    #[serde(default)]
    pub encoding: String,

    /// `user:group` passed to chown
    #[serde(default)]
    pub owner: String,

    /// Octal mode, e.g. "0640"
    #[serde(default)]
    pub permissions: String,

    #[serde(default)]
    pub content: String,

    #[serde(default)]
    pub append: bool,
}

#[derive(Debug, Default, Deserialize)]
struct BootstrapConfig {
    #[serde(rename = "write_files", default)]
    files: Vec<WriteFile>,

    #[serde(rename = "runCmd", default)]
    commands: Vec<String>,
}

/// Placeholders in file content replaced with the host name.
const HOSTNAME_PLACEHOLDERS: [&str; 4] = [
    "{{ ds.meta_data.hostname }}",
    "{{ds.meta_data.hostname}}",
    "{{ ds.meta_data.local_hostname }}",
    "{{ds.meta_data.local_hostname}}",
];

/// Writes the files of a bootstrap document, then runs its commands.
#[derive(Clone)]
pub struct ScriptExecutor {
    writer: Arc<dyn FileWriter>,
    runner: Arc<dyn CommandRunner>,
    hostname: String,
}

impl std::fmt::Debug for ScriptExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptExecutor").field("hostname", &self.hostname).finish_non_exhaustive()
    }
}

impl ScriptExecutor {
    pub fn new(writer: Arc<dyn FileWriter>, runner: Arc<dyn CommandRunner>, hostname: impl Into<String>) -> Self {
        Self { writer, runner, hostname: hostname.into() }
    }

    /// Executes the bootstrap document. Stops at the first failing step.
    pub async fn execute(&self, bootstrap_script: &str) -> Result<(), CloudInitError> {
        let config: BootstrapConfig = serde_yaml::from_str(bootstrap_script)?;
        info!(
            "Executing bootstrap script: {} files, {} commands",
            config.files.len(),
            config.commands.len()
        );

        for file in &config.files {
            if file.path.is_empty() {
                return Err(CloudInitError::Failed("write_files entry without path".to_string()));
            }
            if let Some(dir) = Path::new(&file.path).parent().and_then(Path::to_str).filter(|d| !d.is_empty()) {
                self.writer.mkdir_if_not_exists(dir).await?;
            }

            let mut decoded = file.clone();
            decoded.content = self.render(&decode(file)?);
            debug!("Writing bootstrap file {}", file.path);
            self.writer.write_to_file(&decoded).await?;
        }

        for cmd in &config.commands {
            self.runner.run_cmd(cmd).await?;
        }
        Ok(())
    }

    fn render(&self, content: &str) -> String {
        HOSTNAME_PLACEHOLDERS
            .iter()
            .fold(content.to_string(), |acc, p| acc.replace(p, &self.hostname))
    }
}

/// Decodes file content according to its encoding.
pub fn decode(file: &WriteFile) -> Result<String, CloudInitError> {
    match file.encoding.trim().to_ascii_lowercase().as_str() {
        "" | "text/plain" => Ok(file.content.clone()),
        "b64" | "base64" => {
            let bytes = STANDARD.decode(file.content.trim()).map_err(|e| CloudInitError::Decode {
                path: file.path.clone(),
                reason: e.to_string(),
            })?;
            String::from_utf8(bytes).map_err(|e| CloudInitError::Decode {
                path: file.path.clone(),
                reason: e.to_string(),
            })
        }
        other => Err(CloudInitError::UnsupportedEncoding {
            path: file.path.clone(),
            encoding: other.to_string(),
        }),
    }
}
