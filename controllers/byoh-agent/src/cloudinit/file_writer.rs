//! Writes bootstrap files to the host filesystem.

use std::fs::Permissions;
use std::os::unix::fs::PermissionsExt;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use super::CloudInitError;
use super::script_executor::WriteFile;

const DEFAULT_PERMISSIONS: u32 = 0o644;

#[async_trait]
pub trait FileWriter: Send + Sync {
    async fn mkdir_if_not_exists(&self, dir: &str) -> Result<(), CloudInitError>;

    /// Writes already-decoded content, honouring append, permissions and owner.
    async fn write_to_file(&self, file: &WriteFile) -> Result<(), CloudInitError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsFileWriter;

fn io_err(path: &str) -> impl FnOnce(std::io::Error) -> CloudInitError + '_ {
    move |source| CloudInitError::Io { path: path.to_string(), source }
}

/// Parses an octal mode such as "0640" or "640"; empty means 0644.
pub fn parse_permissions(permissions: &str) -> Result<u32, CloudInitError> {
    let trimmed = permissions.trim().trim_start_matches("0o");
    if trimmed.is_empty() {
        return Ok(DEFAULT_PERMISSIONS);
    }
    u32::from_str_radix(trimmed, 8)
        .map_err(|e| CloudInitError::Failed(format!("invalid permissions {:?}: {}", permissions, e)))
}

#[async_trait]
impl FileWriter for FsFileWriter {
    async fn mkdir_if_not_exists(&self, dir: &str) -> Result<(), CloudInitError> {
        tokio::fs::create_dir_all(dir).await.map_err(io_err(dir))
    }

    async fn write_to_file(&self, file: &WriteFile) -> Result<(), CloudInitError> {
        let mode = parse_permissions(&file.permissions)?;
        debug!("Writing {} (mode {:o}, append {})", file.path, mode, file.append);

        let mut options = tokio::fs::OpenOptions::new();
        options.create(true).mode(mode);
        if file.append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let mut handle = options.open(&file.path).await.map_err(io_err(&file.path))?;
        handle.write_all(file.content.as_bytes()).await.map_err(io_err(&file.path))?;
        handle.flush().await.map_err(io_err(&file.path))?;

        // mode() only applies on creation
        tokio::fs::set_permissions(&file.path, Permissions::from_mode(mode))
            .await
            .map_err(io_err(&file.path))?;

        if !file.owner.is_empty() {
            let status = Command::new("chown")
                .arg(&file.owner)
                .arg(&file.path)
                .status()
                .await
                .map_err(io_err(&file.path))?;
            if !status.success() {
                return Err(CloudInitError::Failed(format!(
                    "failed to change owner of {} to {}: {}",
                    file.path, file.owner, status
                )));
            }
        }
        Ok(())
    }
}
