//! Bootstrap script execution.
//!
//! The bootstrap secret carries a cloud-init style document with two keys:
//! `write_files` (files to create) and `runCmd` (shell commands run in order).
//! Install and uninstall scripts are plain shell and go straight to the
//! [`CommandRunner`].

pub mod cmd_runner;
pub mod file_writer;
pub mod script_executor;

#[cfg(test)]
mod script_executor_test;

pub use cmd_runner::{BashCommandRunner, CommandRunner, TimeoutCommandRunner};
pub use file_writer::{FileWriter, FsFileWriter};
pub use script_executor::{ScriptExecutor, WriteFile};

use std::time::Duration;
use thiserror::Error;

/// Errors raised while running commands or writing bootstrap files.
#[derive(Debug, Error)]
pub enum CloudInitError {
    /// Command exited non-zero or could not be started
    #[error("failed to run command: {cmd}: {reason}")]
    Command { cmd: String, reason: String },

    /// Command did not finish in time and was killed
    #[error("failed to run command with timeout {timeout:?}: {cmd}: {reason}")]
    CommandTimeout {
        timeout: Duration,
        cmd: String,
        reason: String,
    },

    /// Filesystem error while writing a bootstrap file
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Bootstrap document is not valid YAML
    #[error("failed to parse bootstrap script: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Content could not be decoded with its declared encoding
    #[error("failed to decode content of {path}: {reason}")]
    Decode { path: String, reason: String },

    /// Encoding is not supported (only plain text and base64 are)
    #[error("unsupported encoding {encoding:?} for {path}")]
    UnsupportedEncoding { path: String, encoding: String },

    /// Malformed bootstrap entry
    #[error("{0}")]
    Failed(String),
}
