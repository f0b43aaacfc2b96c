//! Installation script generation.
//!
//! An installer turns a host platform (OS image and architecture), a
//! Kubernetes version and an installation bundle into a pair of literal bash
//! scripts. The scripts are stored in the K8sInstallerConfig's Secret and run
//! by the host agent.

mod ubuntu;

use thiserror::Error;

pub use ubuntu::UbuntuInstaller;

/// Directory on the host the bundle is pulled into.
pub const BUNDLE_DOWNLOAD_PATH: &str = "/var/lib/byoh/bundles";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InstallerError {
    /// No installer supports the OS image / architecture pair
    #[error("no installer supports os {os_image:?} on architecture {architecture:?}")]
    UnsupportedPlatform { os_image: String, architecture: String },

    /// Kubernetes version missing or malformed
    #[error("invalid Kubernetes version {0:?}")]
    InvalidVersion(String),

    /// Bundle repository or type missing
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),
}

/// Produces install and uninstall scripts for one platform.
pub trait InstallerStrategy: Send + Sync {
    fn install(&self) -> String;
    fn uninstall(&self) -> String;
}

/// Where a bundle lives: `<repo>/<bundle name>:<k8s version>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub repo: String,
    pub bundle_type: String,
}

impl Bundle {
    pub fn new(bundle_type: impl Into<String>, repo: impl Into<String>) -> Result<Self, InstallerError> {
        let bundle = Self {
            repo: repo.into().trim_end_matches('/').to_string(),
            bundle_type: bundle_type.into(),
        };
        if bundle.repo.is_empty() {
            return Err(InstallerError::InvalidBundle("bundleRepo is empty".to_string()));
        }
        if bundle.bundle_type.is_empty() {
            return Err(InstallerError::InvalidBundle("bundleType is empty".to_string()));
        }
        Ok(bundle)
    }

    /// Image address of the bundle for an OS slug and Kubernetes version.
    pub fn address(&self, os_slug: &str, k8s_version: &str) -> String {
        format!("{}/byoh-bundle-{}_{}:{}", self.repo, os_slug, self.bundle_type, k8s_version)
    }
}

/// Picks the installer for the host platform.
pub fn select_installer(
    os_image: &str,
    architecture: &str,
    k8s_version: &str,
    bundle: Bundle,
) -> Result<Box<dyn InstallerStrategy>, InstallerError> {
    if !is_valid_version(k8s_version) {
        return Err(InstallerError::InvalidVersion(k8s_version.to_string()));
    }
    match UbuntuInstaller::detect(os_image, architecture) {
        Some(release) => Ok(Box::new(UbuntuInstaller::new(release, k8s_version, bundle))),
        None => Err(InstallerError::UnsupportedPlatform {
            os_image: os_image.to_string(),
            architecture: architecture.to_string(),
        }),
    }
}

/// `v<major>.<minor>.<patch>`
fn is_valid_version(version: &str) -> bool {
    let Some(rest) = version.strip_prefix('v') else {
        return false;
    };
    let parts: Vec<&str> = rest.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> Bundle {
        Bundle::new("k8s", "projects.registry.vmware.com/cluster_api_provider_bringyourownhost/").unwrap()
    }

    #[test]
    fn test_select_ubuntu() {
        let installer = select_installer("Ubuntu 22.04.4 LTS", "amd64", "v1.30.2", bundle()).unwrap();
        let install = installer.install();
        assert!(install.contains(
            "projects.registry.vmware.com/cluster_api_provider_bringyourownhost/byoh-bundle-ubuntu_22.04_x86-64_k8s:v1.30.2"
        ));
        assert!(installer.uninstall().contains("apt-get remove"));
    }

    #[test]
    fn test_unsupported_platform() {
        let err = select_installer("Rocky Linux 9.3", "amd64", "v1.30.2", bundle()).err().unwrap();
        assert_eq!(
            err,
            InstallerError::UnsupportedPlatform {
                os_image: "Rocky Linux 9.3".to_string(),
                architecture: "amd64".to_string(),
            }
        );
        assert!(select_installer("Ubuntu 22.04.4 LTS", "s390x", "v1.30.2", bundle()).is_err());
    }

    #[test]
    fn test_invalid_version() {
        assert!(matches!(
            select_installer("Ubuntu 22.04.4 LTS", "amd64", "", bundle()),
            Err(InstallerError::InvalidVersion(_))
        ));
        assert!(select_installer("Ubuntu 22.04.4 LTS", "amd64", "1.30", bundle()).is_err());
    }

    #[test]
    fn test_invalid_bundle() {
        assert!(Bundle::new("", "repo").is_err());
        assert!(Bundle::new("k8s", "").is_err());
    }
}
