//! Agent configuration from environment variables.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::info;

use crate::error::AgentError;

const KERNEL_HOSTNAME_PATH: &str = "/proc/sys/kernel/hostname";

/// Runtime configuration of the host agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentConfig {
    /// Name of the ByoHost this agent manages
    pub host_name: String,
    /// Namespace of the ByoHost
    pub namespace: String,
    /// Skip running the install/uninstall scripts
    pub skip_k8s_installation: bool,
    /// Labels put on the ByoHost at registration
    pub labels: BTreeMap<String, String>,
    /// CRI endpoint; detected from the host when unset
    pub cri_socket: Option<String>,
    /// Upper bound for every script and command the agent runs
    pub command_timeout: Option<Duration>,
}

impl AgentConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, AgentError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AgentError> {
        let host_name = match lookup("HOST_NAME").filter(|v| !v.is_empty()) {
            Some(name) => name,
            None => kernel_hostname()?,
        };

        Ok(Self {
            host_name,
            namespace: lookup("NAMESPACE").filter(|v| !v.is_empty()).unwrap_or_else(|| "default".to_string()),
            skip_k8s_installation: parse_bool("SKIP_K8S_INSTALLATION", lookup("SKIP_K8S_INSTALLATION"))?,
            labels: parse_labels(lookup("HOST_LABELS").as_deref().unwrap_or(""))?,
            cri_socket: lookup("CRI_SOCKET").filter(|v| !v.is_empty()),
            command_timeout: parse_timeout("COMMAND_TIMEOUT", lookup("COMMAND_TIMEOUT"))?,
        })
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Host name: {}", self.host_name);
        info!("  Namespace: {}", self.namespace);
        info!("  Skip k8s installation: {}", self.skip_k8s_installation);
        info!("  Labels: {:?}", self.labels);
        info!("  CRI socket: {}", self.cri_socket.as_deref().unwrap_or("auto-detect"));
        match self.command_timeout {
            Some(timeout) => info!("  Command timeout: {:?}", timeout),
            None => info!("  Command timeout: none"),
        }
    }
}

fn kernel_hostname() -> Result<String, AgentError> {
    let raw = std::fs::read_to_string(KERNEL_HOSTNAME_PATH)
        .map_err(|e| AgentError::InvalidConfig(format!("HOST_NAME not set and {} unreadable: {}", KERNEL_HOSTNAME_PATH, e)))?;
    Ok(raw.trim().to_lowercase())
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool, AgentError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
        Some(v) => Err(AgentError::InvalidConfig(format!("{} must be true or false, got {:?}", key, v))),
    }
}

/// Whole seconds; unset, empty or `0` means no timeout.
fn parse_timeout(key: &str, value: Option<String>) -> Result<Option<Duration>, AgentError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(v) => {
            let secs: u64 = v
                .parse()
                .map_err(|_| AgentError::InvalidConfig(format!("{} must be a number of seconds, got {:?}", key, v)))?;
            Ok((secs > 0).then(|| Duration::from_secs(secs)))
        }
    }
}

/// Parses `k=v,k2=v2`.
pub fn parse_labels(raw: &str) -> Result<BTreeMap<String, String>, AgentError> {
    let mut labels = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| AgentError::InvalidConfig(format!("invalid label {:?}, expected key=value", pair)))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(AgentError::InvalidConfig(format!("invalid label {:?}, empty key", pair)));
        }
        labels.insert(key.to_string(), value.trim().to_string());
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AgentConfig::from_lookup(lookup(&[("HOST_NAME", "host-1")])).unwrap();
        assert_eq!(cfg.namespace, "default");
        assert!(!cfg.skip_k8s_installation);
        assert!(cfg.labels.is_empty());
        assert!(cfg.cri_socket.is_none());
        assert!(cfg.command_timeout.is_none());
    }

    #[test]
    fn test_all_values() {
        let cfg = AgentConfig::from_lookup(lookup(&[
            ("HOST_NAME", "host-1"),
            ("NAMESPACE", "hosts"),
            ("SKIP_K8S_INSTALLATION", "true"),
            ("HOST_LABELS", "site=a, rack=r1"),
            ("CRI_SOCKET", "unix:///run/crio/crio.sock"),
            ("COMMAND_TIMEOUT", "900"),
        ]))
        .unwrap();
        assert_eq!(cfg.namespace, "hosts");
        assert!(cfg.skip_k8s_installation);
        assert_eq!(cfg.labels.get("rack").map(String::as_str), Some("r1"));
        assert_eq!(cfg.cri_socket.as_deref(), Some("unix:///run/crio/crio.sock"));
        assert_eq!(cfg.command_timeout, Some(Duration::from_secs(900)));
    }

    #[test]
    fn test_command_timeout() {
        let zero = AgentConfig::from_lookup(lookup(&[("HOST_NAME", "h"), ("COMMAND_TIMEOUT", "0")])).unwrap();
        assert!(zero.command_timeout.is_none());
        let err = AgentConfig::from_lookup(lookup(&[("HOST_NAME", "h"), ("COMMAND_TIMEOUT", "10m")])).unwrap_err();
        assert!(err.to_string().contains("COMMAND_TIMEOUT"));
    }

    #[test]
    fn test_invalid_bool() {
        let err = AgentConfig::from_lookup(lookup(&[("HOST_NAME", "h"), ("SKIP_K8S_INSTALLATION", "maybe")])).unwrap_err();
        assert!(err.to_string().contains("SKIP_K8S_INSTALLATION"));
    }

    #[test]
    fn test_invalid_labels() {
        assert!(parse_labels("site").is_err());
        assert!(parse_labels("=x").is_err());
        assert_eq!(parse_labels("a=,b=2").unwrap().len(), 2);
    }
}
