//! Manager configuration from environment variables.

use std::net::SocketAddr;

use tracing::info;

use crate::error::ControllerError;

const DEFAULT_METRICS_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_HEALTH_PROBE_BIND_ADDRESS: &str = "0.0.0.0:8081";
const DEFAULT_LEADER_ELECTION_NAMESPACE: &str = "byoh-system";

/// Runtime configuration of the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Namespace to watch; all namespaces when unset
    pub namespace: Option<String>,
    pub metrics_bind_address: SocketAddr,
    pub health_probe_bind_address: SocketAddr,
    pub enable_leader_election: bool,
    pub leader_election_namespace: String,
    /// Holder identity used for the leader Lease
    pub identity: String,
    /// CSRs are left for an operator to approve
    pub manual_csr_approval: bool,
}

impl ManagerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ControllerError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Ok(Self {
            namespace: get("WATCH_NAMESPACE"),
            metrics_bind_address: parse_addr(
                "METRICS_BIND_ADDRESS",
                get("METRICS_BIND_ADDRESS").as_deref().unwrap_or(DEFAULT_METRICS_BIND_ADDRESS),
            )?,
            health_probe_bind_address: parse_addr(
                "HEALTH_PROBE_BIND_ADDRESS",
                get("HEALTH_PROBE_BIND_ADDRESS").as_deref().unwrap_or(DEFAULT_HEALTH_PROBE_BIND_ADDRESS),
            )?,
            enable_leader_election: parse_bool("ENABLE_LEADER_ELECTION", get("ENABLE_LEADER_ELECTION"))?,
            leader_election_namespace: get("LEADER_ELECTION_NAMESPACE")
                .unwrap_or_else(|| DEFAULT_LEADER_ELECTION_NAMESPACE.to_string()),
            identity: get("POD_NAME").unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            manual_csr_approval: get("MANUAL_CSR_APPROVAL").as_deref() == Some("enable"),
        })
    }

    pub fn log(&self) {
        info!("Configuration:");
        info!("  Namespace: {}", self.namespace.as_deref().unwrap_or("all namespaces"));
        info!("  Metrics address: {}", self.metrics_bind_address);
        info!("  Health probe address: {}", self.health_probe_bind_address);
        info!("  Leader election: {}", self.enable_leader_election);
        if self.enable_leader_election {
            info!("  Leader election namespace: {}", self.leader_election_namespace);
            info!("  Identity: {}", self.identity);
        }
        info!("  Manual CSR approval: {}", self.manual_csr_approval);
    }
}

fn parse_addr(key: &str, value: &str) -> Result<SocketAddr, ControllerError> {
    value
        .parse()
        .map_err(|e| ControllerError::InvalidConfig(format!("{} must be host:port, got {:?}: {}", key, value, e)))
}

fn parse_bool(key: &str, value: Option<String>) -> Result<bool, ControllerError> {
    match value.as_deref() {
        None => Ok(false),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(true),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(false),
        Some(v) => Err(ControllerError::InvalidConfig(format!("{} must be true or false, got {:?}", key, v))),
    }
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
        let cfg = ManagerConfig::from_lookup(lookup(&[])).unwrap();
        assert!(cfg.namespace.is_none());
        assert_eq!(cfg.metrics_bind_address.to_string(), "0.0.0.0:8080");
        assert_eq!(cfg.health_probe_bind_address.to_string(), "0.0.0.0:8081");
        assert!(!cfg.enable_leader_election);
        assert_eq!(cfg.leader_election_namespace, "byoh-system");
        assert!(uuid::Uuid::parse_str(&cfg.identity).is_ok());
        assert!(!cfg.manual_csr_approval);
    }

    #[test]
    fn test_all_values() {
        let cfg = ManagerConfig::from_lookup(lookup(&[
            ("WATCH_NAMESPACE", "clusters"),
            ("METRICS_BIND_ADDRESS", "127.0.0.1:9090"),
            ("HEALTH_PROBE_BIND_ADDRESS", "127.0.0.1:9091"),
            ("ENABLE_LEADER_ELECTION", "true"),
            ("LEADER_ELECTION_NAMESPACE", "capi"),
            ("POD_NAME", "manager-0"),
            ("MANUAL_CSR_APPROVAL", "enable"),
        ]))
        .unwrap();
        assert_eq!(cfg.namespace.as_deref(), Some("clusters"));
        assert_eq!(cfg.metrics_bind_address.port(), 9090);
        assert_eq!(cfg.health_probe_bind_address.port(), 9091);
        assert!(cfg.enable_leader_election);
        assert_eq!(cfg.leader_election_namespace, "capi");
        assert_eq!(cfg.identity, "manager-0");
        assert!(cfg.manual_csr_approval);
    }

    #[test]
    fn test_manual_csr_approval_needs_enable() {
        let cfg = ManagerConfig::from_lookup(lookup(&[("MANUAL_CSR_APPROVAL", "true")])).unwrap();
        assert!(!cfg.manual_csr_approval);
    }

    #[test]
    fn test_invalid_values() {
        let err = ManagerConfig::from_lookup(lookup(&[("METRICS_BIND_ADDRESS", ":8080")])).unwrap_err();
        assert!(err.to_string().contains("METRICS_BIND_ADDRESS"));
        let err = ManagerConfig::from_lookup(lookup(&[("ENABLE_LEADER_ELECTION", "yes")])).unwrap_err();
        assert!(err.to_string().contains("ENABLE_LEADER_ELECTION"));
    }
}
