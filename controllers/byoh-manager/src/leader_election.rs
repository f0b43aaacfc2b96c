//! Leader election on a coordination.k8s.io/v1 Lease.
//!
//! Every write carries the resourceVersion that was read, so two managers
//! racing for the Lease cannot both win: the loser gets a 409 and retries.
//! Reconcilers only start once the Lease is held, and losing it stops the
//! process.

use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use k8s_openapi::api::coordination::v1::Lease;
use kube::api::PostParams;
use kube::{Api, Client};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::error::ControllerError;

/// Lease shared by all manager replicas.
pub const LEADER_LEASE_NAME: &str = "controller-leader-election-caph";

const LEASE_DURATION: Duration = Duration::from_secs(30);
const RENEW_INTERVAL: Duration = Duration::from_secs(10);
const RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub struct LeaderElector {
    api: Api<Lease>,
    identity: String,
}

impl std::fmt::Debug for LeaderElector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaderElector").field("identity", &self.identity).finish_non_exhaustive()
    }
}

impl LeaderElector {
    pub fn new(client: Client, namespace: &str, identity: &str) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            identity: identity.to_string(),
        }
    }

    /// Blocks until this replica holds the Lease.
    pub async fn acquire(&self) {
        info!("Waiting for leadership on Lease {} as {}", LEADER_LEASE_NAME, self.identity);
        loop {
            match self.try_acquire_or_renew().await {
                Ok(true) => {
                    info!("Leadership acquired by {}", self.identity);
                    return;
                }
                Ok(false) => debug!("Lease {} held by another replica", LEADER_LEASE_NAME),
                Err(e) => warn!("Failed to acquire Lease {}: {}", LEADER_LEASE_NAME, e),
            }
            tokio::time::sleep(RETRY_INTERVAL).await;
        }
    }

    /// Renews the Lease until it is lost, then returns the error that stops
    /// the manager.
    pub async fn hold(&self) -> Result<(), ControllerError> {
        loop {
            tokio::time::sleep(RENEW_INTERVAL).await;
            match self.try_acquire_or_renew().await {
                Ok(true) => debug!("Lease {} renewed", LEADER_LEASE_NAME),
                Ok(false) => {
                    return Err(ControllerError::LeaderElection(format!(
                        "Lease {} taken over by another replica",
                        LEADER_LEASE_NAME
                    )));
                }
                Err(e) => {
                    return Err(ControllerError::LeaderElection(format!(
                        "failed to renew Lease {}: {}",
                        LEADER_LEASE_NAME, e
                    )));
                }
            }
        }
    }

    async fn try_acquire_or_renew(&self) -> Result<bool, ControllerError> {
        let now = Utc::now();
        let existing = match self.api.get(LEADER_LEASE_NAME).await {
            Ok(lease) => lease,
            Err(kube::Error::Api(e)) if e.code == 404 => {
                let lease = lease_body(&self.identity, now, 0, None)?;
                return self.write(self.api.create(&PostParams::default(), &lease).await);
            }
            Err(e) => return Err(e.into()),
        };

        let spec = existing.spec.clone().unwrap_or_default();
        let rv = existing.metadata.resource_version.clone();

        if spec.holder_identity.as_deref() == Some(self.identity.as_str()) {
            let mut renewed = existing;
            if let Some(spec) = renewed.spec.as_mut() {
                spec.renew_time = serde_json::from_value(json!(micro_time(now)))
                    .map_err(|e| ControllerError::LeaderElection(format!("invalid renew time: {}", e)))?;
            }
            return self.write(self.api.replace(LEADER_LEASE_NAME, &PostParams::default(), &renewed).await);
        }

        let renew_time = spec
            .renew_time
            .as_ref()
            .and_then(|t| serde_json::to_value(t).ok())
            .and_then(|v| v.as_str().map(str::to_string));
        if !lease_expired(renew_time.as_deref(), spec.lease_duration_seconds, now) {
            return Ok(false);
        }

        let transitions = spec.lease_transitions.unwrap_or(0) + 1;
        info!(
            "Lease {} held by {:?} expired, taking over (transition {})",
            LEADER_LEASE_NAME, spec.holder_identity, transitions
        );
        let lease = lease_body(&self.identity, now, transitions, rv)?;
        self.write(self.api.replace(LEADER_LEASE_NAME, &PostParams::default(), &lease).await)
    }

    /// `true` when the write went through, `false` when another replica won.
    fn write(&self, result: Result<Lease, kube::Error>) -> Result<bool, ControllerError> {
        match result {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                debug!("Lease {} write by {} conflicted", LEADER_LEASE_NAME, self.identity);
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn micro_time(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Lease held by `identity` from `now`.
fn lease_body(
    identity: &str,
    now: DateTime<Utc>,
    transitions: i32,
    resource_version: Option<String>,
) -> Result<Lease, ControllerError> {
    let lease = serde_json::from_value(json!({
        "apiVersion": "coordination.k8s.io/v1",
        "kind": "Lease",
        "metadata": {
            "name": LEADER_LEASE_NAME,
            "resourceVersion": resource_version,
        },
        "spec": {
            "holderIdentity": identity,
            "leaseDurationSeconds": LEASE_DURATION.as_secs(),
            "acquireTime": micro_time(now),
            "renewTime": micro_time(now),
            "leaseTransitions": transitions,
        },
    }))
    .map_err(|e| ControllerError::LeaderElection(format!("invalid Lease: {}", e)))?;
    Ok(lease)
}

/// A Lease without a renew time or duration counts as expired.
pub fn lease_expired(renew_time: Option<&str>, duration_seconds: Option<i32>, now: DateTime<Utc>) -> bool {
    let renewed = renew_time.and_then(|t| DateTime::parse_from_rfc3339(t).ok());
    match (renewed, duration_seconds) {
        (Some(renewed), Some(duration)) => {
            now > renewed.with_timezone(&Utc) + chrono::Duration::seconds(i64::from(duration))
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_lease_expired() {
        let now = at("2026-01-01T00:01:00Z");
        assert!(!lease_expired(Some("2026-01-01T00:00:45.123456Z"), Some(30), now));
        assert!(lease_expired(Some("2026-01-01T00:00:10Z"), Some(30), now));
        assert!(!lease_expired(Some("2026-01-01T00:00:30Z"), Some(30), now));
    }

    #[test]
    fn test_incomplete_lease_is_expired() {
        let now = at("2026-01-01T00:01:00Z");
        assert!(lease_expired(None, Some(30), now));
        assert!(lease_expired(Some("2026-01-01T00:00:59Z"), None, now));
        assert!(lease_expired(Some("yesterday"), Some(30), now));
    }

    #[test]
    fn test_lease_body() {
        let lease = lease_body("manager-0", at("2026-01-01T00:00:00Z"), 3, Some("42".to_string())).unwrap();
        assert_eq!(lease.metadata.name.as_deref(), Some(LEADER_LEASE_NAME));
        assert_eq!(lease.metadata.resource_version.as_deref(), Some("42"));
        let spec = lease.spec.unwrap();
        assert_eq!(spec.holder_identity.as_deref(), Some("manager-0"));
        assert_eq!(spec.lease_duration_seconds, Some(30));
        assert_eq!(spec.lease_transitions, Some(3));
        let renew = serde_json::to_value(spec.renew_time.unwrap()).unwrap();
        assert!(renew.as_str().unwrap().starts_with("2026-01-01T00:00:00"));
    }
}
