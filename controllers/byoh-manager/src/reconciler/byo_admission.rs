//! Auto-approval of host agent CertificateSigningRequests.
//!
//! Agents bootstrap their client certificates with CSRs named `byoh-csr-*`.
//! Unless manual approval is enabled, the manager approves every such CSR that
//! has neither been approved nor denied yet.

use chrono::Utc;
use k8s_openapi::api::certificates::v1::CertificateSigningRequest;
use kube::api::{Patch, PatchParams};
use kube::{Api, ResourceExt};
use kube_runtime::controller::Action;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::error::ControllerError;

/// Name prefix of CSRs created by host agents.
pub const BYOH_CSR_PREFIX: &str = "byoh-csr-";

pub const APPROVAL_REASON: &str = "Approved by ByoAdmission Controller";

/// Approves host agent CSRs.
#[derive(Clone)]
pub struct CsrApprover {
    api: Api<CertificateSigningRequest>,
}

impl std::fmt::Debug for CsrApprover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrApprover").finish_non_exhaustive()
    }
}

impl CsrApprover {
    pub fn new(api: Api<CertificateSigningRequest>) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &Api<CertificateSigningRequest> {
        &self.api
    }

    /// Approves the CSR when it came from a host agent and is still pending.
    pub async fn reconcile_csr(&self, csr: &CertificateSigningRequest) -> Result<Action, ControllerError> {
        let name = csr.name_any();
        if !needs_approval(csr) {
            debug!("CSR {} needs no approval", name);
            return Ok(Action::await_change());
        }

        info!("Approving CSR {}", name);
        self.api
            .patch_approval(&name, &PatchParams::default(), &Patch::Merge(approval_patch(csr)))
            .await?;
        info!("CSR {} approved", name);
        Ok(Action::await_change())
    }
}

/// `byoh-csr-*` and neither Approved nor Denied.
pub fn needs_approval(csr: &CertificateSigningRequest) -> bool {
    if !csr.name_any().starts_with(BYOH_CSR_PREFIX) {
        return false;
    }
    let decided = csr
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| conds.iter().any(|c| c.type_ == "Approved" || c.type_ == "Denied"));
    !decided
}

/// Merge patch appending an Approved condition to the existing ones.
pub fn approval_patch(csr: &CertificateSigningRequest) -> Value {
    let mut conditions: Vec<Value> = csr
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conds| conds.iter().filter_map(|c| serde_json::to_value(c).ok()).collect())
        .unwrap_or_default();
    conditions.push(json!({
        "type": "Approved",
        "status": "True",
        "reason": APPROVAL_REASON,
        "lastUpdateTime": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
    }));
    json!({ "status": { "conditions": conditions } })
}
