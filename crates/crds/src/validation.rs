//! Admission rules
//!
//! Pure checks applied to ByoHost and BootstrapKubeconfig writes. Hosts may only
//! be written by their own agent or by the manager, and a claimed host cannot be
//! deleted. A BootstrapKubeconfig must name an `https://host:port` API server and
//! carry a base64 encoded PEM CA.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

use crate::bootstrap_kubeconfig::BootstrapKubeconfigSpec;

/// Service account the manager runs as
pub const MANAGER_SERVICE_ACCOUNT: &str = "system:serviceaccount:byoh-system:byoh-controller-manager";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("cannot delete ByoHost when MachineRef is assigned")]
    HostClaimed,

    #[error("{0} is not a valid agent username")]
    InvalidUsername(String),

    #[error("{user} cannot create/update resource {host}")]
    Forbidden { user: String, host: String },

    /// Rendered like an apiserver field error
    #[error("{path}: Invalid value: {value:?}: {message}")]
    InvalidField {
        path: &'static str,
        value: String,
        message: &'static str,
    },
}

/// Only scheme accepted for a BootstrapKubeconfig API server
pub const API_SERVER_URL_SCHEME: &str = "https";

/// Denies deleting a host that still has a machineRef.
pub fn validate_host_delete(has_machine_ref: bool) -> Result<(), ValidationError> {
    if has_machine_ref {
        return Err(ValidationError::HostClaimed);
    }
    Ok(())
}

/// Checks that `username` may create or update the host named `host_name`.
///
/// Agent usernames look like `byoh:hosts:<hostname>`; the third segment must be
/// contained in the host name.
pub fn validate_host_write(host_name: &str, username: &str, is_update: bool) -> Result<(), ValidationError> {
    if is_update && username == MANAGER_SERVICE_ACCOUNT {
        return Ok(());
    }

    let parts: Vec<&str> = username.split(':').collect();
    if parts.len() < 3 {
        return Err(ValidationError::InvalidUsername(username.to_string()));
    }

    if !host_name.contains(parts[2]) {
        return Err(ValidationError::Forbidden {
            user: username.to_string(),
            host: host_name.to_string(),
        });
    }
    Ok(())
}

/// Every field error of a BootstrapKubeconfig spec; empty when it is valid.
pub fn validate_bootstrap_kubeconfig(spec: &BootstrapKubeconfigSpec) -> Vec<ValidationError> {
    let mut errs = validate_api_server(&spec.api_server);
    errs.extend(validate_ca_data(&spec.certificate_authority_data));
    errs
}

fn validate_api_server(api_server: &str) -> Vec<ValidationError> {
    let invalid = |message| ValidationError::InvalidField {
        path: "spec.apiserver",
        value: api_server.to_string(),
        message,
    };
    const NOT_HTTPS_HOST_PORT: &str = "APIServer is not of the format https://hostname:port";

    let mut errs = Vec::new();
    if api_server.is_empty() {
        errs.push(invalid("APIServer field cannot be empty"));
    }
    match split_url(api_server) {
        None => {
            errs.push(invalid("APIServer URL is not valid"));
            errs.push(invalid(NOT_HTTPS_HOST_PORT));
        }
        Some(url) if url.scheme != API_SERVER_URL_SCHEME || url.host.is_empty() || url.port.is_empty() => {
            errs.push(invalid(NOT_HTTPS_HOST_PORT));
        }
        Some(_) => {}
    }
    errs
}

fn validate_ca_data(ca_data: &str) -> Vec<ValidationError> {
    let invalid = |message| ValidationError::InvalidField {
        path: "spec.caData",
        value: ca_data.to_string(),
        message,
    };
    const NOT_PEM: &str = "CertificateAuthorityData is not PEM encoded";

    let mut errs = Vec::new();
    if ca_data.is_empty() {
        errs.push(invalid("CertificateAuthorityData field cannot be empty"));
    }
    match STANDARD.decode(ca_data) {
        Err(_) => {
            errs.push(invalid("cannot base64 decode CertificateAuthorityData"));
            errs.push(invalid(NOT_PEM));
        }
        Ok(decoded) if !contains_pem_block(&decoded) => errs.push(invalid(NOT_PEM)),
        Ok(_) => {}
    }
    errs
}

#[derive(Debug, Default, PartialEq, Eq)]
struct UrlParts<'a> {
    scheme: &'a str,
    host: &'a str,
    port: &'a str,
}

/// Splits an absolute URL into scheme, host and port. `None` when the string
/// is not a URL at all; a URL without authority yields an empty host.
fn split_url(raw: &str) -> Option<UrlParts<'_>> {
    if raw.chars().any(|c| c.is_control() || c == ' ') {
        return None;
    }
    let Some((scheme, rest)) = raw.split_once("://") else {
        // `host:port` reads as scheme `host`, which must then be a valid scheme
        return match raw.split_once(':') {
            Some((scheme, _)) if !is_scheme(scheme) => None,
            _ => Some(UrlParts::default()),
        };
    };
    if !is_scheme(scheme) {
        return None;
    }

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit_once('@').map_or(authority, |(_, hp)| hp);
    let (host, port) = match host_port.strip_prefix('[') {
        Some(bracketed) => {
            let (host, after) = bracketed.split_once(']')?;
            if after.is_empty() { (host, "") } else { (host, after.strip_prefix(':')?) }
        }
        None => host_port.rsplit_once(':').unwrap_or((host_port, "")),
    };
    if !port.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(UrlParts { scheme, host, port })
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// True when `data` holds a `-----BEGIN <label>-----` line closed by the
/// matching END line.
fn contains_pem_block(data: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(data) else {
        return false;
    };
    let Some(start) = text.find("-----BEGIN ") else {
        return false;
    };
    let Some((label, body)) = text[start + "-----BEGIN ".len()..].split_once("-----") else {
        return false;
    };
    !label.contains('\n') && body.contains(&format!("-----END {}-----", label))
}
