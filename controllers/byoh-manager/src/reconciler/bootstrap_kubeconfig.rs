//! BootstrapKubeconfig reconciliation
//!
//! Issues a kubeadm bootstrap token and renders the kubeconfig a host agent
//! registers with. The kubeconfig is generated once; later passes leave a
//! populated status alone, so an issued token is never rotated here.

use std::collections::BTreeMap;

use byoh_client::persist;
use chrono::{SecondsFormat, Utc};
use crds::validation::validate_bootstrap_kubeconfig;
use crds::{DEFAULT_CLUSTER_NAME, DEFAULT_CONTEXT_NAME, DEFAULT_USER_NAME};
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube_runtime::controller::Action;
use rand::Rng;
use tracing::{debug, error, info};

use super::Reconciler;
use crate::error::ControllerError;

/// Namespace kubeadm bootstrap token secrets live in.
pub const BOOTSTRAP_TOKEN_NAMESPACE: &str = "kube-system";

pub const BOOTSTRAP_TOKEN_SECRET_PREFIX: &str = "bootstrap-token-";

pub const BOOTSTRAP_TOKEN_SECRET_TYPE: &str = "bootstrap.kubernetes.io/token";

/// Group the node authorizer and CSR approver grant bootstrap permissions to.
pub const BOOTSTRAP_TOKEN_GROUP: &str = "system:bootstrappers:kubeadm:default-node-token";

/// Lifetime of an issued bootstrap token.
pub const BOOTSTRAP_TOKEN_TTL_MINUTES: i64 = 30;

const TOKEN_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const TOKEN_ID_LENGTH: usize = 6;
const TOKEN_SECRET_LENGTH: usize = 16;

/// kubeadm bootstrap token, `<id>.<secret>`.
#[derive(Clone, PartialEq, Eq)]
pub struct BootstrapToken {
    pub id: String,
    pub secret: String,
}

impl std::fmt::Debug for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapToken").field("id", &self.id).finish_non_exhaustive()
    }
}

impl std::fmt::Display for BootstrapToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.id, self.secret)
    }
}

impl BootstrapToken {
    pub fn generate() -> Self {
        Self {
            id: random_token_part(TOKEN_ID_LENGTH),
            secret: random_token_part(TOKEN_SECRET_LENGTH),
        }
    }

    /// `bootstrap-token-<id>` in kube-system, expiring `ttl` from now.
    pub fn to_secret(&self, ttl: chrono::Duration) -> Secret {
        let expiration = (Utc::now() + ttl).to_rfc3339_opts(SecondsFormat::Secs, true);
        let data = [
            ("token-id", self.id.as_str()),
            ("token-secret", self.secret.as_str()),
            ("expiration", expiration.as_str()),
            ("usage-bootstrap-authentication", "true"),
            ("usage-bootstrap-signing", "true"),
            ("auth-extra-groups", BOOTSTRAP_TOKEN_GROUP),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
        .collect::<BTreeMap<_, _>>();

        Secret {
            metadata: ObjectMeta {
                name: Some(format!("{}{}", BOOTSTRAP_TOKEN_SECRET_PREFIX, self.id)),
                namespace: Some(BOOTSTRAP_TOKEN_NAMESPACE.to_string()),
                ..Default::default()
            },
            type_: Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }
}

fn random_token_part(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| TOKEN_CHARSET[rng.random_range(0..TOKEN_CHARSET.len())] as char)
        .collect()
}

/// Kubeconfig YAML authenticating with `token` against `api_server`.
/// `ca_data` is already base64 encoded and is embedded as-is.
pub fn render_bootstrap_kubeconfig(api_server: &str, ca_data: &str, insecure_skip_tls_verify: bool, token: &BootstrapToken) -> String {
    format!(
        r#"apiVersion: v1
kind: Config
clusters:
- cluster:
    server: {server}
    certificate-authority-data: {ca_data}
    insecure-skip-tls-verify: {insecure}
  name: {cluster}
contexts:
- context:
    cluster: {cluster}
    user: {user}
  name: {context}
current-context: {context}
preferences: {{}}
users:
- name: {user}
  user:
    token: {token}
"#,
        server = api_server,
        ca_data = ca_data,
        insecure = insecure_skip_tls_verify,
        cluster = DEFAULT_CLUSTER_NAME,
        context = DEFAULT_CONTEXT_NAME,
        user = DEFAULT_USER_NAME,
        token = token,
    )
}

impl Reconciler {
    /// Reconciles the BootstrapKubeconfig `namespace/name`.
    pub async fn reconcile_bootstrap_kubeconfig(&self, namespace: &str, name: &str) -> Result<Action, ControllerError> {
        info!("Reconciling BootstrapKubeconfig {}/{}", namespace, name);
        let Some(bootstrap_kubeconfig) = self.bootstrap_kubeconfigs.get_opt(namespace, name).await? else {
            debug!("BootstrapKubeconfig {}/{} not found", namespace, name);
            return Ok(Action::await_change());
        };
        if bootstrap_kubeconfig.kubeconfig_data().is_some() {
            debug!("BootstrapKubeconfig {}/{} already has kubeconfig data", namespace, name);
            return Ok(Action::await_change());
        }

        let errs = validate_bootstrap_kubeconfig(&bootstrap_kubeconfig.spec);
        if !errs.is_empty() {
            let reasons = errs.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
            error!("BootstrapKubeconfig {}/{} is invalid: {}", namespace, name, reasons);
            return Err(ControllerError::InvalidBootstrapKubeconfig {
                namespace: namespace.to_string(),
                name: name.to_string(),
                reasons,
            });
        }

        let token = BootstrapToken::generate();
        let ttl = chrono::Duration::minutes(BOOTSTRAP_TOKEN_TTL_MINUTES);
        self.secrets.create(&token.to_secret(ttl)).await.map_err(|e| {
            error!("Failed to create bootstrap token secret for BootstrapKubeconfig {}/{}: {}", namespace, name, e);
            e
        })?;
        info!("Created bootstrap token {} for BootstrapKubeconfig {}/{}", token.id, namespace, name);

        let spec = &bootstrap_kubeconfig.spec;
        let mut desired = bootstrap_kubeconfig.clone();
        desired.status_mut().bootstrap_kubeconfig_data = Some(render_bootstrap_kubeconfig(
            &spec.api_server,
            &spec.certificate_authority_data,
            spec.insecure_skip_tls_verify,
            &token,
        ));
        persist(self.bootstrap_kubeconfigs.as_ref(), &bootstrap_kubeconfig, &desired).await?;
        Ok(Action::await_change())
    }
}
