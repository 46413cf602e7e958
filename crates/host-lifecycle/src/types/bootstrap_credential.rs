//! The `BootstrapCredential` custom resource (spec.md §3, 4.B).
//!
//! One object per Machine awaiting a Host claim. The Bootstrap Credential
//! Mint watches these, mints a token or TLS-bootstrap kubeconfig, and
//! writes the result to `status` plus a materialized `Secret`.

use kube::CustomResource;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::error::{Error, Result};

fn api_server_url_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^https://[^\s:/]+:[0-9]{1,5}$").expect("static regex is valid"))
}

/// Validates the `https://host:port` shape required of `api_server_url`
/// (spec.md §3).
pub fn validate_api_server_url(url: &str) -> Result<()> {
    if api_server_url_re().is_match(url) {
        Ok(())
    } else {
        Err(Error::Validation(format!(
            "api_server_url {:?} is not a well-formed https://host:port",
            url
        )))
    }
}

/// `BootstrapCredential.spec` (spec.md §3, 4.B).
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "hostlet.io",
    version = "v1alpha1",
    kind = "BootstrapCredential",
    plural = "bootstrapcredentials",
    namespaced,
    status = "BootstrapCredentialStatus",
    derive = "Default"
)]
pub struct BootstrapCredentialSpec {
    /// Name of the Machine this credential is minted for.
    pub machine_name: String,

    /// `https://host:port` of the control-plane API server the minted
    /// credential should point the new node at.
    pub api_server_url: String,

    /// Base64-encoded PEM cluster CA certificate.
    pub ca_data: String,

    /// Target join protocol, mirrors the claimed Host's `JoinMode`.
    pub join_mode: crate::types::host::JoinMode,
}

/// `BootstrapCredential.status` (spec.md 4.B).
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct BootstrapCredentialStatus {
    /// Name of the `Secret` holding the assembled kubeconfig/cloud-init
    /// payload, once materialized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,

    #[serde(default)]
    pub secret_created: bool,

    /// Name of the underlying kubeadm bootstrap-token `Secret` in
    /// `kube-system`, when `join_mode == Kubeadm`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_secret_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accepts_well_formed_api_server_url() {
        assert!(validate_api_server_url("https://cp.example.internal:6443").is_ok());
    }

    #[test]
    fn rejects_missing_port() {
        assert!(validate_api_server_url("https://cp.example.internal").is_err());
    }

    #[test]
    fn rejects_non_https_scheme() {
        assert!(validate_api_server_url("http://cp.example.internal:6443").is_err());
    }
}
