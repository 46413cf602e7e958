use std::env;
use std::path::PathBuf;

use dirs::home_dir;

pub const KUBECONFIG: &str = "KUBECONFIG";

/// Search the kubeconfig file
pub(crate) fn exists() -> bool {
    path().unwrap_or_default().exists()
}

/// Returns kubeconfig path from specified environment variable.
fn path() -> Option<PathBuf> {
    env::var_os(KUBECONFIG)
        .map(PathBuf::from)
        .or_else(default_path)
}

/// Returns kubeconfig path from `$HOME/.kube/config`.
fn default_path() -> Option<PathBuf> {
    home_dir().map(|h| h.join(".kube").join("config"))
}

/// Assembles a minimal bootstrap kubeconfig (spec.md 4.B, §6 "kubeadm
/// bootstrap secret format"): one cluster, one user authenticated by a
/// bootstrap token, one context. Serialized with `serde_yaml` the way any
/// `kube`-adjacent tool in this ecosystem emits kubeconfig documents.
pub fn bootstrap_kubeconfig(
    cluster_name: &str,
    server: &str,
    ca_data_base64: &str,
    bootstrap_token: &str,
) -> crate::error::Result<String> {
    let doc = serde_yaml::to_string(&BootstrapKubeconfig {
        api_version: "v1".to_string(),
        kind: "Config".to_string(),
        clusters: vec![NamedCluster {
            name: cluster_name.to_string(),
            cluster: Cluster {
                server: server.to_string(),
                certificate_authority_data: ca_data_base64.to_string(),
            },
        }],
        users: vec![NamedUser {
            name: "tls-bootstrap-token-user".to_string(),
            user: User {
                token: bootstrap_token.to_string(),
            },
        }],
        contexts: vec![NamedContext {
            name: "bootstrap-context".to_string(),
            context: Context {
                cluster: cluster_name.to_string(),
                user: "tls-bootstrap-token-user".to_string(),
            },
        }],
        current_context: "bootstrap-context".to_string(),
    })
    .map_err(|e| crate::error::Error::Other(anyhow::anyhow!(e)))?;
    Ok(doc)
}

#[derive(serde::Serialize)]
struct BootstrapKubeconfig {
    #[serde(rename = "apiVersion")]
    api_version: String,
    kind: String,
    clusters: Vec<NamedCluster>,
    users: Vec<NamedUser>,
    contexts: Vec<NamedContext>,
    #[serde(rename = "current-context")]
    current_context: String,
}

#[derive(serde::Serialize)]
struct NamedCluster {
    name: String,
    cluster: Cluster,
}

#[derive(serde::Serialize)]
struct Cluster {
    server: String,
    #[serde(rename = "certificate-authority-data")]
    certificate_authority_data: String,
}

#[derive(serde::Serialize)]
struct NamedUser {
    name: String,
    user: User,
}

#[derive(serde::Serialize)]
struct User {
    token: String,
}

#[derive(serde::Serialize)]
struct NamedContext {
    name: String,
    context: Context,
}

#[derive(serde::Serialize)]
struct Context {
    cluster: String,
    user: String,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bootstrap_kubeconfig_round_trips_through_yaml() {
        let doc = bootstrap_kubeconfig(
            "my-cluster",
            "https://cp.example.internal:6443",
            "base64-ca-data",
            "abcdef.0123456789abcdef",
        )
        .unwrap();
        let value: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        assert_eq!(value["current-context"], "bootstrap-context");
        assert_eq!(value["users"][0]["user"]["token"], "abcdef.0123456789abcdef");
    }
}
