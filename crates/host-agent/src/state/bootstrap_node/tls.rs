//! TLS-bootstrap mode join (spec.md §6 "TLS-bootstrap secret format",
//! spec.md 4.F "BootstrapNode — TLS-bootstrap path"): write the assembled
//! secret's contents to their conventional on-host paths, synthesizing any
//! config the secret didn't carry, then lay down and start a kubelet
//! systemd unit so it self-registers and its CSR gets auto-approved by the
//! controller-manager (spec.md 4.C).

use std::time::Duration;

use host_lifecycle::annotations::{
    CONTROL_PLANE_ENDPOINT_ANNOTATION, AUTOSCALER_LABELS_ANNOTATION, AUTOSCALER_TAINTS_ANNOTATION,
};
use host_lifecycle::annotations::{parse_autoscaler_labels, parse_autoscaler_taints};
use host_lifecycle::types::Host;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Meta};
use tracing::{instrument, warn};

use crate::context::AgentContext;

/// `ca.crt` is written to every conventional path a kubelet or kube-proxy
/// might look for it, best-effort (spec.md 4.F: "write `ca.crt` to multiple
/// conventional paths (best-effort)").
const CA_CERT_PATHS: &[&str] = &[
    "/etc/kubernetes/pki/ca.crt",
    "/var/lib/kubelet/ca.crt",
    "/var/lib/kube-proxy/ca.crt",
];

const BOOTSTRAP_KUBECONFIG_PATH: &str = "/etc/kubernetes/bootstrap-kubeconfig";
const KUBELET_CONFIG_PATH: &str = "/var/lib/kubelet/config.yaml";
const KUBE_PROXY_CONFIG_PATH: &str = "/var/lib/kube-proxy/kube-proxy-config.yaml";
const KUBE_PROXY_KUBECONFIG_PATH: &str = "/var/lib/kube-proxy/kubeconfig";
const KUBELET_UNIT_PATH: &str = "/etc/systemd/system/kubelet.service";
const KUBE_PROXY_UNIT_PATH: &str = "/etc/systemd/system/kube-proxy.service";

#[instrument(level = "info", skip(ctx, host))]
pub async fn join(ctx: &AgentContext, host: &Host) -> host_lifecycle::Result<()> {
    let secret_name = host
        .spec
        .bootstrap_secret_ref
        .as_deref()
        .ok_or_else(|| host_lifecycle::Error::Validation("host has no bootstrap_secret_ref".to_string()))?;

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), "kube-system");
    let secret = secrets.get(secret_name).await.map_err(host_lifecycle::Error::Kube)?;
    let data = secret
        .data
        .ok_or_else(|| host_lifecycle::Error::NotFound(format!("secret {secret_name} has no data")))?;

    let endpoint = host
        .meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(CONTROL_PLANE_ENDPOINT_ANNOTATION))
        .ok_or_else(|| host_lifecycle::Error::Validation(format!("host has no {CONTROL_PLANE_ENDPOINT_ANNOTATION} annotation")))?;

    let ca_crt = data
        .get("ca.crt")
        .ok_or_else(|| host_lifecycle::Error::NotFound(format!("secret {secret_name} missing key ca.crt")))?;
    for path in CA_CERT_PATHS {
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        if let Err(e) = tokio::fs::write(path, &ca_crt.0).await {
            warn!(path, error = %e, "failed to write ca.crt to a conventional path, continuing");
        }
    }

    let bootstrap_kubeconfig = data
        .get("bootstrap-kubeconfig")
        .ok_or_else(|| host_lifecycle::Error::NotFound(format!("secret {secret_name} missing key bootstrap-kubeconfig")))?;
    write_file_0600(BOOTSTRAP_KUBECONFIG_PATH, &bootstrap_kubeconfig.0).await?;

    let kubelet_config = data
        .get("kubelet-config.yaml")
        .map(|b| b.0.clone())
        .unwrap_or_else(|| synthesize_kubelet_config(endpoint).into_bytes());
    tokio::fs::create_dir_all("/var/lib/kubelet").await?;
    tokio::fs::write(KUBELET_CONFIG_PATH, &kubelet_config).await?;

    let labels = merged_labels(host);
    let taints = merged_taints(host);
    let provider_id = host_lifecycle::provider_id::format(&ctx.config.host_name);

    write_kubelet_unit(&provider_id, &labels, &taints).await?;
    host_lifecycle::command::run("systemctl", &["daemon-reload"], Duration::from_secs(30)).await?;
    host_lifecycle::command::run("systemctl", &["enable", "kubelet"], Duration::from_secs(30)).await?;
    host_lifecycle::command::run("systemctl", &["restart", "kubelet"], Duration::from_secs(60)).await?;

    if host.spec.manage_kube_proxy {
        let kube_proxy_config = data
            .get("kube-proxy-config.yaml")
            .map(|b| b.0.clone())
            .unwrap_or_else(|| synthesize_kube_proxy_config(endpoint).into_bytes());
        tokio::fs::create_dir_all("/var/lib/kube-proxy").await?;
        tokio::fs::write(KUBE_PROXY_CONFIG_PATH, &kube_proxy_config).await?;

        let kube_proxy_kubeconfig = data
            .get("kube-proxy.kubeconfig")
            .map(|b| b.0.clone())
            .unwrap_or_else(|| bootstrap_kubeconfig.0.clone());
        tokio::fs::write(KUBE_PROXY_KUBECONFIG_PATH, &kube_proxy_kubeconfig).await?;

        write_kube_proxy_unit().await?;
        host_lifecycle::command::run("systemctl", &["daemon-reload"], Duration::from_secs(30)).await?;
        host_lifecycle::command::run("systemctl", &["enable", "kube-proxy"], Duration::from_secs(30)).await?;
        host_lifecycle::command::run("systemctl", &["restart", "kube-proxy"], Duration::from_secs(60)).await?;
    }

    Ok(())
}

fn merged_labels(host: &Host) -> std::collections::BTreeMap<String, String> {
    let mut labels = host.spec.labels.clone();
    if let Some(raw) = host.meta().annotations.as_ref().and_then(|a| a.get(AUTOSCALER_LABELS_ANNOTATION)) {
        labels.extend(parse_autoscaler_labels(raw));
    }
    labels
}

fn merged_taints(host: &Host) -> Vec<k8s_openapi::api::core::v1::Taint> {
    let mut taints = host.spec.taints.clone();
    if let Some(raw) = host.meta().annotations.as_ref().and_then(|a| a.get(AUTOSCALER_TAINTS_ANNOTATION)) {
        taints.extend(parse_autoscaler_taints(raw));
    }
    taints
}

async fn write_file_0600(path: &str, contents: &[u8]) -> host_lifecycle::Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, contents).await?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(path, perms).await?;
    }
    Ok(())
}

fn synthesize_kubelet_config(endpoint: &str) -> String {
    format!(
        "apiVersion: kubelet.config.k8s.io/v1beta1\nkind: KubeletConfiguration\nclusterDNS:\n  - 10.96.0.10\nauthentication:\n  anonymous:\n    enabled: false\n# synthesized: endpoint {endpoint} had no published kubelet-config\n"
    )
}

fn synthesize_kube_proxy_config(endpoint: &str) -> String {
    format!(
        "apiVersion: kubeproxy.config.k8s.io/v1alpha1\nkind: KubeProxyConfiguration\nmode: iptables\n# synthesized: endpoint {endpoint} had no published kube-proxy config\n"
    )
}

async fn write_kubelet_unit(
    provider_id: &str,
    labels: &std::collections::BTreeMap<String, String>,
    taints: &[k8s_openapi::api::core::v1::Taint],
) -> host_lifecycle::Result<()> {
    let mut exec_start = format!(
        "/usr/bin/kubelet --bootstrap-kubeconfig={BOOTSTRAP_KUBECONFIG_PATH} --kubeconfig=/etc/kubernetes/kubelet.conf --cert-dir=/var/lib/kubelet/pki --config={KUBELET_CONFIG_PATH} --rotate-certificates=true --provider-id={provider_id}"
    );
    if !labels.is_empty() {
        let joined = labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
        exec_start.push_str(&format!(" --node-labels={joined}"));
    }
    if !taints.is_empty() {
        let joined = taints
            .iter()
            .map(|t| format!("{}={}:{}", t.key, t.value.clone().unwrap_or_default(), t.effect))
            .collect::<Vec<_>>()
            .join(",");
        exec_start.push_str(&format!(" --register-with-taints={joined}"));
    }
    exec_start.push_str(" --cluster-dns=10.96.0.10");

    let unit = format!(
        "[Unit]\nDescription=kubelet\nAfter=network-online.target\nWants=network-online.target\n\n[Service]\nExecStart={exec_start}\nRestart=always\nStartLimitInterval=0\n\n[Install]\nWantedBy=multi-user.target\n"
    );
    tokio::fs::write(KUBELET_UNIT_PATH, unit).await?;
    Ok(())
}

async fn write_kube_proxy_unit() -> host_lifecycle::Result<()> {
    let unit = format!(
        "[Unit]\nDescription=kube-proxy\nAfter=network-online.target\nWants=network-online.target\n\n[Service]\nExecStart=/usr/bin/kube-proxy --config={KUBE_PROXY_CONFIG_PATH} --kubeconfig={KUBE_PROXY_KUBECONFIG_PATH}\nRestart=always\nStartLimitInterval=0\n\n[Install]\nWantedBy=multi-user.target\n"
    );
    tokio::fs::write(KUBE_PROXY_UNIT_PATH, unit).await?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn synthesized_kubelet_config_is_valid_yaml() {
        let doc = synthesize_kubelet_config("https://cp.example.internal:6443");
        let value: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        assert_eq!(value["kind"], "KubeletConfiguration");
    }

    #[test]
    fn synthesized_kube_proxy_config_is_valid_yaml() {
        let doc = synthesize_kube_proxy_config("https://cp.example.internal:6443");
        let value: serde_yaml::Value = serde_yaml::from_str(&doc).unwrap();
        assert_eq!(value["kind"], "KubeProxyConfiguration");
    }
}
