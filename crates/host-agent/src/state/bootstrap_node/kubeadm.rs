//! Kubeadm-mode join (spec.md §6 "kubeadm bootstrap secret format"): decode
//! the cloud-init `write_files` payload from the bootstrap secret, inject
//! this Host's provider-ID/labels/taints into any kubeadm configuration
//! document among those files, run the `runCmd` entries, then patch
//! `providerID` onto the resulting Node through the on-host kubelet
//! kubeconfig (spec.md 4.F: "after `kubeadm join` succeeds, patch
//! `providerID` using the on-host kubelet kubeconfig, not the controller's
//! client").

use std::collections::BTreeMap;
use std::time::Duration;

use host_lifecycle::annotations::{parse_autoscaler_labels, parse_autoscaler_taints, AUTOSCALER_LABELS_ANNOTATION, AUTOSCALER_TAINTS_ANNOTATION};
use host_lifecycle::cloudinit::{self, Encoding};
use host_lifecycle::kubeconfig::KUBECONFIG;
use host_lifecycle::types::Host;
use k8s_openapi::api::core::v1::{Secret, Taint};
use kube::api::{Api, Meta};
use serde::Deserialize;
use tracing::{instrument, warn};

use crate::context::AgentContext;

#[derive(Deserialize)]
struct WriteFile {
    path: String,
    content: String,
    #[serde(default)]
    encoding: String,
    #[serde(default)]
    owner: Option<String>,
    #[serde(default)]
    permissions: Option<String>,
    #[serde(default)]
    append: bool,
}

#[derive(Deserialize)]
struct CloudConfig {
    #[serde(default)]
    write_files: Vec<WriteFile>,
    #[serde(default, rename = "runCmd")]
    run_cmd: Vec<String>,
}

#[instrument(level = "info", skip(ctx, host))]
pub async fn join(ctx: &AgentContext, host: &Host) -> host_lifecycle::Result<()> {
    let secret_name = host
        .spec
        .bootstrap_secret_ref
        .as_deref()
        .ok_or_else(|| host_lifecycle::Error::Validation("host has no bootstrap_secret_ref".to_string()))?;

    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), "kube-system");
    let secret = secrets.get(secret_name).await.map_err(host_lifecycle::Error::Kube)?;

    let raw = secret
        .data
        .as_ref()
        .and_then(|d| d.get("value"))
        .ok_or_else(|| host_lifecycle::Error::NotFound(format!("secret {secret_name} has no value key")))?;

    let mut cloud_config: CloudConfig = serde_yaml::from_slice(&raw.0)
        .map_err(|e| host_lifecycle::Error::Validation(format!("malformed cloud-init document: {e}")))?;

    let labels = merged_labels(host);
    let taints = merged_taints(host);
    let provider_id = host_lifecycle::provider_id::format(&ctx.config.host_name);

    for file in &mut cloud_config.write_files {
        if is_kubeadm_config(&file.content) {
            file.content = inject_kubeadm_fields(&file.content, &provider_id, &labels, &taints)?;
        }
    }

    for file in &cloud_config.write_files {
        write_file(file).await?;
    }

    for cmd in &cloud_config.run_cmd {
        let mut parts = cmd.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| host_lifecycle::Error::Validation("empty runCmd entry".to_string()))?;
        let args: Vec<&str> = parts.collect();
        host_lifecycle::command::run(program, &args, Duration::from_secs(300)).await?;
    }

    patch_provider_id_via_kubelet_kubeconfig(&ctx.config.host_name, &provider_id).await?;

    Ok(())
}

fn merged_labels(host: &Host) -> BTreeMap<String, String> {
    let mut labels = host.spec.labels.clone();
    if let Some(raw) = host.meta().annotations.as_ref().and_then(|a| a.get(AUTOSCALER_LABELS_ANNOTATION)) {
        labels.extend(parse_autoscaler_labels(raw));
    }
    labels
}

fn merged_taints(host: &Host) -> Vec<Taint> {
    let mut taints = host.spec.taints.clone();
    if let Some(raw) = host.meta().annotations.as_ref().and_then(|a| a.get(AUTOSCALER_TAINTS_ANNOTATION)) {
        taints.extend(parse_autoscaler_taints(raw));
    }
    taints
}

/// A write_files entry is a kubeadm configuration document if it declares
/// `kind: InitConfiguration` or `kind: JoinConfiguration` (the two kinds
/// whose `nodeRegistration.kubeletExtraArgs` we need to extend).
fn is_kubeadm_config(content: &str) -> bool {
    serde_yaml::from_str::<serde_yaml::Value>(content)
        .ok()
        .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(str::to_string))
        .is_some_and(|kind| kind == "InitConfiguration" || kind == "JoinConfiguration")
}

/// Injects `--provider-id`, `--node-labels`, and `--register-with-taints`
/// into `nodeRegistration.kubeletExtraArgs`, parsed generically as
/// `serde_yaml::Value` rather than a hand-rolled kubeadm-typed struct —
/// kubeadm config documents carry far more fields than this agent needs to
/// understand.
fn inject_kubeadm_fields(
    content: &str,
    provider_id: &str,
    labels: &BTreeMap<String, String>,
    taints: &[Taint],
) -> host_lifecycle::Result<String> {
    let mut doc: serde_yaml::Value = serde_yaml::from_str(content)
        .map_err(|e| host_lifecycle::Error::Validation(format!("malformed kubeadm config: {e}")))?;

    let mapping = doc
        .as_mapping_mut()
        .ok_or_else(|| host_lifecycle::Error::Validation("kubeadm config is not a mapping".to_string()))?;

    let node_registration = mapping
        .entry(serde_yaml::Value::String("nodeRegistration".to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    let node_registration = node_registration
        .as_mapping_mut()
        .ok_or_else(|| host_lifecycle::Error::Validation("nodeRegistration is not a mapping".to_string()))?;

    let extra_args = node_registration
        .entry(serde_yaml::Value::String("kubeletExtraArgs".to_string()))
        .or_insert_with(|| serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
    let extra_args = extra_args
        .as_mapping_mut()
        .ok_or_else(|| host_lifecycle::Error::Validation("kubeletExtraArgs is not a mapping".to_string()))?;

    extra_args.insert(
        serde_yaml::Value::String("provider-id".to_string()),
        serde_yaml::Value::String(provider_id.to_string()),
    );

    if !labels.is_empty() {
        let joined = labels.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join(",");
        extra_args.insert(
            serde_yaml::Value::String("node-labels".to_string()),
            serde_yaml::Value::String(joined),
        );
    }

    if !taints.is_empty() {
        let joined = taints
            .iter()
            .map(|t| format!("{}={}:{}", t.key, t.value.clone().unwrap_or_default(), t.effect))
            .collect::<Vec<_>>()
            .join(",");
        extra_args.insert(
            serde_yaml::Value::String("register-with-taints".to_string()),
            serde_yaml::Value::String(joined),
        );
    }

    serde_yaml::to_string(&doc).map_err(|e| host_lifecycle::Error::Other(anyhow::anyhow!(e)))
}

async fn write_file(file: &WriteFile) -> host_lifecycle::Result<()> {
    let encoding = Encoding::parse(&file.encoding)?;
    let bytes = cloudinit::decode(&file.content, encoding)?;
    if let Some(parent) = std::path::Path::new(&file.path).parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    if file.append {
        use tokio::io::AsyncWriteExt;
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&file.path)
            .await?;
        handle.write_all(&bytes).await?;
    } else {
        tokio::fs::write(&file.path, &bytes).await?;
    }

    if let Some(perms) = &file.permissions {
        if let Err(e) = host_lifecycle::command::run("chmod", &[perms, &file.path], Duration::from_secs(10)).await {
            warn!(path = %file.path, error = %e, "failed to set permissions on write_files entry");
        }
    }

    if let Some(owner) = &file.owner {
        if let Err(e) = host_lifecycle::command::run("chown", &[owner, &file.path], Duration::from_secs(10)).await {
            warn!(path = %file.path, error = %e, "failed to set owner on write_files entry");
        }
    }

    Ok(())
}

/// Builds a throwaway client from the on-host kubelet kubeconfig (the
/// conventional kubeadm path) the same way krustlet's own bootstrapping
/// swaps `KUBECONFIG` and calls `kube::Config::infer()`, and patches
/// `providerID` through it — `kubeadm join` registers the Node under this
/// client's credentials, not the controller-manager's.
async fn patch_provider_id_via_kubelet_kubeconfig(host_name: &str, provider_id: &str) -> host_lifecycle::Result<()> {
    const KUBELET_KUBECONFIG_PATH: &str = "/etc/kubernetes/kubelet.conf";

    let previous = std::env::var_os(KUBECONFIG);
    std::env::set_var(KUBECONFIG, KUBELET_KUBECONFIG_PATH);
    let conf = kube::Config::infer().await;
    match previous {
        Some(v) => std::env::set_var(KUBECONFIG, v),
        None => std::env::remove_var(KUBECONFIG),
    }
    let conf = conf.map_err(|e| host_lifecycle::Error::Other(anyhow::anyhow!(e)))?;
    let client = kube::Client::try_from(conf).map_err(|e| host_lifecycle::Error::Other(anyhow::anyhow!(e)))?;

    host_lifecycle::node::set_provider_id(&client, host_name, provider_id).await
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn recognizes_init_and_join_configuration() {
        assert!(is_kubeadm_config("kind: InitConfiguration\napiVersion: kubeadm.k8s.io/v1beta3\n"));
        assert!(is_kubeadm_config("kind: JoinConfiguration\napiVersion: kubeadm.k8s.io/v1beta3\n"));
        assert!(!is_kubeadm_config("kind: ClusterConfiguration\n"));
    }

    #[test]
    fn injects_provider_id_and_labels_and_taints() {
        let content = "apiVersion: kubeadm.k8s.io/v1beta3\nkind: JoinConfiguration\n";
        let mut labels = BTreeMap::new();
        labels.insert("zone".to_string(), "a".to_string());
        let taints = vec![Taint {
            key: "dedicated".to_string(),
            value: Some("gpu".to_string()),
            effect: "NoSchedule".to_string(),
            time_added: None,
        }];
        let out = inject_kubeadm_fields(content, "hostlet://host-1", &labels, &taints).unwrap();
        let doc: serde_yaml::Value = serde_yaml::from_str(&out).unwrap();
        let extra_args = &doc["nodeRegistration"]["kubeletExtraArgs"];
        assert_eq!(extra_args["provider-id"], "hostlet://host-1");
        assert_eq!(extra_args["node-labels"], "zone=a");
        assert_eq!(extra_args["register-with-taints"], "dedicated=gpu:NoSchedule");
    }
}
