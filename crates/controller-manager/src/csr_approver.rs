//! CSR Auto-Approver (spec.md 4.C): approves the two classes of
//! `CertificateSigningRequest` this system expects kubelets to produce.

use futures::TryStreamExt;
use host_lifecycle::error::Error;
use k8s_openapi::api::certificates::v1::{CertificateSigningRequest, CertificateSigningRequestCondition};
use kube::api::{Api, ListParams, Meta};
use kube_runtime::watcher;
use tracing::{info, instrument, warn};

use crate::context::ControllerContext;

const KUBE_APISERVER_CLIENT_SIGNER: &str = "kubernetes.io/kube-apiserver-client";
const KUBELET_SERVING_SIGNER: &str = "kubernetes.io/kubelet-serving";

/// Name prefix the Host Reconciler's kubelet bootstrap flow gives its
/// client CSRs (spec.md 4.C: "Name prefix `<provider-prefix>-csr-`").
pub const CSR_NAME_PREFIX: &str = "hostlet-csr-";

#[instrument(level = "info", skip(ctx))]
pub async fn run(ctx: ControllerContext) {
    let api: Api<CertificateSigningRequest> = Api::all(ctx.client.clone());
    let mut stream = watcher(api, ListParams::default()).boxed();

    loop {
        match stream.try_next().await {
            Ok(Some(watcher::Event::Applied(csr))) => {
                if let Err(e) = reconcile_csr(&ctx, &csr).await {
                    warn!(csr = %csr.name(), error = %e, "csr reconcile failed");
                }
            }
            Ok(Some(watcher::Event::Restarted(csrs))) => {
                for csr in csrs {
                    if let Err(e) = reconcile_csr(&ctx, &csr).await {
                        warn!(csr = %csr.name(), error = %e, "csr reconcile failed on resync");
                    }
                }
            }
            Ok(Some(watcher::Event::Deleted(_))) => {}
            Ok(None) => break,
            Err(e) => warn!(error = %e, "error streaming csr events"),
        }
    }
}

fn is_in_scope(csr: &CertificateSigningRequest) -> bool {
    let signer = csr.spec.signer_name.as_str();
    if signer == KUBELET_SERVING_SIGNER {
        return true;
    }
    signer == KUBE_APISERVER_CLIENT_SIGNER && csr.name().starts_with(CSR_NAME_PREFIX)
}

fn already_decided(csr: &CertificateSigningRequest) -> bool {
    csr.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map_or(false, |conds| conds.iter().any(|c| c.type_ == "Approved" || c.type_ == "Denied"))
}

#[instrument(level = "debug", skip(ctx, csr), fields(csr = %csr.name()))]
async fn reconcile_csr(ctx: &ControllerContext, csr: &CertificateSigningRequest) -> host_lifecycle::Result<()> {
    if !is_in_scope(csr) {
        return Ok(());
    }
    if already_decided(csr) {
        return Ok(());
    }

    let mut approved = csr.clone();
    let status = approved.status.get_or_insert_with(Default::default);
    status.conditions.get_or_insert_with(Vec::new).push(CertificateSigningRequestCondition {
        type_: "Approved".to_string(),
        status: "True".to_string(),
        reason: Some("HostletAutoApprove".to_string()),
        message: Some("approved by the host-lifecycle CSR auto-approver".to_string()),
        last_update_time: None,
        last_transition_time: None,
    });

    submit_approval(ctx, &approved).await?;
    info!(csr = %csr.name(), signer = csr.spec.signer_name, "approved csr");
    Ok(())
}

/// Submits the `/approval` subresource directly: the generic `Api<K>`
/// surface has no typed helper for it, so this goes through the client's
/// low-level `request` escape hatch the same way `Api<K>`'s own typed
/// methods are built internally.
async fn submit_approval(ctx: &ControllerContext, csr: &CertificateSigningRequest) -> host_lifecycle::Result<()> {
    let body = serde_json::to_vec(csr).map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
    let uri = format!(
        "/apis/certificates.k8s.io/v1/certificatesigningrequests/{}/approval",
        csr.name()
    );
    let request = http::Request::put(uri)
        .header("content-type", "application/json")
        .body(body)
        .map_err(|e| Error::Other(anyhow::anyhow!(e)))?;
    let _: CertificateSigningRequest = ctx.client.request(request).await.map_err(Error::Kube)?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn csr_with_signer(name: &str, signer: &str) -> CertificateSigningRequest {
        CertificateSigningRequest {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: k8s_openapi::api::certificates::v1::CertificateSigningRequestSpec {
                signer_name: signer.to_string(),
                request: k8s_openapi::ByteString(Vec::new()),
                ..Default::default()
            },
            status: None,
        }
    }

    #[test]
    fn kubelet_serving_csrs_are_always_in_scope() {
        let csr = csr_with_signer("any-name", KUBELET_SERVING_SIGNER);
        assert!(is_in_scope(&csr));
    }

    #[test]
    fn client_csrs_require_the_name_prefix() {
        let matching = csr_with_signer("hostlet-csr-abcde", KUBE_APISERVER_CLIENT_SIGNER);
        let not_matching = csr_with_signer("other-name", KUBE_APISERVER_CLIENT_SIGNER);
        assert!(is_in_scope(&matching));
        assert!(!is_in_scope(&not_matching));
    }

    #[test]
    fn unrelated_signers_are_out_of_scope() {
        let csr = csr_with_signer("hostlet-csr-abcde", "kubernetes.io/legacy-unknown");
        assert!(!is_in_scope(&csr));
    }

    #[test]
    fn already_approved_csr_is_not_reapproved() {
        let mut csr = csr_with_signer("hostlet-csr-abcde", KUBE_APISERVER_CLIENT_SIGNER);
        csr.status = Some(k8s_openapi::api::certificates::v1::CertificateSigningRequestStatus {
            conditions: Some(vec![CertificateSigningRequestCondition {
                type_: "Approved".to_string(),
                status: "True".to_string(),
                reason: None,
                message: None,
                last_update_time: None,
                last_transition_time: None,
            }]),
            certificate: None,
        });
        assert!(already_decided(&csr));
    }
}
