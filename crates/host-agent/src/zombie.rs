//! Zombie detection (spec.md 4.F): on startup, decide which state to resume
//! in rather than always starting cold at `WaitForClaim`. An agent that
//! crashed mid-bootstrap should pick back up where it left off; an agent
//! whose local claim evidence no longer matches `Host.status` (the Host
//! Controller force-released it while the agent was down) is a zombie and
//! needs to run cleanup before it can be claimed again.

use host_lifecycle::annotations::CLEANUP_ANNOTATION;
use host_lifecycle::state::State;
use host_lifecycle::types::host::HostConditionType;
use host_lifecycle::types::Host;
use kube::api::{Api, Meta};
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::local_state;
use crate::state::{BootstrapNode, Cleanup, InstallComponents, Running, WaitForClaim};

pub async fn determine_start_state(ctx: &AgentContext) -> host_lifecycle::Result<Box<dyn State<AgentContext>>> {
    let hosts: Api<Host> = Api::all(ctx.client.clone());
    let host = hosts.get(&ctx.config.host_name).await.map_err(host_lifecycle::Error::Kube)?;

    let cleanup_requested = host
        .meta()
        .annotations
        .as_ref()
        .map_or(false, |a| a.contains_key(CLEANUP_ANNOTATION));

    if cleanup_requested {
        info!("resuming into Cleanup: cleanup annotation present at startup");
        return Ok(Box::new(Cleanup));
    }

    let machine_ref = host.status.as_ref().and_then(|s| s.machine_ref.as_ref());
    let evidence = local_state::read(&ctx.config.data_dir).await;

    match (machine_ref, evidence) {
        (Some(m), Some(ev)) if ev.machine_uid == m.uid => {
            let status = host.status.as_ref().unwrap();
            if status.is_true(HostConditionType::NodeBootstrapped) {
                info!("resuming into Running: claim and conditions match local evidence");
                Ok(Box::new(Running))
            } else if status.is_true(HostConditionType::ComponentsInstalled) {
                info!("resuming into BootstrapNode");
                Ok(Box::new(BootstrapNode))
            } else {
                info!("resuming into InstallComponents");
                Ok(Box::new(InstallComponents))
            }
        }
        (Some(m), ev) => {
            if let Some(ev) = ev {
                warn!(
                    old_machine_uid = %ev.machine_uid,
                    new_machine_uid = %m.uid,
                    "zombie detected: bound Machine's UID diverges from local evidence, cleaning up before re-bootstrap"
                );
                return Ok(Box::new(Cleanup));
            }
            info!(machine = %m.name, "claim observed with no matching local evidence, recording and continuing");
            local_state::record(&ctx.config.data_dir, &m.uid).await?;
            Ok(Box::new(InstallComponents))
        }
        (None, Some(ev)) => {
            warn!(
                machine_uid = %ev.machine_uid,
                "zombie detected: local claim evidence with no matching Host claim, running cleanup"
            );
            Ok(Box::new(Cleanup))
        }
        (None, None) => Ok(Box::new(WaitForClaim)),
    }
}
