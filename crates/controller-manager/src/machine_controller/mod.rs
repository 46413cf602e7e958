//! Machine Controller (spec.md 4.E): the core scheduler/binder. "This is
//! the hardest subsystem" — selection, concurrent claim arbitration,
//! binding, provider-ID propagation, and deletion, all in one reconcile.

pub mod binding;
pub mod claim;
pub mod deletion;
pub mod propagation;
pub mod selection;

use futures::TryStreamExt;
use host_lifecycle::types::Machine;
use kube::api::{Api, ListParams, Meta};
use kube_runtime::watcher;
use tracing::{info, instrument, warn};

use crate::context::ControllerContext;
use binding::BindParams;

const MAX_CLAIM_ATTEMPTS: u32 = 5;

#[derive(Clone)]
pub struct McParams {
    pub control_plane_endpoint: String,
    pub bundle_registry: String,
}

#[instrument(level = "info", skip(ctx, params))]
pub async fn run(ctx: ControllerContext, params: McParams) {
    let api: Api<Machine> = Api::all(ctx.client.clone());
    let mut stream = watcher(api, ListParams::default()).boxed();

    loop {
        match stream.try_next().await {
            Ok(Some(watcher::Event::Applied(machine))) => {
                if let Err(e) = reconcile_machine(&ctx, &machine, &params).await {
                    warn!(machine = %machine.name(), error = %e, "machine reconcile failed");
                }
            }
            Ok(Some(watcher::Event::Restarted(machines))) => {
                for machine in machines {
                    if let Err(e) = reconcile_machine(&ctx, &machine, &params).await {
                        warn!(machine = %machine.name(), error = %e, "machine reconcile failed on resync");
                    }
                }
            }
            Ok(Some(watcher::Event::Deleted(_))) => {}
            Ok(None) => break,
            Err(e) => warn!(error = %e, "error streaming machine events"),
        }
    }
}

#[instrument(level = "debug", skip(ctx, machine, params), fields(machine = %machine.name()))]
async fn reconcile_machine(ctx: &ControllerContext, machine: &Machine, params: &McParams) -> host_lifecycle::Result<()> {
    let attached = deletion::find_attached_host(ctx, machine).await?;

    if selection::handle_paused(ctx, machine, attached.as_ref()).await? {
        info!(machine = %machine.name(), "owning cluster paused, doing nothing else this reconcile");
        return Ok(());
    }

    if machine.metadata.deletion_timestamp.is_some() {
        if deletion::reconcile_deletion(ctx, machine).await? {
            deletion::remove_finalizer(ctx, machine).await?;
        }
        return Ok(());
    }

    deletion::ensure_finalizer(ctx, machine).await?;

    match attached {
        Some(host) => propagation::propagate(ctx, &host, machine).await,
        None => claim_any_host(ctx, machine, params).await,
    }
}

/// Runs selection + claim arbitration + binding, retrying up to
/// [`MAX_CLAIM_ATTEMPTS`] candidates with the exponential backoff from
/// spec.md 4.E ("If patching fails at step 5, release the lease and retry
/// another host... give up after 5 attempts and requeue").
async fn claim_any_host(ctx: &ControllerContext, machine: &Machine, params: &McParams) -> host_lifecycle::Result<()> {
    let bind_params = BindParams {
        control_plane_endpoint: &params.control_plane_endpoint,
        bundle_registry: &params.bundle_registry,
    };

    for attempt in 1..=MAX_CLAIM_ATTEMPTS {
        let Some(host) = selection::select_host(ctx, machine).await? else {
            info!(machine = %machine.name(), "no eligible host this reconcile");
            return Ok(());
        };
        let host_name = host.name();

        if !claim::try_acquire(ctx, &host, machine).await? {
            tokio::time::sleep(host_lifecycle::retry::claim_backoff(attempt)).await;
            continue;
        }

        let bind_result = binding::bind(ctx, &host, machine, &bind_params).await;
        claim::release(ctx, &host_name).await?;

        match bind_result {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(host = %host_name, attempt, error = %e, "bind attempt failed, trying next candidate");
                tokio::time::sleep(host_lifecycle::retry::claim_backoff(attempt)).await;
            }
        }
    }

    warn!(machine = %machine.name(), "exhausted claim attempts, requeuing");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn max_claim_attempts_matches_backoff_schedule() {
        // spec.md 4.E: "give up after 5 attempts".
        assert_eq!(MAX_CLAIM_ATTEMPTS, 5);
    }
}
