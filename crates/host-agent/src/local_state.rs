//! Local claim-evidence marker (spec.md §6 "Persisted local state":
//! `/run/cluster-api/machine-id`, "text UID of currently bound Machine").
//! Recording the owning Machine's UID, not its name, is what makes zombie
//! detection (spec.md 4.F) able to tell "still bound to the Machine I
//! remember" from "a deleted-and-recreated Machine reusing the same name" —
//! a name-only comparison can't distinguish those two cases.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ClaimEvidence {
    pub machine_uid: String,
    pub claimed_at: chrono::DateTime<chrono::Utc>,
}

fn marker_path(data_dir: &Path) -> PathBuf {
    data_dir.join("machine-id")
}

pub async fn record(data_dir: &Path, machine_uid: &str) -> host_lifecycle::Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;
    let evidence = ClaimEvidence {
        machine_uid: machine_uid.to_string(),
        claimed_at: chrono::Utc::now(),
    };
    let json = serde_json::to_vec_pretty(&evidence)
        .map_err(|e| host_lifecycle::Error::Other(anyhow::anyhow!(e)))?;
    tokio::fs::write(marker_path(data_dir), json).await?;
    Ok(())
}

pub async fn read(data_dir: &Path) -> Option<ClaimEvidence> {
    let bytes = tokio::fs::read(marker_path(data_dir)).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub async fn clear(data_dir: &Path) -> host_lifecycle::Result<()> {
    match tokio::fs::remove_file(marker_path(data_dir)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn sentinel_path(data_dir: &Path) -> PathBuf {
    data_dir.join("bootstrap-success.complete")
}

/// Marks a successful `BootstrapNode` (spec.md §6: sentinel "that must be
/// absent for a fresh bootstrap").
pub async fn mark_bootstrap_complete(data_dir: &Path) -> host_lifecycle::Result<()> {
    tokio::fs::create_dir_all(data_dir).await?;
    tokio::fs::write(sentinel_path(data_dir), chrono::Utc::now().to_rfc3339()).await?;
    Ok(())
}

/// Removed during `Cleanup` so a subsequent claim starts a genuinely fresh
/// bootstrap (spec.md 4.F Cleanup step).
pub async fn clear_bootstrap_sentinel(data_dir: &Path) -> host_lifecycle::Result<()> {
    match tokio::fs::remove_file(sentinel_path(data_dir)).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn records_and_reads_back_evidence() {
        let dir = tempfile::tempdir().unwrap();
        record(dir.path(), "uid-aaaa-bbbb").await.unwrap();
        let evidence = read(dir.path()).await.unwrap();
        assert_eq!(evidence.machine_uid, "uid-aaaa-bbbb");
    }

    #[tokio::test]
    async fn reads_none_when_absent() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read(dir.path()).await.is_none());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        clear(dir.path()).await.unwrap();
        clear(dir.path()).await.unwrap();
    }
}
