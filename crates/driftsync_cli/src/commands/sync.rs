//! Sync and purge commands.
//!
//! The remote side is a hub snapshot file served in-process through the
//! wire protocol, so a run exercises the same encoding a networked
//! deployment would.

use driftsync_engine::{HttpRemoteStore, LoopbackClient, LoopbackServer, SyncOrchestrator};
use driftsync_protocol::{Clock, OwnerId, SystemClock};
use driftsync_server::{ServerConfig, SyncServer};
use driftsync_store::{FileJournal, JournaledLocalStore};
use std::path::Path;
use std::sync::Arc;

struct HubLoopback(Arc<SyncServer>);

impl LoopbackServer for HubLoopback {
    fn handle_post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>, String> {
        self.0.handle_post(path, body)
    }
}

type HubRemote = HttpRemoteStore<LoopbackClient<HubLoopback>>;

fn connect(
    path: &Path,
    remote: &Path,
) -> Result<
    (
        Arc<SyncServer>,
        SyncOrchestrator<JournaledLocalStore<FileJournal>, HubRemote>,
    ),
    Box<dyn std::error::Error>,
> {
    let server = Arc::new(SyncServer::open(
        ServerConfig::new().with_snapshot_path(remote.to_path_buf()),
    )?);
    let local = Arc::new(super::open_store(path)?);
    let client = LoopbackClient::new(HubLoopback(Arc::clone(&server)));
    let remote = Arc::new(HttpRemoteStore::new("loopback://hub", client));
    Ok((server, SyncOrchestrator::new(local, remote)))
}

/// Runs one sync for `owner` and saves the hub.
pub fn run(path: &Path, owner: &str, remote: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let (server, orchestrator) = connect(path, remote)?;
    let owner = OwnerId::from(owner);

    println!("Syncing {} against {:?}", owner, remote);
    let mut run = orchestrator.sync(&owner);
    let mut failure = None;
    for tick in run.by_ref() {
        match tick {
            Ok(progress) => println!(
                "  {:<4} {}/{} {}",
                progress.phase.to_string(),
                progress.current,
                progress.total,
                progress.message.as_deref().unwrap_or("")
            ),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }

    // confirmed pushes stay confirmed even when the run failed later
    server.persist()?;

    let report = run.into_report();
    println!();
    println!("  Pulled:    {}", report.pulled);
    println!("  Pushed:    {}", report.pushed);
    println!("  Skipped:   {}", report.skipped);
    println!("  Conflicts: {}", report.conflicts.len());
    for conflict in &report.conflicts {
        println!(
            "    {} local@{} remote@{} -> {:?}",
            conflict.record_id,
            conflict.local_modified_at,
            conflict.remote_modified_at,
            conflict.resolution
        );
    }

    match failure {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

/// Purges soft deletes confirmed more than `retention_secs` ago.
pub fn purge(
    path: &Path,
    owner: &str,
    remote: &Path,
    retention_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let (server, orchestrator) = connect(path, remote)?;
    let older_than = SystemClock
        .now()
        .saturating_sub(retention_secs.saturating_mul(1_000));

    let purged = orchestrator.purge_confirmed_deletes(&owner.into(), older_than)?;
    server.persist()?;
    println!("Purged {purged} confirmed deletes");
    Ok(())
}
