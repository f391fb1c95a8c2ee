//! Record commands: put, delete, list.

use driftsync_protocol::{Clock, PendingAction, SyncableRecord, SystemClock};
use driftsync_store::{LocalStore, LocalWrites};
use serde::Serialize;
use std::path::Path;

/// A record as shown to the user.
#[derive(Debug, Serialize)]
pub struct RecordView {
    /// Record id.
    pub id: String,
    /// Owner id.
    pub owner: String,
    /// Payload, lossily decoded as UTF-8.
    pub payload: String,
    /// Last modification (ms since epoch).
    pub last_modified_at: u64,
    /// Last confirmed sync; 0 when never synced.
    pub last_synced_at: u64,
    /// Soft-delete flag.
    pub deleted: bool,
    /// Pending action name.
    pub pending: &'static str,
}

impl From<&SyncableRecord> for RecordView {
    fn from(record: &SyncableRecord) -> Self {
        Self {
            id: record.id.to_string(),
            owner: record.owner_id.to_string(),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
            last_modified_at: record.last_modified_at,
            last_synced_at: record.last_synced_at,
            deleted: record.deleted,
            pending: match record.pending_action {
                PendingAction::None => "none",
                PendingAction::Upsert => "upsert",
                PendingAction::Delete => "delete",
            },
        }
    }
}

/// Creates a record, or edits `id` when given.
pub fn put(
    path: &Path,
    owner: &str,
    id: Option<&str>,
    payload: Vec<u8>,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;
    let now = SystemClock.now();

    let record = match id {
        Some(id) => store.edit_record(&id.into(), payload, now)?,
        None => store.create_record(&owner.into(), payload, now)?,
    };
    println!("{}", record.id);
    Ok(())
}

/// Soft-deletes a record.
pub fn delete(path: &Path, id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;
    if store.delete_record(&id.into(), SystemClock.now())? {
        println!("deleted {id}");
    } else {
        println!("{id} was already deleted");
    }
    Ok(())
}

/// Lists an owner's records.
pub fn list(
    path: &Path,
    owner: &str,
    pending_only: bool,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let store = super::open_store(path)?;
    let owner = owner.into();
    let records = if pending_only {
        store.list_pending(&owner)?
    } else {
        store.list_for_owner(&owner)?
    };
    let views: Vec<RecordView> = records.iter().map(RecordView::from).collect();

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&views)?),
        _ => {
            if views.is_empty() {
                println!("no records");
            }
            for view in &views {
                println!(
                    "{:<38} {:>14} {:>14} {:<7} {}{}",
                    view.id,
                    view.last_modified_at,
                    view.last_synced_at,
                    view.pending,
                    if view.deleted { "[deleted] " } else { "" },
                    view.payload
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_edit_delete_round() {
        let dir = tempfile::tempdir().unwrap();
        put(dir.path(), "alice", None, b"hello".to_vec()).unwrap();

        let store = super::super::open_store(dir.path()).unwrap();
        let created = store.list_for_owner(&"alice".into()).unwrap().remove(0);
        drop(store);

        put(dir.path(), "alice", Some(created.id.as_str()), b"bye".to_vec()).unwrap();
        delete(dir.path(), created.id.as_str()).unwrap();
        assert!(list(dir.path(), "alice", true, "json").is_ok());

        let store = super::super::open_store(dir.path()).unwrap();
        let stored = store.get(&created.id).unwrap().unwrap();
        assert_eq!(stored.payload, b"bye".to_vec());
        assert!(stored.deleted);
        assert_eq!(stored.pending_action, PendingAction::Delete);
    }

    #[test]
    fn view_names_pending_action() {
        let record = SyncableRecord::with_id("a".into(), "alice".into(), b"x".to_vec(), 5);
        let view = RecordView::from(&record);
        assert_eq!(view.pending, "upsert");
        assert_eq!(view.payload, "x");
    }
}
