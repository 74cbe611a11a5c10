//! Snapshot store and command routing end to end

use obsgraph::cli::{build_demo_graph, map_error, Commands, RunContext};
use obsgraph::codec::{ByteReader, ByteWriter};
use obsgraph::error::{ApiError, StorageError};
use obsgraph::store::{SledSnapshotStore, SnapshotRecord, SnapshotStore};
use obsgraph::{ObjectManager, TransferResult};
use tempfile::TempDir;

fn run_context(workspace: &TempDir) -> RunContext {
    RunContext::new(
        workspace.path().to_path_buf(),
        None,
        Some(workspace.path().join("store")),
    )
    .unwrap()
}

#[test]
fn test_demo_list_inspect_import_remove() {
    let workspace = TempDir::new().unwrap();
    let ctx = run_context(&workspace);

    let saved = ctx
        .execute(&Commands::Demo {
            name: "first".to_string(),
            subjects: 2,
            nested: true,
        })
        .unwrap();
    assert!(saved.starts_with("Saved snapshot 'first'"));
    assert!(saved.contains("6 entries"));

    let listing = ctx
        .execute(&Commands::List {
            format: "json".to_string(),
        })
        .unwrap();
    let json: serde_json::Value = serde_json::from_str(&listing).unwrap();
    assert_eq!(json[0]["name"], "first");
    assert_eq!(json[0]["root_name"], "first");
    assert_eq!(json[0]["entry_count"], 6);

    let table = ctx
        .execute(&Commands::Inspect {
            name: "first".to_string(),
            format: "text".to_string(),
        })
        .unwrap();
    assert!(table.contains("Snapshot first"));
    assert!(table.contains("leaf_1"));

    let imported = ctx
        .execute(&Commands::Import {
            name: "first".to_string(),
            format: "text".to_string(),
        })
        .unwrap();
    assert!(imported.starts_with("Import result: Complete"));
    assert!(imported.contains("item_1 (Object, ObserverScope)"));
    assert!(imported.contains("nested [session"));

    let removed = ctx
        .execute(&Commands::Remove {
            name: "first".to_string(),
        })
        .unwrap();
    assert_eq!(removed, "Removed snapshot 'first'");

    let err = ctx
        .execute(&Commands::Inspect {
            name: "first".to_string(),
            format: "text".to_string(),
        })
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::StorageError(StorageError::SnapshotNotFound(ref name)) if name == "first"
    ));
    assert!(map_error(&err).contains("obsgraph list"));
}

#[test]
fn test_empty_store_lists_nothing() {
    let workspace = TempDir::new().unwrap();
    let ctx = run_context(&workspace);
    let listing = ctx
        .execute(&Commands::List {
            format: "text".to_string(),
        })
        .unwrap();
    assert_eq!(listing, "No snapshots stored.");
    assert!(ctx.store_path().ends_with("store"));
}

#[test]
fn test_snapshot_survives_reopening_the_store() {
    let dir = TempDir::new().unwrap();
    let mut source = ObjectManager::new();
    let root = build_demo_graph(&mut source, "persisted", 3, false).unwrap();
    let mut w = ByteWriter::new();
    assert_eq!(source.export_observer_binary(root, &mut w), TransferResult::Complete);
    let record = SnapshotRecord::new("persisted", "persisted", 4, w.into_bytes());

    {
        let store = SledSnapshotStore::new(dir.path()).unwrap();
        store.put(&record).unwrap();
        store.flush().unwrap();
    }

    let store = SledSnapshotStore::new(dir.path()).unwrap();
    let loaded = store.load("persisted").unwrap();
    assert_eq!(loaded, record);

    let mut target = ObjectManager::new();
    let (session_id, _) = target.create_observer("restored");
    let result = target.import_observer_binary(&mut ByteReader::new(&loaded.payload), session_id);
    assert_eq!(result, TransferResult::Complete);
    assert_eq!(target.observer_reference(session_id).unwrap().subject_count(), 3);
}

#[test]
fn test_tampered_payload_fails_digest_check() {
    let dir = TempDir::new().unwrap();
    let store = SledSnapshotStore::new(dir.path()).unwrap();
    let mut record = SnapshotRecord::new("tampered", "root", 1, vec![1, 2, 3, 4]);
    record.payload[0] = 9;
    store.put(&record).unwrap();

    assert!(matches!(
        store.load("tampered"),
        Err(StorageError::DigestMismatch { .. })
    ));
    assert!(store.get("tampered").unwrap().is_some());
}
