//! Snapshot presentation: store listings and relational table views.

use crate::error::ApiError;
use crate::relational::RelationalTable;
use crate::store::SnapshotRecord;
use crate::types::{INVALID_SESSION_ID, INVALID_VISITOR_ID};
use comfy_table::Table;

pub fn format_snapshot_list_text(records: &[SnapshotRecord]) -> String {
    if records.is_empty() {
        return "No snapshots stored.".to_string();
    }
    let mut table = Table::new();
    table.load_preset(comfy_table::presets::UTF8_FULL);
    table.set_header(vec!["Name", "Root", "Entries", "Bytes", "Created", "Digest"]);
    for r in records {
        table.add_row(vec![
            r.name.clone(),
            r.root_name.clone(),
            r.entry_count.to_string(),
            r.payload.len().to_string(),
            r.created_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            r.short_digest().to_string(),
        ]);
    }
    table.to_string()
}

pub fn format_snapshot_list_json(records: &[SnapshotRecord]) -> Result<String, ApiError> {
    let arr: Vec<serde_json::Value> = records
        .iter()
        .map(|r| {
            serde_json::json!({
                "name": r.name,
                "root_name": r.root_name,
                "entry_count": r.entry_count,
                "bytes": r.payload.len(),
                "created_at": r.created_at.to_rfc3339(),
                "digest": r.digest,
            })
        })
        .collect();
    serde_json::to_string_pretty(&arr).map_err(|e| ApiError::OutputError(e.to_string()))
}

fn id_cell(id: i32, invalid: i32) -> String {
    if id == invalid {
        "-".to_string()
    } else {
        id.to_string()
    }
}

pub fn format_table_text(record: &SnapshotRecord, table: &RelationalTable) -> String {
    let mut out = format!(
        "Snapshot {} (root: {}, {} entries, digest {})\n",
        record.name,
        record.root_name,
        table.len(),
        record.short_digest()
    );
    let mut view = Table::new();
    view.load_preset(comfy_table::presets::UTF8_FULL);
    view.set_header(vec!["Visitor", "Name", "Session", "Parents", "Ownership", "Owner"]);
    for entry in table.entries() {
        let parents = entry
            .parents
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        view.add_row(vec![
            entry.visitor_id.to_string(),
            entry.name.clone(),
            id_cell(entry.session_id, INVALID_SESSION_ID),
            if parents.is_empty() { "-".to_string() } else { parents },
            format!("{:?}", entry.ownership),
            id_cell(entry.parent_visitor_id, INVALID_VISITOR_ID),
        ]);
    }
    out.push_str(&view.to_string());
    out
}

pub fn format_table_json(table: &RelationalTable) -> Result<String, ApiError> {
    table
        .to_json()
        .map_err(|e| ApiError::OutputError(e.to_string()))
}
