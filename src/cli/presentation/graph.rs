//! Graph presentation: the context tree rebuilt by an import.

use crate::error::ApiError;
use crate::manager::{ObjectManager, TransferResult};
use crate::types::{ObjectId, SessionId};
use std::collections::BTreeSet;

pub fn format_import_text(manager: &ObjectManager, session_id: SessionId, result: TransferResult) -> String {
    let mut out = format!("Import result: {:?}\n", result);
    let mut seen = BTreeSet::new();
    write_context_text(manager, session_id, 0, &mut seen, &mut out);
    out.trim_end().to_string()
}

fn write_context_text(
    manager: &ObjectManager,
    session_id: SessionId,
    depth: usize,
    seen: &mut BTreeSet<ObjectId>,
    out: &mut String,
) {
    let Some(context) = manager.observer_reference(session_id) else {
        return;
    };
    let indent = "  ".repeat(depth);
    let filters = context
        .filters()
        .iter()
        .map(|f| f.tag().to_string())
        .collect::<Vec<_>>();
    out.push_str(&format!(
        "{}{} [session {}] filters: {}\n",
        indent,
        context.name(),
        session_id,
        if filters.is_empty() { "none".to_string() } else { filters.join(", ") }
    ));
    for subject in context.subjects() {
        let Some(data) = manager.object(*subject) else {
            continue;
        };
        out.push_str(&format!(
            "{}  - {} ({}, {:?})\n",
            indent,
            data.name_in(session_id),
            data.type_tag,
            data.ownership()
        ));
        if !seen.insert(*subject) {
            continue;
        }
        if let Some(hosted) = manager.context_of(*subject) {
            write_context_text(manager, hosted, depth + 2, seen, out);
        }
    }
}

pub fn format_import_json(
    manager: &ObjectManager,
    session_id: SessionId,
    result: TransferResult,
) -> Result<String, ApiError> {
    let mut seen = BTreeSet::new();
    let out = serde_json::json!({
        "result": format!("{:?}", result),
        "context": context_json(manager, session_id, &mut seen),
    });
    serde_json::to_string_pretty(&out).map_err(|e| ApiError::OutputError(e.to_string()))
}

fn context_json(manager: &ObjectManager, session_id: SessionId, seen: &mut BTreeSet<ObjectId>) -> serde_json::Value {
    let Some(context) = manager.observer_reference(session_id) else {
        return serde_json::Value::Null;
    };
    let mut subjects = Vec::new();
    for subject in context.subjects() {
        let Some(data) = manager.object(*subject) else {
            continue;
        };
        let hosted = if seen.insert(*subject) {
            manager
                .context_of(*subject)
                .map(|hosted| context_json(manager, hosted, seen))
        } else {
            None
        };
        subjects.push(serde_json::json!({
            "name": data.name_in(session_id),
            "type": data.type_tag,
            "ownership": format!("{:?}", data.ownership()),
            "context": hosted,
        }));
    }
    serde_json::json!({
        "name": context.name(),
        "session_id": session_id,
        "filters": context.filters().iter().map(|f| f.tag().to_string()).collect::<Vec<_>>(),
        "subjects": subjects,
    })
}
