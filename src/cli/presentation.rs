//! CLI presentation: text and json formatters per command family.

mod graph;
mod snapshot;

pub use graph::{format_import_json, format_import_text};
pub use snapshot::{
    format_snapshot_list_json, format_snapshot_list_text, format_table_json, format_table_text,
};
