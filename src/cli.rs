//! CLI domain: parse, route, help, output, and presentation only.
//! Graph building and transfer live in the manager; the route table only wires them to the store.

mod help;
mod output;
mod parse;
mod presentation;
mod route;

pub use help::command_name;
pub use output::map_error;
pub use parse::{Cli, Commands};
pub use presentation::{
    format_import_json, format_import_text, format_snapshot_list_json, format_snapshot_list_text,
    format_table_json, format_table_text,
};
pub use route::{build_demo_graph, RunContext};
