//! CLI help and command-name contract for logging and routing.

use crate::cli::parse::Commands;

/// Command name string for log spans (e.g. "demo", "inspect").
pub fn command_name(command: &Commands) -> &'static str {
    match command {
        Commands::Demo { .. } => "demo",
        Commands::List { .. } => "list",
        Commands::Inspect { .. } => "inspect",
        Commands::Import { .. } => "import",
        Commands::Remove { .. } => "remove",
    }
}
