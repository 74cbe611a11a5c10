//! Platform paths resolved through `directories`.

use directories::ProjectDirs;
use std::path::PathBuf;

const APPLICATION: &str = "obsgraph";

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", APPLICATION)
}

/// `<config dir>/obsgraph/config.toml`
pub fn global_config_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join("config.toml"))
}

/// `<data dir>/obsgraph/snapshots`, or `.obsgraph/snapshots` without a home directory.
pub fn default_snapshot_path() -> PathBuf {
    project_dirs()
        .map(|dirs| dirs.data_dir().join("snapshots"))
        .unwrap_or_else(|| PathBuf::from(".obsgraph").join("snapshots"))
}
