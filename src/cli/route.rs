//! CLI route: single route table and run context. Dispatches to the manager,
//! the snapshot store and presentation.

use crate::codec::{ByteReader, ByteWriter};
use crate::config::{ConfigLoader, ObsGraphConfig};
use crate::error::{ApiError, RelationError};
use crate::manager::{ObjectManager, TransferResult};
use crate::object::Ownership;
use crate::observer::FilterTag;
use crate::relational::RelationalTable;
use crate::store::{SledSnapshotStore, SnapshotRecord, SnapshotStore};
use crate::types::SessionId;
use std::path::{Path, PathBuf};
use tracing::{debug, info, info_span, warn};

use crate::cli::command_name;
use crate::cli::parse::Commands;
use crate::cli::presentation::{
    format_import_json, format_import_text, format_snapshot_list_json, format_snapshot_list_text,
    format_table_json, format_table_text,
};

/// Runtime context for CLI execution: configuration and the snapshot store.
pub struct RunContext {
    config: ObsGraphConfig,
    store: SledSnapshotStore,
    store_path: PathBuf,
}

impl RunContext {
    /// Create run context from workspace root and optional config path. Uses ConfigLoader only.
    pub fn new(
        workspace_root: PathBuf,
        config_path: Option<PathBuf>,
        store_override: Option<PathBuf>,
    ) -> Result<Self, ApiError> {
        let config = match config_path {
            Some(ref path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(&workspace_root)?,
        };
        if let Err(errors) = config.validate() {
            let joined = errors
                .iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ApiError::ConfigError(joined));
        }

        let store_path = resolve_store_path(
            &workspace_root,
            store_override.unwrap_or_else(|| config.storage.snapshot_path.clone()),
        );
        std::fs::create_dir_all(&store_path)
            .map_err(|e| ApiError::StorageError(crate::error::StorageError::IoError(e)))?;
        let store = SledSnapshotStore::new(&store_path)?;
        debug!(store = %store_path.display(), "Opened snapshot store");

        Ok(Self {
            config,
            store,
            store_path,
        })
    }

    pub fn config(&self) -> &ObsGraphConfig {
        &self.config
    }

    pub fn store_path(&self) -> &Path {
        &self.store_path
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let span = info_span!("command", name = command_name(command));
        let _guard = span.enter();
        match command {
            Commands::Demo {
                name,
                subjects,
                nested,
            } => self.handle_demo(name, *subjects, *nested),
            Commands::List { format } => self.handle_list(format),
            Commands::Inspect { name, format } => self.handle_inspect(name, format),
            Commands::Import { name, format } => self.handle_import(name, format),
            Commands::Remove { name } => self.handle_remove(name),
        }
    }

    fn handle_demo(&self, name: &str, subjects: usize, nested: bool) -> Result<String, ApiError> {
        let mut manager = ObjectManager::from_config(&self.config);
        let root = build_demo_graph(&mut manager, name, subjects, nested)?;

        let mut w = ByteWriter::new();
        let result = manager.export_observer_binary(root, &mut w);
        if result.is_failed() {
            return Err(ApiError::TransferFailed(format!("export of '{}' failed", name)));
        }
        let payload = w.into_bytes();
        let entry_count = RelationalTable::import_binary(&mut ByteReader::new(&payload))
            .map_err(RelationError::from)?
            .len() as u64;
        let root_name = manager
            .observer_reference(root)
            .and_then(|c| c.host())
            .and_then(|h| manager.object(h))
            .map(|o| o.name.clone())
            .unwrap_or_default();

        let record = SnapshotRecord::new(name, root_name, entry_count, payload);
        self.store.put(&record)?;
        self.store.flush()?;
        info!(name, entries = entry_count, ?result, "Saved snapshot");

        Ok(format!(
            "Saved snapshot '{}': {} entries, {} bytes, digest {} ({:?})",
            record.name,
            record.entry_count,
            record.payload.len(),
            record.short_digest(),
            result
        ))
    }

    fn handle_list(&self, format: &str) -> Result<String, ApiError> {
        let records = self.store.list()?;
        match format {
            "json" => format_snapshot_list_json(&records),
            _ => Ok(format_snapshot_list_text(&records)),
        }
    }

    fn handle_inspect(&self, name: &str, format: &str) -> Result<String, ApiError> {
        let record = self.store.load(name)?;
        let table = RelationalTable::import_binary(&mut ByteReader::new(&record.payload))
            .map_err(RelationError::from)?;
        match format {
            "json" => format_table_json(&table),
            _ => Ok(format_table_text(&record, &table)),
        }
    }

    fn handle_import(&self, name: &str, format: &str) -> Result<String, ApiError> {
        let record = self.store.load(name)?;
        let mut manager = ObjectManager::from_config(&self.config);
        let (target, _) = manager.create_observer(record.root_name.as_str());
        let result = manager.import_observer_binary(&mut ByteReader::new(&record.payload), target);
        match result {
            TransferResult::Failed => {
                return Err(ApiError::TransferFailed(format!("import of '{}' failed", name)))
            }
            TransferResult::Incomplete => warn!(name, "Snapshot imported incompletely"),
            TransferResult::Complete => {}
        }
        match format {
            "json" => format_import_json(&manager, target, result),
            _ => Ok(format_import_text(&manager, target, result)),
        }
    }

    fn handle_remove(&self, name: &str) -> Result<String, ApiError> {
        if !self.store.remove(name)? {
            return Err(ApiError::StorageError(
                crate::error::StorageError::SnapshotNotFound(name.to_string()),
            ));
        }
        self.store.flush()?;
        Ok(format!("Removed snapshot '{}'", name))
    }
}

fn resolve_store_path(workspace_root: &Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        workspace_root.join(path)
    }
}

/// Build a sample context tree in `manager` and return the root session id.
///
/// The root context names its subjects through a naming filter, so the
/// `subjects` objects all called "item" come out as `item`, `item_1`, ...
/// With `nested`, a second context owned by the root holds two leaves and
/// shares the first root subject.
pub fn build_demo_graph(
    manager: &mut ObjectManager,
    name: &str,
    subjects: usize,
    nested: bool,
) -> Result<SessionId, ApiError> {
    let (root, _) = manager.create_observer(name);
    install_naming_filter(manager, root);

    let items: Vec<_> = (0..subjects)
        .map(|_| manager.create_object("item", "Object"))
        .collect();
    for result in manager.attach_subjects(root, &items, Ownership::ObserverScope) {
        result?;
    }

    if nested {
        let (inner, inner_host) = manager.create_observer("nested");
        install_naming_filter(manager, inner);
        manager.attach_subject(root, inner_host, Ownership::SpecificObserver)?;
        for leaf in ["leaf", "leaf"] {
            let id = manager.create_object(leaf, "Object");
            manager.attach_subject(inner, id, Ownership::ObserverScope)?;
        }
        if let Some(first) = items.first() {
            manager.attach_subject(inner, *first, Ownership::ObserverScope)?;
        }
    }
    Ok(root)
}

fn install_naming_filter(manager: &mut ObjectManager, session_id: SessionId) {
    let Some(filter) = manager.factories().create_filter(&FilterTag::NamingPolicy) else {
        return;
    };
    if let Some(context) = manager.observer_mut(session_id) {
        context.install_filter(filter);
    }
}
