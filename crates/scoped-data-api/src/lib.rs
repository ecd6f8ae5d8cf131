use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use scoped_data_core::{
    ArchivedDataInstance, ArchivedDataInstanceId, Collaborators, ContainerHierarchy,
    ContainerHierarchyResolver, ContainerRef, DataChangeSet, DataError, DataInstance,
    DataInstanceId, EngineConfig, NewDataInstance, PortError, ScopedDataEngine, SystemClock,
};
use scoped_data_store_sqlite::{
    ContainerRecord, IntegrityReport, SchemaStatus, SqliteStore, StoredChangeEvent,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::info;

pub const API_CONTRACT_VERSION: &str = "api.v1";
pub const DEFAULT_PAGE_LIMIT: usize = 100;

fn default_page_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MigrateResult {
    pub dry_run: bool,
    pub current_version: i64,
    pub target_version: i64,
    pub would_apply_versions: Vec<i64>,
    pub after_version: Option<i64>,
    pub up_to_date: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegisterContainerRequest {
    pub container: ContainerRef,
    #[serde(default)]
    pub parent: Option<ContainerRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateDataRequest {
    pub id: DataInstanceId,
    #[serde(flatten)]
    pub changes: DataChangeSet,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeleteDataRequest {
    pub id: DataInstanceId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveDataRequest {
    pub name: String,
    pub container: ContainerRef,
}

/// Every visible name (paginated) or, when `names` is given, just those names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveAllRequest {
    pub container: ContainerRef,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub offset: usize,
    #[serde(default = "default_page_limit")]
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolveArchivedRequest {
    pub name: String,
    pub container: ContainerRef,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArchivedBySourceRequest {
    pub source_object_id: DataInstanceId,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub as_of: Option<OffsetDateTime>,
}

/// Read engine settings from a YAML file; no file means defaults.
///
/// # Errors
/// Returns an error when the file cannot be read, parsed or validated.
pub fn load_engine_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read engine config {}", path.display()))?;
    let config: EngineConfig = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse engine config {}", path.display()))?;
    config.validate().with_context(|| format!("invalid engine config {}", path.display()))?;
    info!(path = %path.display(), "loaded engine config");
    Ok(config)
}

#[derive(Debug, Clone)]
pub struct ScopedDataApi {
    db_path: PathBuf,
    engine: ScopedDataEngine,
}

impl ScopedDataApi {
    #[must_use]
    pub fn new(db_path: PathBuf) -> Self {
        Self { db_path, engine: ScopedDataEngine::default() }
    }

    /// # Errors
    /// Returns an error when `config` is out of range.
    pub fn with_config(db_path: PathBuf, config: EngineConfig) -> Result<Self> {
        Ok(Self { db_path, engine: ScopedDataEngine::new(config)? })
    }

    /// # Errors
    /// Returns an error when the config file cannot be loaded.
    pub fn from_config_file(db_path: PathBuf, config_path: Option<&Path>) -> Result<Self> {
        Self::with_config(db_path, load_engine_config(config_path)?)
    }

    #[must_use]
    pub fn engine(&self) -> &ScopedDataEngine {
        &self.engine
    }

    fn open_store(&self) -> Result<SqliteStore> {
        let mut store = SqliteStore::open(&self.db_path)?;
        store.migrate()?;
        Ok(store)
    }

    /// One transaction around `work`; an error rolls every write of it back.
    fn with_store<T>(
        &self,
        work: impl FnOnce(&SqliteStore) -> std::result::Result<T, DataError>,
    ) -> Result<T> {
        let store = self.open_store()?;
        store.unit_of_work(work)
    }

    fn run<T>(
        &self,
        work: impl FnOnce(Collaborators<'_>) -> std::result::Result<T, DataError>,
    ) -> Result<T> {
        let clock = SystemClock;
        self.with_store(|store| work(Collaborators::from_backend(store, &clock)))
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be opened or queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        let store = SqliteStore::open(&self.db_path)?;
        store.schema_status()
    }

    /// Apply pending migrations, or return planned versions for dry-run mode.
    ///
    /// # Errors
    /// Returns an error when migration planning or execution fails.
    pub fn migrate(&self, dry_run: bool) -> Result<MigrateResult> {
        let mut store = SqliteStore::open(&self.db_path)?;
        let before = store.schema_status()?;
        if dry_run {
            return Ok(MigrateResult {
                dry_run: true,
                current_version: before.current_version,
                target_version: before.target_version,
                would_apply_versions: before.pending_versions,
                after_version: None,
                up_to_date: None,
            });
        }

        store.migrate()?;
        let after = store.schema_status()?;
        Ok(MigrateResult {
            dry_run: false,
            current_version: before.current_version,
            target_version: before.target_version,
            would_apply_versions: before.pending_versions,
            after_version: Some(after.current_version),
            up_to_date: Some(after.pending_versions.is_empty()),
        })
    }

    /// # Errors
    /// Returns an error when any integrity check fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.open_store()?.integrity_check()
    }

    /// # Errors
    /// Returns an error when the container exists already or its parent is not live.
    pub fn register_container(&self, input: RegisterContainerRequest) -> Result<ContainerRecord> {
        let store = self.open_store()?;
        store.unit_of_work(|store| {
            store.register_container(&input.container, input.parent.as_ref())
        })
    }

    /// # Errors
    /// Returns an error when the container is unknown.
    pub fn archive_container(&self, container: &ContainerRef) -> Result<ContainerRecord> {
        let store = self.open_store()?;
        store.unit_of_work(|store| store.archive_container(container))
    }

    /// Ancestor chain of `container`, live-only unless `archived` is set.
    ///
    /// # Errors
    /// Returns [`DataError::NotFound`] for an unknown (or, live-only, archived)
    /// container and [`DataError::ReadFailure`] when the walk fails.
    pub fn container_hierarchy(
        &self,
        container: &ContainerRef,
        archived: bool,
    ) -> Result<ContainerHierarchy> {
        self.with_store(|store| {
            let resolved = if archived {
                store.resolve_archived(container)
            } else {
                store.resolve_live(container)
            };
            resolved.map_err(|err| match err {
                PortError::NotFound(what) => DataError::NotFound(what),
                PortError::Backend(source) => DataError::ReadFailure {
                    context: format!("resolve hierarchy of {container}"),
                    source,
                },
            })
        })
    }

    /// # Errors
    /// Returns the engine error of the create, rolled back as a whole.
    pub fn create_data(&self, input: NewDataInstance) -> Result<DataInstance> {
        self.run(|ports| self.engine.live(ports).create(input))
    }

    /// # Errors
    /// Returns [`DataError::NotFound`] for an unknown id, otherwise the engine error.
    pub fn update_data(&self, input: UpdateDataRequest) -> Result<DataInstance> {
        self.run(|ports| {
            let live = self.engine.live(ports);
            let current = live.get_by_id(input.id)?;
            live.update(&current, &input.changes)
        })
    }

    /// Delete one live row and return it as it was.
    ///
    /// # Errors
    /// Returns [`DataError::NotFound`] for an unknown id, otherwise the engine error.
    pub fn delete_data(&self, input: DeleteDataRequest) -> Result<DataInstance> {
        self.run(|ports| {
            let live = self.engine.live(ports);
            let current = live.get_by_id(input.id)?;
            live.delete(&current)?;
            Ok(current)
        })
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn get_data(&self, name: &str, container: &ContainerRef) -> Result<DataInstance> {
        self.run(|ports| self.engine.live(ports).get(name, container))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn get_many_data(
        &self,
        names: &[String],
        container: &ContainerRef,
    ) -> Result<Vec<DataInstance>> {
        self.run(|ports| self.engine.live(ports).get_many(names, container))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn get_all_data(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DataInstance>> {
        self.run(|ports| self.engine.live(ports).get_all(container, offset, limit))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn resolve_all(&self, input: &ResolveAllRequest) -> Result<Vec<DataInstance>> {
        match &input.names {
            Some(names) => self.get_many_data(names, &input.container),
            None => self.get_all_data(&input.container, input.offset, input.limit),
        }
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn get_local_data(&self, name: &str, container: &ContainerRef) -> Result<DataInstance> {
        self.run(|ports| self.engine.live(ports).get_local(name, container))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn get_local_all_data(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DataInstance>> {
        self.run(|ports| self.engine.live(ports).get_local_all(container, offset, limit))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn get_data_by_id(&self, id: DataInstanceId) -> Result<DataInstance> {
        self.run(|ports| self.engine.live(ports).get_by_id(id))
    }

    /// # Errors
    /// Returns the engine error of the count.
    pub fn count_local_data(&self, container: &ContainerRef) -> Result<u64> {
        self.run(|ports| self.engine.live(ports).count_local(container))
    }

    /// # Errors
    /// Returns the engine error of the first failing batch.
    pub fn delete_all_local_data(&self, container: &ContainerRef) -> Result<usize> {
        self.run(|ports| self.engine.live(ports).delete_all_local(container))
    }

    /// # Errors
    /// Returns the engine error of the first failing batch.
    pub fn purge_local_archived(&self, container: &ContainerRef) -> Result<usize> {
        self.run(|ports| self.engine.live(ports).delete_all_local_archived(container))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_get(
        &self,
        name: &str,
        container: &ContainerRef,
        as_of: Option<OffsetDateTime>,
    ) -> Result<ArchivedDataInstance> {
        let as_of = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        self.run(|ports| self.engine.archived(ports).get(name, container, as_of))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_get_many(
        &self,
        names: &[String],
        container: &ContainerRef,
        as_of: Option<OffsetDateTime>,
    ) -> Result<Vec<ArchivedDataInstance>> {
        let as_of = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        self.run(|ports| self.engine.archived(ports).get_many(names, container, as_of))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_get_all(
        &self,
        container: &ContainerRef,
        as_of: Option<OffsetDateTime>,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>> {
        let as_of = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        self.run(|ports| self.engine.archived(ports).get_all(container, as_of, offset, limit))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_by_source(
        &self,
        source: DataInstanceId,
        as_of: Option<OffsetDateTime>,
    ) -> Result<ArchivedDataInstance> {
        let as_of = as_of.unwrap_or_else(OffsetDateTime::now_utc);
        self.run(|ports| self.engine.archived(ports).get_by_source_id(source, as_of))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_by_id(&self, id: ArchivedDataInstanceId) -> Result<ArchivedDataInstance> {
        self.run(|ports| self.engine.archived(ports).get_by_id(id))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_history(
        &self,
        source: DataInstanceId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>> {
        self.run(|ports| self.engine.archived(ports).get_history(source, offset, limit))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_local_all(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>> {
        self.run(|ports| self.engine.archived(ports).get_local_all(container, offset, limit))
    }

    /// # Errors
    /// Returns the engine error of the lookup.
    pub fn archived_last_local_all(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>> {
        self.run(|ports| self.engine.archived(ports).get_last_local_all(container, offset, limit))
    }

    /// # Errors
    /// Returns an error when the outbox cannot be read.
    pub fn list_change_events(
        &self,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<StoredChangeEvent>> {
        self.open_store()?.list_change_events(after_seq, limit)
    }
}
