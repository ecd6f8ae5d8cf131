use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use scoped_data_core::{
    ArchiveWriter, ArchivedDataInstance, ArchivedDataInstanceId, ChangeEvent, ChangeKind,
    ContainerHierarchy, ContainerHierarchyResolver, ContainerRef, DataChangeSet, DataInstance,
    DataInstanceId, DataValue, EntityKind, IdSequence, Page, PortError, ReadPersistence, Recorder,
    Row, SelectQuery,
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::{debug, info};

mod query;

use query::{compile, CompiledQuery, ARCHIVED_COLUMNS, DATA_COLUMNS};

const LATEST_SCHEMA_VERSION: i64 = 2;

/// Longest ancestor chain a hierarchy walk follows before giving up.
pub const MAX_HIERARCHY_DEPTH: usize = 1024;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS containers (
  container_id INTEGER NOT NULL,
  container_type TEXT NOT NULL,
  parent_id INTEGER,
  parent_type TEXT,
  state TEXT NOT NULL CHECK (state IN ('live','archived')),
  created_at TEXT NOT NULL,
  archived_at TEXT,
  PRIMARY KEY (container_id, container_type),
  FOREIGN KEY (parent_id, parent_type) REFERENCES containers(container_id, container_type)
);

CREATE TABLE IF NOT EXISTS id_sequences (
  entity TEXT PRIMARY KEY,
  next_id INTEGER NOT NULL CHECK (next_id >= 1)
);

INSERT OR IGNORE INTO id_sequences(entity, next_id) VALUES ('data_instance', 1);
INSERT OR IGNORE INTO id_sequences(entity, next_id) VALUES ('archived_data_instance', 1);

CREATE TABLE IF NOT EXISTS data_instances (
  id INTEGER PRIMARY KEY,
  name TEXT NOT NULL,
  description TEXT,
  container_id INTEGER NOT NULL,
  container_type TEXT NOT NULL,
  value_json TEXT NOT NULL,
  is_transient INTEGER NOT NULL CHECK (is_transient IN (0,1)),
  UNIQUE (container_id, container_type, name),
  FOREIGN KEY (container_id, container_type) REFERENCES containers(container_id, container_type)
);

CREATE TABLE IF NOT EXISTS archived_data_instances (
  id INTEGER PRIMARY KEY,
  source_object_id INTEGER NOT NULL,
  name TEXT NOT NULL,
  description TEXT,
  container_id INTEGER NOT NULL,
  container_type TEXT NOT NULL,
  value_json TEXT NOT NULL,
  archive_date INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_containers_parent ON containers(parent_type, parent_id);
CREATE INDEX IF NOT EXISTS idx_data_instances_container
  ON data_instances(container_type, container_id, name);
CREATE INDEX IF NOT EXISTS idx_archived_container
  ON archived_data_instances(container_type, container_id, name, archive_date);
CREATE INDEX IF NOT EXISTS idx_archived_source
  ON archived_data_instances(source_object_id, archive_date);
";

const MIGRATION_002_SQL: &str = r"
CREATE TABLE IF NOT EXISTS change_events (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  kind TEXT NOT NULL CHECK (kind IN ('created','updated','deleted')),
  data_instance_id INTEGER NOT NULL,
  name TEXT NOT NULL,
  container_id INTEGER NOT NULL,
  container_type TEXT NOT NULL,
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_change_events_instance ON change_events(data_instance_id);
";

const MIGRATIONS: [(i64, &str); 2] = [(1, MIGRATION_001_SQL), (2, MIGRATION_002_SQL)];

/// One database implementing every collaborator the engine is driven through.
pub struct SqliteStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ForeignKeyViolation {
    pub table: String,
    pub rowid: i64,
    pub parent: String,
    pub fk_index: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub foreign_key_violations: Vec<ForeignKeyViolation>,
    pub schema_status: SchemaStatus,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ContainerState {
    Live,
    Archived,
}

impl ContainerState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Archived => "archived",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "live" => Some(Self::Live),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContainerRecord {
    pub container: ContainerRef,
    pub parent: Option<ContainerRef>,
    pub state: ContainerState,
}

/// A [`ChangeEvent`] as kept in the notification outbox.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredChangeEvent {
    pub seq: i64,
    pub recorded_at: String,
    #[serde(flatten)]
    pub event: ChangeEvent,
}

impl SqliteStore {
    /// Open a SQLite-backed data store and configure required runtime pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let current_version = current_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when the recorded version is newer than this build or any
    /// migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let current = current_schema_version(&self.conn)?;
        if current > LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {current}; expected at most {LATEST_SCHEMA_VERSION}"
            ));
        }

        for (version, sql) in MIGRATIONS {
            if version <= current {
                continue;
            }
            let tx = self
                .conn
                .transaction()
                .with_context(|| format!("failed to start migration v{version} transaction"))?;
            tx.execute_batch(sql).with_context(|| format!("failed to apply migration v{version}"))?;
            record_schema_version(&tx, version)?;
            tx.commit().with_context(|| format!("failed to commit migration v{version}"))?;
            info!(version, "applied schema migration");
        }

        Ok(())
    }

    /// Run `work` inside one transaction: commit on success, roll back on error.
    ///
    /// # Errors
    /// Returns the error of `work`, or an error when the transaction cannot be
    /// started or committed.
    pub fn unit_of_work<T, E, F>(&self, work: F) -> Result<T>
    where
        F: FnOnce(&Self) -> std::result::Result<T, E>,
        E: Into<anyhow::Error>,
    {
        let tx = self.conn.unchecked_transaction().context("failed to start transaction")?;
        match work(self) {
            Ok(value) => {
                tx.commit().context("failed to commit transaction")?;
                Ok(value)
            }
            Err(err) => {
                tx.rollback().context("failed to roll back transaction")?;
                Err(err.into())
            }
        }
    }

    /// Register a live container under `parent` (or as a root).
    ///
    /// # Errors
    /// Returns an error when the container already exists, the parent is unknown or
    /// archived, or the insert fails.
    pub fn register_container(
        &self,
        container: &ContainerRef,
        parent: Option<&ContainerRef>,
    ) -> Result<ContainerRecord> {
        container.validate().map_err(|err| anyhow!("container validation failed: {err}"))?;
        if let Some(parent) = parent {
            match self.container(parent)? {
                Some(record) if record.state == ContainerState::Live => {}
                Some(_) => return Err(anyhow!("parent container {parent} is archived")),
                None => return Err(anyhow!("parent container {parent} does not exist")),
            }
        }

        self.conn
            .execute(
                "INSERT INTO containers(
                    container_id, container_type, parent_id, parent_type, state, created_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    container.container_id,
                    container.container_type,
                    parent.map(|parent| parent.container_id),
                    parent.map(|parent| parent.container_type.as_str()),
                    ContainerState::Live.as_str(),
                    now_rfc3339()?,
                ],
            )
            .with_context(|| format!("failed to register container {container}"))?;
        debug!(%container, "registered container");

        Ok(ContainerRecord {
            container: container.clone(),
            parent: parent.cloned(),
            state: ContainerState::Live,
        })
    }

    /// Mark a container as no longer live. Its data history stays readable.
    ///
    /// # Errors
    /// Returns an error when the container is unknown or the update fails.
    pub fn archive_container(&self, container: &ContainerRef) -> Result<ContainerRecord> {
        let updated = self
            .conn
            .execute(
                "UPDATE containers SET state = ?1, archived_at = ?2
                 WHERE container_id = ?3 AND container_type = ?4",
                params![
                    ContainerState::Archived.as_str(),
                    now_rfc3339()?,
                    container.container_id,
                    container.container_type,
                ],
            )
            .with_context(|| format!("failed to archive container {container}"))?;
        if updated == 0 {
            return Err(anyhow!("container {container} does not exist"));
        }

        self.container(container)?
            .ok_or_else(|| anyhow!("container {container} vanished while archiving"))
    }

    /// # Errors
    /// Returns an error when the row cannot be read or decoded.
    pub fn container(&self, container: &ContainerRef) -> Result<Option<ContainerRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT parent_id, parent_type, state FROM containers
                 WHERE container_id = ?1 AND container_type = ?2",
                params![container.container_id, container.container_type],
                |row| {
                    Ok((
                        row.get::<_, Option<i64>>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .with_context(|| format!("failed to read container {container}"))?;

        let Some((parent_id, parent_type, state_raw)) = row else {
            return Ok(None);
        };
        let state = ContainerState::parse(&state_raw)
            .ok_or_else(|| anyhow!("unknown container state: {state_raw}"))?;
        let parent = match (parent_id, parent_type) {
            (Some(parent_id), Some(parent_type)) => Some(ContainerRef::new(parent_id, parent_type)),
            _ => None,
        };
        Ok(Some(ContainerRecord { container: container.clone(), parent, state }))
    }

    /// Change events recorded after `after_seq`, oldest first.
    ///
    /// # Errors
    /// Returns an error when the rows cannot be read or decoded.
    pub fn list_change_events(
        &self,
        after_seq: i64,
        limit: usize,
    ) -> Result<Vec<StoredChangeEvent>> {
        let limit = i64::try_from(limit).context("event limit out of range")?;
        let mut stmt = self
            .conn
            .prepare(
                "SELECT seq, kind, data_instance_id, name, container_id, container_type, recorded_at
                 FROM change_events
                 WHERE seq > ?1
                 ORDER BY seq ASC
                 LIMIT ?2",
            )
            .context("failed to prepare change event listing")?;
        let mut rows = stmt.query(params![after_seq, limit])?;

        let mut events = Vec::new();
        while let Some(row) = rows.next()? {
            let kind_raw: String = row.get(1)?;
            let kind = ChangeKind::parse(&kind_raw)
                .ok_or_else(|| anyhow!("unknown change kind: {kind_raw}"))?;
            events.push(StoredChangeEvent {
                seq: row.get(0)?,
                recorded_at: row.get(6)?,
                event: ChangeEvent {
                    kind,
                    data_instance_id: DataInstanceId(row.get(2)?),
                    name: row.get(3)?,
                    container: ContainerRef::new(row.get::<_, i64>(4)?, row.get::<_, String>(5)?),
                },
            });
        }
        Ok(events)
    }

    /// Run quick-check, foreign-key-check, and schema status health checks.
    ///
    /// # Errors
    /// Returns an error when any integrity check query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let mut stmt = self
            .conn
            .prepare("PRAGMA foreign_key_check")
            .context("failed to prepare PRAGMA foreign_key_check")?;
        let rows = stmt.query_map([], |row| {
            Ok(ForeignKeyViolation {
                table: row.get(0)?,
                rowid: row.get(1)?,
                parent: row.get(2)?,
                fk_index: row.get(3)?,
            })
        })?;

        let mut foreign_key_violations = Vec::new();
        for row in rows {
            foreign_key_violations.push(row?);
        }

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            foreign_key_violations,
            schema_status,
        })
    }

    fn query_rows(&self, compiled: &CompiledQuery) -> Result<Vec<Row>> {
        let mut stmt = self
            .conn
            .prepare(&compiled.sql)
            .with_context(|| format!("failed to prepare statement: {}", compiled.sql))?;
        let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;

        let mut decoded = Vec::new();
        while let Some(row) = rows.next()? {
            decoded.push(match compiled.entity {
                EntityKind::DataInstance => Row::Data(decode_data_instance(row)?),
                EntityKind::ArchivedDataInstance => Row::Archived(decode_archived(row)?),
            });
        }
        Ok(decoded)
    }

    fn insert_event(&self, event: Option<&ChangeEvent>) -> Result<()> {
        let Some(event) = event else {
            return Ok(());
        };
        self.conn
            .execute(
                "INSERT INTO change_events(
                    kind, data_instance_id, name, container_id, container_type, recorded_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.kind.as_str(),
                    event.data_instance_id.0,
                    event.name,
                    event.container.container_id,
                    event.container.container_type,
                    now_rfc3339()?,
                ],
            )
            .context("failed to insert change event")?;
        Ok(())
    }

    fn walk_hierarchy(
        &self,
        container: &ContainerRef,
        live_only: bool,
    ) -> std::result::Result<ContainerHierarchy, PortError> {
        let mut chain = Vec::new();
        let mut seen = BTreeSet::new();
        let mut current = Some(container.clone());

        while let Some(step) = current {
            if chain.len() >= MAX_HIERARCHY_DEPTH {
                return Err(PortError::backend(format!(
                    "hierarchy of {container} is deeper than {MAX_HIERARCHY_DEPTH}"
                )));
            }
            if !seen.insert(step.clone()) {
                return Err(PortError::backend(format!(
                    "hierarchy of {container} loops back to {step}"
                )));
            }

            let Some(record) = self.container(&step).map_err(PortError::backend)? else {
                return Err(PortError::NotFound(format!("container {step}")));
            };
            if live_only && record.state != ContainerState::Live {
                return Err(PortError::NotFound(format!("live container {step}")));
            }

            current = record.parent;
            chain.push(step);
        }

        debug!(%container, depth = chain.len(), live_only, "resolved container hierarchy");
        Ok(ContainerHierarchy::new(chain))
    }
}

impl ReadPersistence for SqliteStore {
    fn select_one(&self, query: &SelectQuery) -> std::result::Result<Option<Row>, PortError> {
        let compiled = compile(query).map_err(PortError::backend)?;
        let rows = self.query_rows(&compiled).map_err(PortError::backend)?;
        Ok(rows.into_iter().next())
    }

    fn select_list(
        &self,
        query: &SelectQuery,
        page: Page,
    ) -> std::result::Result<Vec<Row>, PortError> {
        let compiled = compile(query).and_then(|compiled| compiled.paged(page));
        let compiled = compiled.map_err(PortError::backend)?;
        self.query_rows(&compiled).map_err(PortError::backend)
    }

    fn select_by_id(
        &self,
        kind: EntityKind,
        id: i64,
    ) -> std::result::Result<Option<Row>, PortError> {
        let row = match kind {
            EntityKind::DataInstance => self
                .conn
                .query_row(
                    &format!("SELECT {DATA_COLUMNS} FROM data_instances WHERE id = ?1"),
                    params![id],
                    |row| Ok(decode_data_instance(row)),
                )
                .optional()
                .context("failed to read data instance by id")
                .and_then(Option::transpose)
                .map(|row| row.map(Row::Data)),
            EntityKind::ArchivedDataInstance => self
                .conn
                .query_row(
                    &format!(
                        "SELECT {ARCHIVED_COLUMNS} FROM archived_data_instances WHERE id = ?1"
                    ),
                    params![id],
                    |row| Ok(decode_archived(row)),
                )
                .optional()
                .context("failed to read archived data instance by id")
                .and_then(Option::transpose)
                .map(|row| row.map(Row::Archived)),
        };
        row.map_err(PortError::backend)
    }

    fn count_entities(&self, query: &SelectQuery) -> std::result::Result<u64, PortError> {
        let compiled = compile(query).map_err(PortError::backend)?.counted();
        let count = self
            .conn
            .query_row(&compiled.sql, params_from_iter(compiled.params.iter()), |row| {
                row.get::<_, i64>(0)
            })
            .with_context(|| format!("failed to count rows of {}", query.query_id))
            .map_err(PortError::backend)?;
        u64::try_from(count).map_err(PortError::backend)
    }
}

impl Recorder for SqliteStore {
    fn record_insert(
        &self,
        instance: &DataInstance,
        event: Option<&ChangeEvent>,
    ) -> std::result::Result<(), PortError> {
        let write = || -> Result<()> {
            self.conn
                .execute(
                    "INSERT INTO data_instances(
                        id, name, description, container_id, container_type, value_json,
                        is_transient
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                    params![
                        instance.id.0,
                        instance.name,
                        instance.description,
                        instance.container_id,
                        instance.container_type,
                        encode_value(&instance.value)?,
                        instance.is_transient,
                    ],
                )
                .with_context(|| format!("failed to insert data `{}`", instance.name))?;
            self.insert_event(event)
        };
        write().map_err(PortError::backend)
    }

    fn record_update(
        &self,
        instance: &DataInstance,
        changes: &DataChangeSet,
        event: Option<&ChangeEvent>,
    ) -> std::result::Result<(), PortError> {
        let write = || -> Result<usize> {
            let mut updated = 0;
            if changes.value.is_some() {
                updated = self
                    .conn
                    .execute(
                        "UPDATE data_instances SET value_json = ?1 WHERE id = ?2",
                        params![encode_value(&instance.value)?, instance.id.0],
                    )
                    .with_context(|| format!("failed to update value of `{}`", instance.name))?;
            }
            if changes.description.is_some() {
                updated = self
                    .conn
                    .execute(
                        "UPDATE data_instances SET description = ?1 WHERE id = ?2",
                        params![instance.description, instance.id.0],
                    )
                    .with_context(|| {
                        format!("failed to update description of `{}`", instance.name)
                    })?;
            }
            if updated > 0 {
                self.insert_event(event)?;
            }
            Ok(updated)
        };

        match write().map_err(PortError::backend)? {
            0 => Err(PortError::NotFound(format!("data instance {}", instance.id))),
            _ => Ok(()),
        }
    }

    fn record_delete(
        &self,
        instance: &DataInstance,
        event: Option<&ChangeEvent>,
    ) -> std::result::Result<(), PortError> {
        let write = || -> Result<usize> {
            let deleted = self
                .conn
                .execute("DELETE FROM data_instances WHERE id = ?1", params![instance.id.0])
                .with_context(|| format!("failed to delete data `{}`", instance.name))?;
            if deleted > 0 {
                self.insert_event(event)?;
            }
            Ok(deleted)
        };

        match write().map_err(PortError::backend)? {
            0 => Err(PortError::NotFound(format!("data instance {}", instance.id))),
            _ => Ok(()),
        }
    }
}

impl ArchiveWriter for SqliteStore {
    fn record_archive_insert(
        &self,
        archive_date: OffsetDateTime,
        row: &ArchivedDataInstance,
    ) -> std::result::Result<(), PortError> {
        let write = || -> Result<()> {
            self.conn
                .execute(
                    "INSERT INTO archived_data_instances(
                        id, source_object_id, name, description, container_id, container_type,
                        value_json, archive_date
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        row.id.0,
                        row.source_object_id.0,
                        row.name,
                        row.description,
                        row.container_id,
                        row.container_type,
                        encode_value(&row.value)?,
                        to_nanos(archive_date)?,
                    ],
                )
                .with_context(|| format!("failed to archive data `{}`", row.name))?;
            Ok(())
        };
        write().map_err(PortError::backend)
    }

    fn purge_archived(
        &self,
        ids: &[ArchivedDataInstanceId],
    ) -> std::result::Result<usize, PortError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let placeholders =
            (1..=ids.len()).map(|index| format!("?{index}")).collect::<Vec<_>>().join(", ");
        let purged = self
            .conn
            .execute(
                &format!("DELETE FROM archived_data_instances WHERE id IN ({placeholders})"),
                params_from_iter(ids.iter().map(|id| id.0)),
            )
            .context("failed to purge archived data")
            .map_err(PortError::backend)?;
        info!(purged, "purged archived data batch");
        Ok(purged)
    }
}

impl ContainerHierarchyResolver for SqliteStore {
    fn resolve_live(
        &self,
        container: &ContainerRef,
    ) -> std::result::Result<ContainerHierarchy, PortError> {
        self.walk_hierarchy(container, true)
    }

    fn resolve_archived(
        &self,
        container: &ContainerRef,
    ) -> std::result::Result<ContainerHierarchy, PortError> {
        self.walk_hierarchy(container, false)
    }
}

impl IdSequence for SqliteStore {
    fn next_id(&self, kind: EntityKind) -> std::result::Result<i64, PortError> {
        self.conn
            .query_row(
                "UPDATE id_sequences SET next_id = next_id + 1 WHERE entity = ?1
                 RETURNING next_id - 1",
                params![kind.as_str()],
                |row| row.get::<_, i64>(0),
            )
            .with_context(|| format!("failed to allocate {} id", kind.as_str()))
            .map_err(PortError::backend)
    }
}

fn decode_data_instance(row: &rusqlite::Row<'_>) -> Result<DataInstance> {
    let value_json: String = row.get(5)?;
    Ok(DataInstance {
        id: DataInstanceId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        container_id: row.get(3)?,
        container_type: row.get(4)?,
        value: decode_value(&value_json)?,
        is_transient: row.get(6)?,
    })
}

fn decode_archived(row: &rusqlite::Row<'_>) -> Result<ArchivedDataInstance> {
    let value_json: String = row.get(6)?;
    Ok(ArchivedDataInstance {
        id: ArchivedDataInstanceId(row.get(0)?),
        source_object_id: DataInstanceId(row.get(1)?),
        name: row.get(2)?,
        description: row.get(3)?,
        container_id: row.get(4)?,
        container_type: row.get(5)?,
        value: decode_value(&value_json)?,
        archive_date: from_nanos(row.get(7)?)?,
    })
}

fn encode_value(value: &DataValue) -> Result<String> {
    serde_json::to_string(value).context("failed to serialize data value")
}

fn decode_value(raw: &str) -> Result<DataValue> {
    serde_json::from_str(raw).context("failed to deserialize data value")
}

pub(crate) fn to_nanos(value: OffsetDateTime) -> Result<i64> {
    i64::try_from(value.unix_timestamp_nanos())
        .with_context(|| format!("timestamp out of storable range: {value}"))
}

fn from_nanos(value: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(value))
        .with_context(|| format!("invalid stored timestamp: {value}"))
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = now_rfc3339()?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}
