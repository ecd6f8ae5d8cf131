//! Collaborator interfaces the engine is driven through.
//!
//! Persistence, change recording, archiving, hierarchy lookup, id allocation and
//! time are all supplied by the caller; the engine keeps no state between calls.

use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::error::PortError;
use crate::model::{
    ArchivedDataInstance, ArchivedDataInstanceId, ChangeEvent, ContainerHierarchy, ContainerRef,
    DataChangeSet, DataInstance, Page,
};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum EntityKind {
    DataInstance,
    ArchivedDataInstance,
}

impl EntityKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DataInstance => "data_instance",
            Self::ArchivedDataInstance => "archived_data_instance",
        }
    }
}

/// One row returned by the persistence executor.
#[derive(Debug, Clone, PartialEq)]
pub enum Row {
    Data(DataInstance),
    Archived(ArchivedDataInstance),
}

impl Row {
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Data(_) => EntityKind::DataInstance,
            Self::Archived(_) => EntityKind::ArchivedDataInstance,
        }
    }
}

/// Typed view over [`Row`].
pub trait FromRow: Sized {
    const KIND: EntityKind;

    fn from_row(row: Row) -> Option<Self>;
}

impl FromRow for DataInstance {
    const KIND: EntityKind = EntityKind::DataInstance;

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::Data(instance) => Some(instance),
            Row::Archived(_) => None,
        }
    }
}

impl FromRow for ArchivedDataInstance {
    const KIND: EntityKind = EntityKind::ArchivedDataInstance;

    fn from_row(row: Row) -> Option<Self> {
        match row {
            Row::Archived(archived) => Some(archived),
            Row::Data(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryParam {
    Int(i64),
    Text(String),
    IntList(Vec<i64>),
    TextList(Vec<String>),
    Time(OffsetDateTime),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryParams(BTreeMap<String, QueryParam>);

impl QueryParams {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: QueryParam) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: QueryParam) {
        self.0.insert(key.into(), value);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&QueryParam> {
        self.0.get(key)
    }

    #[must_use]
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(QueryParam::Int(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(QueryParam::Text(value)) => Some(value.as_str()),
            _ => None,
        }
    }

    #[must_use]
    pub fn int_list(&self, key: &str) -> Option<&[i64]> {
        match self.0.get(key) {
            Some(QueryParam::IntList(values)) => Some(values.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn text_list(&self, key: &str) -> Option<&[String]> {
        match self.0.get(key) {
            Some(QueryParam::TextList(values)) => Some(values.as_slice()),
            _ => None,
        }
    }

    #[must_use]
    pub fn time(&self, key: &str) -> Option<OffsetDateTime> {
        match self.0.get(key) {
            Some(QueryParam::Time(value)) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

/// A named query plus its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub query_id: String,
    pub params: QueryParams,
}

impl SelectQuery {
    #[must_use]
    pub fn new(query_id: impl Into<String>, params: QueryParams) -> Self {
        Self { query_id: query_id.into(), params }
    }
}

pub trait ReadPersistence {
    /// # Errors
    /// Returns [`PortError`] when the query cannot be executed.
    fn select_one(&self, query: &SelectQuery) -> Result<Option<Row>, PortError>;

    /// # Errors
    /// Returns [`PortError`] when the query cannot be executed.
    fn select_list(&self, query: &SelectQuery, page: Page) -> Result<Vec<Row>, PortError>;

    /// # Errors
    /// Returns [`PortError`] when the lookup cannot be executed.
    fn select_by_id(&self, kind: EntityKind, id: i64) -> Result<Option<Row>, PortError>;

    /// # Errors
    /// Returns [`PortError`] when the count query cannot be executed.
    fn count_entities(&self, query: &SelectQuery) -> Result<u64, PortError>;
}

/// Write-and-notify side of live data persistence.
pub trait Recorder {
    /// # Errors
    /// Returns [`PortError`] when the row cannot be written.
    fn record_insert(
        &self,
        instance: &DataInstance,
        event: Option<&ChangeEvent>,
    ) -> Result<(), PortError>;

    /// # Errors
    /// Returns [`PortError`] when the row cannot be updated.
    fn record_update(
        &self,
        instance: &DataInstance,
        changes: &DataChangeSet,
        event: Option<&ChangeEvent>,
    ) -> Result<(), PortError>;

    /// # Errors
    /// Returns [`PortError`] when the row cannot be removed.
    fn record_delete(
        &self,
        instance: &DataInstance,
        event: Option<&ChangeEvent>,
    ) -> Result<(), PortError>;
}

/// Append-only archive. Individual rows are never updated; only whole batches
/// of a discarded container are purged.
pub trait ArchiveWriter {
    /// # Errors
    /// Returns [`PortError`] when the snapshot cannot be appended.
    fn record_archive_insert(
        &self,
        archive_date: OffsetDateTime,
        row: &ArchivedDataInstance,
    ) -> Result<(), PortError>;

    /// # Errors
    /// Returns [`PortError`] when the rows cannot be purged.
    fn purge_archived(&self, ids: &[ArchivedDataInstanceId]) -> Result<usize, PortError>;
}

pub trait ContainerHierarchyResolver {
    /// # Errors
    /// Returns [`PortError::NotFound`] when the container is unknown or no longer live.
    fn resolve_live(&self, container: &ContainerRef) -> Result<ContainerHierarchy, PortError>;

    /// # Errors
    /// Returns [`PortError::NotFound`] when the container was never recorded.
    fn resolve_archived(&self, container: &ContainerRef)
        -> Result<ContainerHierarchy, PortError>;
}

pub trait IdSequence {
    /// # Errors
    /// Returns [`PortError`] when no id can be allocated.
    fn next_id(&self, kind: EntityKind) -> Result<i64, PortError>;
}

pub trait Clock {
    fn now(&self) -> OffsetDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// Every collaborator one engine call needs, borrowed for the call.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub persistence: &'a dyn ReadPersistence,
    pub recorder: &'a dyn Recorder,
    pub archive: &'a dyn ArchiveWriter,
    pub hierarchy: &'a dyn ContainerHierarchyResolver,
    pub ids: &'a dyn IdSequence,
    pub clock: &'a dyn Clock,
}

impl<'a> Collaborators<'a> {
    /// Borrow all ports from one backend that implements them together.
    pub fn from_backend<B>(backend: &'a B, clock: &'a dyn Clock) -> Self
    where
        B: ReadPersistence + Recorder + ArchiveWriter + ContainerHierarchyResolver + IdSequence,
    {
        Self {
            persistence: backend,
            recorder: backend,
            archive: backend,
            hierarchy: backend,
            ids: backend,
            clock,
        }
    }
}
