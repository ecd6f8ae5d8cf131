//! In-memory collaborators for engine tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use time::OffsetDateTime;

use crate::error::PortError;
use crate::model::{
    ArchivedDataInstance, ArchivedDataInstanceId, ChangeEvent, ContainerHierarchy, ContainerRef,
    DataChangeSet, DataInstance, DataInstanceId, DataValue, NewDataInstance, Page,
};
use crate::ports::{
    ArchiveWriter, Clock, Collaborators, ContainerHierarchyResolver, EntityKind, IdSequence,
    ReadPersistence, Recorder, Row, SelectQuery,
};
use crate::queries;

pub(crate) fn at(seconds: i64) -> OffsetDateTime {
    OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(seconds)
}

pub(crate) fn text(value: &DataValue) -> &str {
    match value {
        DataValue::Text(text) => text,
        other => panic!("expected text value, got {other:?}"),
    }
}

#[derive(Debug)]
pub(crate) struct FixedClock(Cell<OffsetDateTime>);

impl FixedClock {
    pub(crate) fn at(seconds: i64) -> Self {
        Self(Cell::new(at(seconds)))
    }

    pub(crate) fn set(&self, seconds: i64) {
        self.0.set(at(seconds));
    }
}

impl Clock for FixedClock {
    fn now(&self) -> OffsetDateTime {
        self.0.get()
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeBackend {
    pub(crate) live: RefCell<Vec<DataInstance>>,
    pub(crate) archived: RefCell<Vec<ArchivedDataInstance>>,
    pub(crate) events: RefCell<Vec<ChangeEvent>>,
    live_hierarchies: RefCell<BTreeMap<ContainerRef, ContainerHierarchy>>,
    archived_hierarchies: RefCell<BTreeMap<ContainerRef, ContainerHierarchy>>,
    next_id: Cell<i64>,

    pub(crate) select_calls: Cell<usize>,
    pub(crate) hierarchy_calls: Cell<usize>,
    pub(crate) recorder_calls: Cell<usize>,
    pub(crate) archive_calls: Cell<usize>,
    pub(crate) purge_calls: Cell<usize>,

    pub(crate) fail_reads: Cell<bool>,
    pub(crate) fail_writes: Cell<bool>,
    pub(crate) fail_archive: Cell<bool>,
    /// Purges report success but remove nothing.
    pub(crate) purge_noop: Cell<bool>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn ports<'a>(&'a self, clock: &'a FixedClock) -> Collaborators<'a> {
        Collaborators::from_backend(self, clock)
    }

    /// Register `chain` (leaf first) as both the live and the archived hierarchy
    /// of every container on it.
    pub(crate) fn with_chain(self, chain: &[ContainerRef]) -> Self {
        for start in 0..chain.len() {
            let hierarchy = ContainerHierarchy::new(chain[start..].to_vec());
            self.live_hierarchies.borrow_mut().insert(chain[start].clone(), hierarchy.clone());
            self.archived_hierarchies.borrow_mut().insert(chain[start].clone(), hierarchy);
        }
        self
    }

    /// Drop the live hierarchy of `container`, keeping its archived one.
    pub(crate) fn retire(&self, container: &ContainerRef) {
        self.live_hierarchies.borrow_mut().remove(container);
    }

    pub(crate) fn seed_live(
        &self,
        name: &str,
        container: &ContainerRef,
        value: &str,
    ) -> DataInstance {
        let id = self.allocate();
        let instance = NewDataInstance::new(name, container.clone(), value.into())
            .into_instance(DataInstanceId(id));
        self.live.borrow_mut().push(instance.clone());
        instance
    }

    pub(crate) fn seed_archived(
        &self,
        name: &str,
        container: &ContainerRef,
        value: &str,
        seconds: i64,
    ) -> ArchivedDataInstance {
        let source_id = self.allocate();
        let source = NewDataInstance::new(name, container.clone(), value.into())
            .into_instance(DataInstanceId(source_id));
        let row = ArchivedDataInstance::snapshot(
            &source,
            ArchivedDataInstanceId(self.allocate()),
            at(seconds),
        );
        self.archived.borrow_mut().push(row.clone());
        row
    }

    pub(crate) fn reset_counters(&self) {
        self.select_calls.set(0);
        self.hierarchy_calls.set(0);
        self.recorder_calls.set(0);
        self.archive_calls.set(0);
        self.purge_calls.set(0);
    }

    fn allocate(&self) -> i64 {
        let id = self.next_id.get() + 1;
        self.next_id.set(id);
        id
    }

    fn bump(counter: &Cell<usize>) {
        counter.set(counter.get() + 1);
    }

    fn check_read(&self) -> Result<(), PortError> {
        Self::bump(&self.select_calls);
        if self.fail_reads.get() {
            return Err(PortError::backend("injected read failure"));
        }
        Ok(())
    }

    fn check_write(&self) -> Result<(), PortError> {
        Self::bump(&self.recorder_calls);
        if self.fail_writes.get() {
            return Err(PortError::backend("injected write failure"));
        }
        Ok(())
    }

    fn in_groups(query: &SelectQuery, container_id: i64, container_type: &str) -> bool {
        (1..).map_while(|group| {
            let tag = query.params.text(&queries::container_type_key(group))?;
            let ids = query.params.int_list(&queries::container_ids_key(group))?;
            Some(tag == container_type && ids.contains(&container_id))
        })
        .any(|hit| hit)
    }

    fn named(query: &SelectQuery, name: &str) -> bool {
        query
            .params
            .text_list(queries::PARAM_NAMES)
            .map_or(true, |names| names.iter().any(|candidate| candidate == name))
    }

    fn of_container(query: &SelectQuery, container_id: i64, container_type: &str) -> bool {
        query.params.int(queries::PARAM_CONTAINER_ID) == Some(container_id)
            && query.params.text(queries::PARAM_CONTAINER_TYPE) == Some(container_type)
    }

    fn as_of(query: &SelectQuery, archive_date: OffsetDateTime) -> bool {
        query.params.time(queries::PARAM_TIME).map_or(true, |time| archive_date <= time)
    }

    fn run(&self, query: &SelectQuery) -> Result<Vec<Row>, PortError> {
        let live = self.live.borrow();
        let archived = self.archived.borrow();
        let query_id = query.query_id.as_str();

        if let Some((base, _)) = queries::parse_variant_id(query_id) {
            let rows = if base == queries::DATA_INSTANCES_WITH_NAMES
                || base == queries::DATA_INSTANCES
            {
                live.iter()
                    .filter(|row| Self::in_groups(query, row.container_id, &row.container_type))
                    .filter(|row| Self::named(query, &row.name))
                    .cloned()
                    .map(Row::Data)
                    .collect()
            } else {
                archived
                    .iter()
                    .filter(|row| Self::in_groups(query, row.container_id, &row.container_type))
                    .filter(|row| Self::named(query, &row.name))
                    .filter(|row| Self::as_of(query, row.archive_date))
                    .cloned()
                    .map(Row::Archived)
                    .collect()
            };
            return Ok(rows);
        }

        let rows = match query_id {
            queries::DATA_INSTANCE_BY_NAME_AND_CONTAINER => live
                .iter()
                .filter(|row| Self::of_container(query, row.container_id, &row.container_type))
                .filter(|row| query.params.text(queries::PARAM_NAME) == Some(row.name.as_str()))
                .cloned()
                .map(Row::Data)
                .collect(),
            queries::DATA_INSTANCES_OF_CONTAINER | queries::COUNT_DATA_INSTANCES_OF_CONTAINER => {
                let mut rows = live
                    .iter()
                    .filter(|row| Self::of_container(query, row.container_id, &row.container_type))
                    .cloned()
                    .collect::<Vec<_>>();
                rows.sort_by_key(|row| row.id);
                rows.into_iter().map(Row::Data).collect()
            }
            queries::ARCHIVED_DATA_INSTANCES_OF_CONTAINER => {
                let mut rows = archived
                    .iter()
                    .filter(|row| Self::of_container(query, row.container_id, &row.container_type))
                    .cloned()
                    .collect::<Vec<_>>();
                rows.sort_by_key(|row| row.id);
                rows.into_iter().map(Row::Archived).collect()
            }
            queries::ARCHIVED_DATA_INSTANCES_BY_SOURCE_ID
            | queries::LAST_ARCHIVED_DATA_INSTANCE_BY_SOURCE_ID => {
                let source = query.params.int(queries::PARAM_SOURCE_OBJECT_ID);
                let mut rows = archived
                    .iter()
                    .filter(|row| Some(row.source_object_id.0) == source)
                    .filter(|row| Self::as_of(query, row.archive_date))
                    .cloned()
                    .collect::<Vec<_>>();
                rows.sort_by_key(|row| (row.archive_date, row.id));
                if query_id == queries::LAST_ARCHIVED_DATA_INSTANCE_BY_SOURCE_ID {
                    rows = rows.pop().into_iter().collect();
                }
                rows.into_iter().map(Row::Archived).collect()
            }
            other => return Err(PortError::backend(format!("unknown query id `{other}`"))),
        };
        Ok(rows)
    }
}

impl ReadPersistence for FakeBackend {
    fn select_one(&self, query: &SelectQuery) -> Result<Option<Row>, PortError> {
        self.check_read()?;
        Ok(self.run(query)?.into_iter().next())
    }

    fn select_list(&self, query: &SelectQuery, page: Page) -> Result<Vec<Row>, PortError> {
        self.check_read()?;
        Ok(page.slice(self.run(query)?))
    }

    fn select_by_id(&self, kind: EntityKind, id: i64) -> Result<Option<Row>, PortError> {
        self.check_read()?;
        let row = match kind {
            EntityKind::DataInstance => self
                .live
                .borrow()
                .iter()
                .find(|row| row.id.0 == id)
                .cloned()
                .map(Row::Data),
            EntityKind::ArchivedDataInstance => self
                .archived
                .borrow()
                .iter()
                .find(|row| row.id.0 == id)
                .cloned()
                .map(Row::Archived),
        };
        Ok(row)
    }

    fn count_entities(&self, query: &SelectQuery) -> Result<u64, PortError> {
        self.check_read()?;
        let rows = self.run(query)?;
        u64::try_from(rows.len()).map_err(PortError::backend)
    }
}

impl Recorder for FakeBackend {
    fn record_insert(
        &self,
        instance: &DataInstance,
        event: Option<&ChangeEvent>,
    ) -> Result<(), PortError> {
        self.check_write()?;
        self.live.borrow_mut().push(instance.clone());
        self.events.borrow_mut().extend(event.cloned());
        Ok(())
    }

    fn record_update(
        &self,
        instance: &DataInstance,
        changes: &DataChangeSet,
        event: Option<&ChangeEvent>,
    ) -> Result<(), PortError> {
        self.check_write()?;
        let mut live = self.live.borrow_mut();
        let Some(row) = live.iter_mut().find(|row| row.id == instance.id) else {
            return Err(PortError::NotFound(format!("data instance {}", instance.id)));
        };
        // Column-wise, like the SQL store.
        if changes.value.is_some() {
            row.value = instance.value.clone();
        }
        if changes.description.is_some() {
            row.description = instance.description.clone();
        }
        self.events.borrow_mut().extend(event.cloned());
        Ok(())
    }

    fn record_delete(
        &self,
        instance: &DataInstance,
        event: Option<&ChangeEvent>,
    ) -> Result<(), PortError> {
        self.check_write()?;
        self.live.borrow_mut().retain(|row| row.id != instance.id);
        self.events.borrow_mut().extend(event.cloned());
        Ok(())
    }
}

impl ArchiveWriter for FakeBackend {
    fn record_archive_insert(
        &self,
        archive_date: OffsetDateTime,
        row: &ArchivedDataInstance,
    ) -> Result<(), PortError> {
        Self::bump(&self.archive_calls);
        if self.fail_archive.get() {
            return Err(PortError::backend("injected archive failure"));
        }
        let mut row = row.clone();
        row.archive_date = archive_date;
        self.archived.borrow_mut().push(row);
        Ok(())
    }

    fn purge_archived(&self, ids: &[ArchivedDataInstanceId]) -> Result<usize, PortError> {
        Self::bump(&self.purge_calls);
        if self.purge_noop.get() {
            return Ok(0);
        }
        let mut archived = self.archived.borrow_mut();
        let before = archived.len();
        archived.retain(|row| !ids.contains(&row.id));
        Ok(before - archived.len())
    }
}

impl ContainerHierarchyResolver for FakeBackend {
    fn resolve_live(&self, container: &ContainerRef) -> Result<ContainerHierarchy, PortError> {
        Self::bump(&self.hierarchy_calls);
        if self.fail_reads.get() {
            return Err(PortError::backend("injected hierarchy failure"));
        }
        self.live_hierarchies
            .borrow()
            .get(container)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("live container {container}")))
    }

    fn resolve_archived(&self, container: &ContainerRef) -> Result<ContainerHierarchy, PortError> {
        Self::bump(&self.hierarchy_calls);
        if self.fail_reads.get() {
            return Err(PortError::backend("injected hierarchy failure"));
        }
        self.archived_hierarchies
            .borrow()
            .get(container)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("container {container}")))
    }
}

impl IdSequence for FakeBackend {
    fn next_id(&self, _kind: EntityKind) -> Result<i64, PortError> {
        Ok(self.allocate())
    }
}
