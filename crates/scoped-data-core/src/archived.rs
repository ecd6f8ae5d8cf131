use time::OffsetDateTime;

use crate::error::DataError;
use crate::live::container_query;
use crate::model::{
    ArchivedDataInstance, ArchivedDataInstanceId, ContainerHierarchy, ContainerRef,
    DataInstanceId, Page,
};
use crate::planner::{NameFilter, QueryFamily, QueryPlanner};
use crate::ports::{Collaborators, EntityKind, QueryParam, QueryParams, SelectQuery};
use crate::queries;
use crate::resolution::{fetch_candidates, row_into, rows_into};
use crate::shadow::{resolve_shadowing, resolve_single};

/// Point-in-time reads over the append-only archive.
pub struct ArchivedDataInstanceService<'a> {
    planner: &'a QueryPlanner,
    ports: Collaborators<'a>,
}

impl<'a> ArchivedDataInstanceService<'a> {
    #[must_use]
    pub fn new(planner: &'a QueryPlanner, ports: Collaborators<'a>) -> Self {
        Self { planner, ports }
    }

    fn resolve(
        &self,
        container: &ContainerRef,
        names: &NameFilter,
        as_of: OffsetDateTime,
    ) -> Result<(ContainerHierarchy, Vec<ArchivedDataInstance>), DataError> {
        let hierarchy = self.ports.hierarchy.resolve_archived(container).map_err(|err| {
            DataError::from_read(format!("resolve archived hierarchy of {container}"), err)
        })?;
        let candidates = fetch_candidates(
            self.planner,
            self.ports.persistence,
            QueryFamily::Archived,
            &hierarchy,
            names,
            Some(as_of),
        )?;
        Ok((hierarchy, candidates))
    }

    /// Value of `name` visible from `container` as of `as_of` (inclusive).
    ///
    /// # Errors
    /// - [`DataError::NotFound`] when nothing named `name` was archived by then.
    /// - [`DataError::ReadFailure`] when the hierarchy or the rows cannot be read.
    pub fn get(
        &self,
        name: &str,
        container: &ContainerRef,
        as_of: OffsetDateTime,
    ) -> Result<ArchivedDataInstance, DataError> {
        let (hierarchy, candidates) = self.resolve(container, &NameFilter::single(name), as_of)?;
        resolve_single(&hierarchy, candidates, name)?.ok_or_else(|| {
            DataError::NotFound(format!(
                "archived data `{name}` visible from {container} at {as_of}"
            ))
        })
    }

    /// # Errors
    /// Same as [`Self::get`], except that unresolved names are left out.
    pub fn get_many(
        &self,
        names: &[String],
        container: &ContainerRef,
        as_of: OffsetDateTime,
    ) -> Result<Vec<ArchivedDataInstance>, DataError> {
        let filter = NameFilter::only(names.iter().cloned());
        if filter.selects_nothing() {
            return Ok(Vec::new());
        }
        let (hierarchy, candidates) = self.resolve(container, &filter, as_of)?;
        resolve_shadowing(&hierarchy, candidates)
    }

    /// # Errors
    /// [`DataError::Validation`] for a zero `limit`, otherwise as [`Self::get`].
    pub fn get_all(
        &self,
        container: &ContainerRef,
        as_of: OffsetDateTime,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>, DataError> {
        let page = Page::checked(offset, limit)?;
        let (hierarchy, candidates) = self.resolve(container, &NameFilter::All, as_of)?;
        Ok(page.slice(resolve_shadowing(&hierarchy, candidates)?))
    }

    /// What data instance `source` held as of `as_of`.
    ///
    /// # Errors
    /// [`DataError::NotFound`] when `source` had no archived value by then.
    pub fn get_by_source_id(
        &self,
        source: DataInstanceId,
        as_of: OffsetDateTime,
    ) -> Result<ArchivedDataInstance, DataError> {
        let query_id = queries::LAST_ARCHIVED_DATA_INSTANCE_BY_SOURCE_ID;
        let query = SelectQuery::new(
            query_id,
            QueryParams::new()
                .with(queries::PARAM_SOURCE_OBJECT_ID, QueryParam::Int(source.0))
                .with(queries::PARAM_TIME, QueryParam::Time(as_of)),
        );
        let row = self.ports.persistence.select_one(&query).map_err(|err| {
            DataError::from_read(format!("fetch archived value of data instance {source}"), err)
        })?;
        match row {
            Some(row) => row_into(row, query_id),
            None => Err(DataError::NotFound(format!(
                "archived value of data instance {source} at {as_of}"
            ))),
        }
    }

    /// # Errors
    /// [`DataError::NotFound`] when no archive row has `id`.
    pub fn get_by_id(&self, id: ArchivedDataInstanceId) -> Result<ArchivedDataInstance, DataError> {
        let row = self
            .ports
            .persistence
            .select_by_id(EntityKind::ArchivedDataInstance, id.0)
            .map_err(|err| DataError::from_read(format!("fetch archived data {id}"), err))?;
        match row {
            Some(row) => row_into(row, EntityKind::ArchivedDataInstance.as_str()),
            None => Err(DataError::NotFound(format!("archived data {id}"))),
        }
    }

    /// Full value history of `source`, oldest first.
    ///
    /// # Errors
    /// [`DataError::Validation`] for a zero `limit`, [`DataError::ReadFailure`]
    /// when the rows cannot be read.
    pub fn get_history(
        &self,
        source: DataInstanceId,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>, DataError> {
        let page = Page::checked(offset, limit)?;
        let query_id = queries::ARCHIVED_DATA_INSTANCES_BY_SOURCE_ID;
        let query = SelectQuery::new(
            query_id,
            QueryParams::new().with(queries::PARAM_SOURCE_OBJECT_ID, QueryParam::Int(source.0)),
        );
        let rows = self.ports.persistence.select_list(&query, page).map_err(|err| {
            DataError::from_read(format!("fetch history of data instance {source}"), err)
        })?;
        rows_into(rows, query_id)
    }

    /// One page of every archive row recorded in `container`.
    ///
    /// # Errors
    /// [`DataError::Validation`] for a zero `limit`, [`DataError::ReadFailure`]
    /// when the rows cannot be read.
    pub fn get_local_all(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>, DataError> {
        let page = Page::checked(offset, limit)?;
        self.local_rows(container, page)
    }

    /// Latest archive row per name in `container`, most recent first.
    ///
    /// # Errors
    /// As [`Self::get_local_all`].
    pub fn get_last_local_all(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ArchivedDataInstance>, DataError> {
        let page = Page::checked(offset, limit)?;
        let rows = self.local_rows(container, Page::all())?;
        let hierarchy = ContainerHierarchy::single(container.clone());
        Ok(page.slice(resolve_shadowing(&hierarchy, rows)?))
    }

    fn local_rows(
        &self,
        container: &ContainerRef,
        page: Page,
    ) -> Result<Vec<ArchivedDataInstance>, DataError> {
        let query_id = queries::ARCHIVED_DATA_INSTANCES_OF_CONTAINER;
        let rows = self
            .ports
            .persistence
            .select_list(&container_query(query_id, container), page)
            .map_err(|err| {
                DataError::from_read(format!("fetch archived data of {container}"), err)
            })?;
        rows_into(rows, query_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ScopedDataEngine;
    use crate::error::ErrorKind;
    use crate::fakes::{at, text, FakeBackend, FixedClock};
    use crate::model::{DataChangeSet, DataValue, NewDataInstance};

    fn node() -> ContainerRef {
        ContainerRef::flow_node(10)
    }

    fn process() -> ContainerRef {
        ContainerRef::process_instance(1)
    }

    fn backend() -> FakeBackend {
        FakeBackend::new().with_chain(&[node(), process()])
    }

    #[test]
    fn latest_row_at_or_before_time_wins() -> Result<(), DataError> {
        let backend = backend();
        backend.seed_archived("x", &process(), "a", 100);
        backend.seed_archived("x", &process(), "b", 200);
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();
        let archived = engine.archived(backend.ports(&clock));

        assert_eq!(text(&archived.get("x", &process(), at(150))?.value), "a");
        assert_eq!(text(&archived.get("x", &process(), at(250))?.value), "b");
        Ok(())
    }

    #[test]
    fn archive_boundary_is_inclusive() -> Result<(), DataError> {
        let backend = backend();
        backend.seed_archived("x", &process(), "a", 100);
        backend.seed_archived("x", &process(), "b", 200);
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();
        let archived = engine.archived(backend.ports(&clock));

        assert_eq!(text(&archived.get("x", &process(), at(200))?.value), "b");
        assert_eq!(text(&archived.get("x", &process(), at(199))?.value), "a");
        match archived.get("x", &process(), at(99)) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound),
            Ok(found) => panic!("nothing was archived before 100: {found:?}"),
        }
        Ok(())
    }

    #[test]
    fn archived_lookup_shadows_by_proximity() -> Result<(), DataError> {
        let backend = backend();
        backend.seed_archived("x", &node(), "inner", 100);
        backend.seed_archived("x", &process(), "outer", 150);
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();

        let found = engine.archived(backend.ports(&clock)).get("x", &node(), at(200))?;
        assert_eq!(text(&found.value), "inner");
        Ok(())
    }

    #[test]
    fn archived_hierarchy_outlives_live_one() -> Result<(), DataError> {
        let backend = backend();
        backend.seed_archived("x", &process(), "outer", 100);
        backend.retire(&node());
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();

        match engine.live(backend.ports(&clock)).get("x", &node()) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound),
            Ok(found) => panic!("retired container has no live hierarchy: {found:?}"),
        }
        let found = engine.archived(backend.ports(&clock)).get("x", &node(), at(100))?;
        assert_eq!(text(&found.value), "outer");
        Ok(())
    }

    #[test]
    fn empty_names_issue_no_query() -> Result<(), DataError> {
        let backend = backend();
        backend.seed_archived("x", &process(), "a", 100);
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();

        let found = engine.archived(backend.ports(&clock)).get_many(&[], &process(), at(500))?;
        assert!(found.is_empty());
        assert_eq!(backend.select_calls.get(), 0);
        assert_eq!(backend.hierarchy_calls.get(), 0);
        Ok(())
    }

    #[test]
    fn get_many_and_get_all_resolve_as_of_time() -> Result<(), DataError> {
        let backend = backend();
        backend.seed_archived("x", &process(), "x-old", 100);
        backend.seed_archived("x", &process(), "x-new", 300);
        backend.seed_archived("y", &node(), "y-node", 100);
        backend.seed_archived("z", &process(), "z-late", 400);
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();
        let archived = engine.archived(backend.ports(&clock));

        let names = vec!["x".to_string(), "y".to_string(), "z".to_string()];
        let found = archived.get_many(&names, &node(), at(200))?;
        let values = found.iter().map(|row| text(&row.value)).collect::<Vec<_>>();
        assert_eq!(values, vec!["y-node", "x-old"]);

        let all = archived.get_all(&node(), at(500), 1, 10)?;
        let values = all.iter().map(|row| text(&row.value)).collect::<Vec<_>>();
        assert_eq!(values, vec!["z-late", "x-new"]);
        Ok(())
    }

    #[test]
    fn updates_append_history_that_deletes_keep() -> Result<(), DataError> {
        let backend = backend();
        let clock = FixedClock::at(10);
        let engine = ScopedDataEngine::default();
        let live = engine.live(backend.ports(&clock));

        let mut current = live.create(NewDataInstance::new("x", node(), DataValue::Integer(0)))?;
        for step in 1..=4 {
            clock.set(10 + step);
            current = live.update(&current, &DataChangeSet::value(DataValue::Integer(step)))?;
        }
        live.delete(&current)?;

        let archived = engine.archived(backend.ports(&clock));
        let history = archived.get_history(current.id, 0, 100)?;
        assert_eq!(history.len(), 5);
        assert!(history.windows(2).all(|pair| pair[0].archive_date <= pair[1].archive_date));
        assert_eq!(history.last().map(|row| &row.value), Some(&DataValue::Integer(4)));

        let as_of = archived.get_by_source_id(current.id, at(12))?;
        assert_eq!(as_of.value, DataValue::Integer(2));
        assert_eq!(archived.get_by_id(as_of.id)?, as_of);
        Ok(())
    }

    #[test]
    fn source_lookup_before_first_archive_is_not_found() {
        let backend = backend();
        let row = backend.seed_archived("x", &process(), "a", 100);
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();

        let archived = engine.archived(backend.ports(&clock));
        match archived.get_by_source_id(row.source_object_id, at(50)) {
            Err(err) => assert_eq!(err.kind(), ErrorKind::NotFound),
            Ok(found) => panic!("expected not found, got {found:?}"),
        }
    }

    #[test]
    fn last_local_all_keeps_latest_row_per_name() -> Result<(), DataError> {
        let backend = backend();
        backend.seed_archived("x", &process(), "x1", 100);
        backend.seed_archived("y", &process(), "y1", 150);
        backend.seed_archived("x", &process(), "x2", 200);
        backend.seed_archived("y", &node(), "y-node", 300);
        let clock = FixedClock::at(0);
        let engine = ScopedDataEngine::default();
        let archived = engine.archived(backend.ports(&clock));

        let last = archived.get_last_local_all(&process(), 0, 10)?;
        let values = last.iter().map(|row| text(&row.value)).collect::<Vec<_>>();
        assert_eq!(values, vec!["x2", "y1"]);

        let local = archived.get_local_all(&process(), 0, 10)?;
        assert_eq!(local.len(), 3);
        assert_eq!(archived.get_last_local_all(&process(), 1, 1)?.len(), 1);
        Ok(())
    }
}
