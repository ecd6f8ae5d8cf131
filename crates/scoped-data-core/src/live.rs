use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::DataError;
use crate::model::{
    ArchivedDataInstance, ArchivedDataInstanceId, ContainerHierarchy, ContainerRef,
    DataChangeSet, DataInstance, DataInstanceId, NewDataInstance, Page,
};
use crate::pipeline::ArchivingPipeline;
use crate::planner::{NameFilter, QueryFamily, QueryPlanner};
use crate::ports::{Collaborators, EntityKind, QueryParam, QueryParams, SelectQuery};
use crate::queries;
use crate::resolution::{fetch_candidates, row_into, rows_into};
use crate::shadow::{resolve_shadowing, resolve_single};

/// Reads and writes of live data, resolved through the live container hierarchy.
pub struct DataInstanceService<'a> {
    config: &'a EngineConfig,
    planner: &'a QueryPlanner,
    ports: Collaborators<'a>,
}

pub(crate) fn container_query(query_id: &str, container: &ContainerRef) -> SelectQuery {
    SelectQuery::new(
        query_id,
        QueryParams::new()
            .with(queries::PARAM_CONTAINER_ID, QueryParam::Int(container.container_id))
            .with(
                queries::PARAM_CONTAINER_TYPE,
                QueryParam::Text(container.container_type.clone()),
            ),
    )
}

impl<'a> DataInstanceService<'a> {
    #[must_use]
    pub fn new(
        config: &'a EngineConfig,
        planner: &'a QueryPlanner,
        ports: Collaborators<'a>,
    ) -> Self {
        Self { config, planner, ports }
    }

    fn pipeline(&self) -> ArchivingPipeline<'a> {
        ArchivingPipeline::new(self.ports, self.config)
    }

    fn hierarchy(&self, container: &ContainerRef) -> Result<ContainerHierarchy, DataError> {
        self.ports
            .hierarchy
            .resolve_live(container)
            .map_err(|err| DataError::from_read(format!("resolve hierarchy of {container}"), err))
    }

    fn resolve(
        &self,
        container: &ContainerRef,
        names: &NameFilter,
    ) -> Result<(ContainerHierarchy, Vec<DataInstance>), DataError> {
        let hierarchy = self.hierarchy(container)?;
        let candidates = fetch_candidates(
            self.planner,
            self.ports.persistence,
            QueryFamily::Live,
            &hierarchy,
            names,
            None,
        )?;
        Ok((hierarchy, candidates))
    }

    /// The instance named `name` visible from `container`.
    ///
    /// # Errors
    /// - [`DataError::NotFound`] when no container on the hierarchy holds `name`.
    /// - [`DataError::ReadInconsistency`] when `name` is held twice by one container.
    /// - [`DataError::ReadFailure`] when the hierarchy or the rows cannot be read.
    pub fn get(&self, name: &str, container: &ContainerRef) -> Result<DataInstance, DataError> {
        let (hierarchy, candidates) = self.resolve(container, &NameFilter::single(name))?;
        resolve_single(&hierarchy, candidates, name)?
            .ok_or_else(|| DataError::NotFound(format!("data `{name}` visible from {container}")))
    }

    /// Every instance among `names` visible from `container`, in proximity order.
    /// Names that resolve nowhere are simply absent.
    ///
    /// # Errors
    /// Same read errors as [`Self::get`].
    pub fn get_many(
        &self,
        names: &[String],
        container: &ContainerRef,
    ) -> Result<Vec<DataInstance>, DataError> {
        let filter = NameFilter::only(names.iter().cloned());
        if filter.selects_nothing() {
            return Ok(Vec::new());
        }
        let (hierarchy, candidates) = self.resolve(container, &filter)?;
        resolve_shadowing(&hierarchy, candidates)
    }

    /// One page of every name visible from `container`, paginated after shadowing.
    ///
    /// # Errors
    /// [`DataError::Validation`] for a zero `limit`, otherwise as [`Self::get`].
    pub fn get_all(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DataInstance>, DataError> {
        let page = Page::checked(offset, limit)?;
        let (hierarchy, candidates) = self.resolve(container, &NameFilter::All)?;
        Ok(page.slice(resolve_shadowing(&hierarchy, candidates)?))
    }

    /// Exact lookup in `container` only; shadowing does not apply.
    ///
    /// # Errors
    /// [`DataError::NotFound`] when `container` holds no `name`,
    /// [`DataError::ReadFailure`] when the lookup fails.
    pub fn get_local(
        &self,
        name: &str,
        container: &ContainerRef,
    ) -> Result<DataInstance, DataError> {
        let query_id = queries::DATA_INSTANCE_BY_NAME_AND_CONTAINER;
        let mut query = container_query(query_id, container);
        query.params.insert(queries::PARAM_NAME, QueryParam::Text(name.to_string()));

        let row = self
            .ports
            .persistence
            .select_one(&query)
            .map_err(|err| DataError::from_read(format!("fetch `{name}` in {container}"), err))?;
        match row {
            Some(row) => row_into(row, query_id),
            None => Err(DataError::NotFound(format!("data `{name}` in {container}"))),
        }
    }

    /// One page of the rows owned by `container`, by ascending id.
    ///
    /// # Errors
    /// [`DataError::Validation`] for a zero `limit`, [`DataError::ReadFailure`]
    /// when the rows cannot be read.
    pub fn get_local_all(
        &self,
        container: &ContainerRef,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<DataInstance>, DataError> {
        let page = Page::checked(offset, limit)?;
        self.local_page(container, page)
    }

    fn local_page(
        &self,
        container: &ContainerRef,
        page: Page,
    ) -> Result<Vec<DataInstance>, DataError> {
        let query_id = queries::DATA_INSTANCES_OF_CONTAINER;
        let rows = self
            .ports
            .persistence
            .select_list(&container_query(query_id, container), page)
            .map_err(|err| DataError::from_read(format!("fetch data of {container}"), err))?;
        rows_into(rows, query_id)
    }

    /// # Errors
    /// [`DataError::NotFound`] when no live row has `id`.
    pub fn get_by_id(&self, id: DataInstanceId) -> Result<DataInstance, DataError> {
        let row = self
            .ports
            .persistence
            .select_by_id(EntityKind::DataInstance, id.0)
            .map_err(|err| DataError::from_read(format!("fetch data instance {id}"), err))?;
        match row {
            Some(row) => row_into(row, EntityKind::DataInstance.as_str()),
            None => Err(DataError::NotFound(format!("data instance {id}"))),
        }
    }

    /// # Errors
    /// [`DataError::ReadFailure`] when the count cannot be read.
    pub fn count_local(&self, container: &ContainerRef) -> Result<u64, DataError> {
        let query = container_query(queries::COUNT_DATA_INSTANCES_OF_CONTAINER, container);
        self.ports
            .persistence
            .count_entities(&query)
            .map_err(|err| DataError::from_read(format!("count data of {container}"), err))
    }

    /// # Errors
    /// See [`ArchivingPipeline::create`].
    pub fn create(&self, request: NewDataInstance) -> Result<DataInstance, DataError> {
        self.pipeline().create(request)
    }

    /// # Errors
    /// See [`ArchivingPipeline::update`].
    pub fn update(
        &self,
        instance: &DataInstance,
        changes: &DataChangeSet,
    ) -> Result<DataInstance, DataError> {
        self.pipeline().update(instance, changes)
    }

    /// # Errors
    /// See [`ArchivingPipeline::delete`].
    pub fn delete(&self, instance: &DataInstance) -> Result<(), DataError> {
        self.pipeline().delete(instance)
    }

    /// Delete every live row owned by `container`, one batch at a time.
    ///
    /// Batches already deleted stay deleted when a later batch fails.
    ///
    /// # Errors
    /// [`DataError::ReadFailure`] when a batch cannot be fetched,
    /// [`DataError::WriteFailure`] when a delete fails.
    pub fn delete_all_local(&self, container: &ContainerRef) -> Result<usize, DataError> {
        let batch_size = self.config.delete_batch_size;
        let pipeline = self.pipeline();
        let mut deleted = 0;
        loop {
            let batch = self.local_page(container, Page::new(0, batch_size))?;
            for instance in &batch {
                pipeline.delete(instance)?;
            }
            deleted += batch.len();
            if batch.len() < batch_size {
                break;
            }
        }
        info!(%container, deleted, "deleted live data of container");
        Ok(deleted)
    }

    /// Purge every archive row recorded for `container`, one batch at a time.
    ///
    /// # Errors
    /// [`DataError::ReadFailure`] when a batch cannot be fetched,
    /// [`DataError::WriteFailure`] when a purge fails.
    pub fn delete_all_local_archived(&self, container: &ContainerRef) -> Result<usize, DataError> {
        let batch_size = self.config.delete_batch_size;
        let query_id = queries::ARCHIVED_DATA_INSTANCES_OF_CONTAINER;
        let query = container_query(query_id, container);
        let mut purged = 0;
        loop {
            let rows = self
                .ports
                .persistence
                .select_list(&query, Page::new(0, batch_size))
                .map_err(|err| {
                    DataError::from_read(format!("fetch archived data of {container}"), err)
                })?;
            let batch: Vec<ArchivedDataInstance> = rows_into(rows, query_id)?;
            if batch.is_empty() {
                break;
            }

            let ids = batch.iter().map(|row| row.id).collect::<Vec<ArchivedDataInstanceId>>();
            let removed = self.ports.archive.purge_archived(&ids).map_err(|err| {
                DataError::from_write(format!("purge archived data of {container}"), err)
            })?;
            purged += removed;
            // Offset 0 is only safe to re-read while each purge makes progress.
            if removed == 0 {
                warn!(%container, batch = ids.len(), "archive purge removed nothing, stopping");
                break;
            }
            if batch.len() < batch_size {
                break;
            }
        }
        info!(%container, purged, "purged archived data of container");
        Ok(purged)
    }
}
