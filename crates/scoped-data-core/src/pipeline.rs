use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::error::DataError;
use crate::model::{
    ArchivedDataInstance, ArchivedDataInstanceId, ChangeEvent, ChangeKind, DataChangeSet,
    DataInstance, DataInstanceId, NewDataInstance,
};
use crate::ports::{Collaborators, EntityKind};
use crate::resolution::row_into;

/// Live write, change event, then archive snapshot.
///
/// The live write is never undone here when archiving fails; rolling it back is
/// up to the caller's unit of work.
pub struct ArchivingPipeline<'a> {
    ports: Collaborators<'a>,
    config: &'a EngineConfig,
}

impl<'a> ArchivingPipeline<'a> {
    #[must_use]
    pub fn new(ports: Collaborators<'a>, config: &'a EngineConfig) -> Self {
        Self { ports, config }
    }

    /// # Errors
    /// - [`DataError::Validation`] for a blank name or container type.
    /// - [`DataError::WriteFailure`] when no id can be allocated or the insert fails.
    /// - [`DataError::ArchiveFailure`] when the row was written but not archived.
    pub fn create(&self, request: NewDataInstance) -> Result<DataInstance, DataError> {
        request.validate()?;
        let id = self
            .ports
            .ids
            .next_id(EntityKind::DataInstance)
            .map_err(|err| DataError::from_write("allocate data instance id", err))?;
        let instance = request.into_instance(DataInstanceId(id));

        let event = self.event(ChangeKind::Created, &instance);
        self.ports
            .recorder
            .record_insert(&instance, event.as_ref())
            .map_err(|err| DataError::from_write(format!("insert data `{}`", instance.name), err))?;
        debug!(id = instance.id.0, name = %instance.name, "created data instance");

        self.archive(&instance)?;
        Ok(instance)
    }

    /// Apply `changes`, then archive and return the row as stored.
    ///
    /// # Errors
    /// - [`DataError::Validation`] for an empty change set.
    /// - [`DataError::WriteFailure`] when the update fails.
    /// - [`DataError::ReadFailure`] when the stored row cannot be read back.
    /// - [`DataError::ArchiveFailure`] when the row was updated but not archived.
    pub fn update(
        &self,
        instance: &DataInstance,
        changes: &DataChangeSet,
    ) -> Result<DataInstance, DataError> {
        if changes.is_empty() {
            return Err(DataError::Validation(format!(
                "change set for data `{}` is empty",
                instance.name
            )));
        }

        let updated = instance.with_changes(changes);
        let event = self.event(ChangeKind::Updated, &updated);
        self.ports
            .recorder
            .record_update(&updated, changes, event.as_ref())
            .map_err(|err| DataError::from_write(format!("update data `{}`", updated.name), err))?;
        debug!(id = updated.id.0, name = %updated.name, "updated data instance");

        // The recorder only writes changed columns; `instance` may be stale.
        let saved = self.saved_state(updated.id)?;
        self.archive(&saved)?;
        Ok(saved)
    }

    fn saved_state(&self, id: DataInstanceId) -> Result<DataInstance, DataError> {
        let row = self
            .ports
            .persistence
            .select_by_id(EntityKind::DataInstance, id.0)
            .map_err(|err| DataError::from_read(format!("re-read data instance {id}"), err))?;
        match row {
            Some(row) => row_into(row, "selectById"),
            None => Err(DataError::ReadInconsistency(format!(
                "data instance {id} is gone right after its update"
            ))),
        }
    }

    /// Remove the live row. History rows are left untouched.
    ///
    /// # Errors
    /// Returns [`DataError::WriteFailure`] when the delete fails.
    pub fn delete(&self, instance: &DataInstance) -> Result<(), DataError> {
        let event = self.event(ChangeKind::Deleted, instance);
        self.ports
            .recorder
            .record_delete(instance, event.as_ref())
            .map_err(|err| DataError::from_write(format!("delete data `{}`", instance.name), err))?;
        debug!(id = instance.id.0, name = %instance.name, "deleted data instance");
        Ok(())
    }

    /// Append one snapshot of `instance`; transient instances are skipped.
    ///
    /// # Errors
    /// Returns [`DataError::ArchiveFailure`] when the snapshot cannot be written.
    pub fn archive(
        &self,
        instance: &DataInstance,
    ) -> Result<Option<ArchivedDataInstance>, DataError> {
        if instance.is_transient {
            return Ok(None);
        }

        let context = || format!("archive data `{}` ({})", instance.name, instance.id);
        let id = self.ports.ids.next_id(EntityKind::ArchivedDataInstance).map_err(|err| {
            warn!(id = instance.id.0, error = %err, "live write kept but no archive id allocated");
            DataError::from_archive(context(), err)
        })?;

        let archive_date = self.ports.clock.now();
        let row =
            ArchivedDataInstance::snapshot(instance, ArchivedDataInstanceId(id), archive_date);
        self.ports.archive.record_archive_insert(archive_date, &row).map_err(|err| {
            warn!(id = instance.id.0, error = %err, "live write kept but archive insert failed");
            DataError::from_archive(context(), err)
        })?;
        Ok(Some(row))
    }

    fn event(&self, kind: ChangeKind, instance: &DataInstance) -> Option<ChangeEvent> {
        self.config.emit_change_events.then(|| ChangeEvent::for_instance(kind, instance))
    }
}
