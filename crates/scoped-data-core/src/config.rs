use serde::{Deserialize, Serialize};

use crate::error::DataError;

pub const DEFAULT_DELETE_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_CONTAINER_TYPES: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Rows fetched and deleted per round of `delete_all_local*`.
    pub delete_batch_size: usize,
    /// Largest number of distinct container types a hierarchy may span.
    pub max_container_types: usize,
    /// Pair every recorder write with a [`crate::ChangeEvent`].
    pub emit_change_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            delete_batch_size: DEFAULT_DELETE_BATCH_SIZE,
            max_container_types: DEFAULT_MAX_CONTAINER_TYPES,
            emit_change_events: true,
        }
    }
}

impl EngineConfig {
    /// # Errors
    /// Returns [`DataError::Validation`] when a size is zero.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.delete_batch_size == 0 {
            return Err(DataError::Validation("delete_batch_size MUST be >= 1".to_string()));
        }
        if self.max_container_types == 0 {
            return Err(DataError::Validation("max_container_types MUST be >= 1".to_string()));
        }
        Ok(())
    }
}
