use tracing::debug;

use crate::archived::ArchivedDataInstanceService;
use crate::config::EngineConfig;
use crate::error::DataError;
use crate::live::DataInstanceService;
use crate::planner::{QueryCatalog, QueryPlanner};
use crate::ports::Collaborators;

/// Configuration plus the query catalog, built once and shared by every call.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ScopedDataEngine {
    config: EngineConfig,
    planner: QueryPlanner,
}

impl Default for ScopedDataEngine {
    fn default() -> Self {
        Self::build(EngineConfig::default())
    }
}

impl ScopedDataEngine {
    /// # Errors
    /// Returns [`DataError::Validation`] when `config` is out of range.
    pub fn new(config: EngineConfig) -> Result<Self, DataError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: EngineConfig) -> Self {
        let planner = QueryPlanner::new(QueryCatalog::new(config.max_container_types));
        debug!(
            max_container_types = config.max_container_types,
            delete_batch_size = config.delete_batch_size,
            "built scoped data engine"
        );
        Self { config, planner }
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub fn planner(&self) -> &QueryPlanner {
        &self.planner
    }

    #[must_use]
    pub fn live<'a>(&'a self, ports: Collaborators<'a>) -> DataInstanceService<'a> {
        DataInstanceService::new(&self.config, &self.planner, ports)
    }

    #[must_use]
    pub fn archived<'a>(&'a self, ports: Collaborators<'a>) -> ArchivedDataInstanceService<'a> {
        ArchivedDataInstanceService::new(&self.planner, ports)
    }
}
