//! Scoped data resolution and archiving.
//!
//! Named data lives in nested containers. A lookup from one container climbs its
//! ancestor chain and the nearest container holding the name wins. Every write
//! of non-transient data also appends an immutable snapshot to the archive,
//! which answers the same lookups as of any point in time.

mod archived;
mod config;
mod engine;
mod error;
mod live;
mod model;
mod pipeline;
mod planner;
pub mod ports;
pub mod queries;
mod resolution;
mod shadow;

#[cfg(test)]
mod fakes;

pub use archived::ArchivedDataInstanceService;
pub use config::{EngineConfig, DEFAULT_DELETE_BATCH_SIZE, DEFAULT_MAX_CONTAINER_TYPES};
pub use engine::ScopedDataEngine;
pub use error::{BoxError, DataError, ErrorKind, PortError};
pub use live::DataInstanceService;
pub use model::{
    ArchivedDataInstance, ArchivedDataInstanceId, ChangeEvent, ChangeKind, ContainerHierarchy,
    ContainerRef, ContainerTypeGroup, DataChangeSet, DataInstance, DataInstanceId, DataValue,
    NewDataInstance, Page, FLOW_NODE, MESSAGE_INSTANCE, PROCESS_INSTANCE, SUB_PROCESS,
};
pub use pipeline::ArchivingPipeline;
pub use planner::{NameFilter, QueryCatalog, QueryFamily, QueryPlan, QueryPlanner};
pub use ports::{
    ArchiveWriter, Clock, Collaborators, ContainerHierarchyResolver, EntityKind, FromRow,
    IdSequence, QueryParam, QueryParams, ReadPersistence, Recorder, Row, SelectQuery, SystemClock,
};
pub use shadow::{
    order_by_proximity, proximity_key, resolve_shadowing, resolve_single, ProximityKey,
    ScopedRecord,
};
