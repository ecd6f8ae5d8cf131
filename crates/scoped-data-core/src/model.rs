use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::error::DataError;

pub const PROCESS_INSTANCE: &str = "PROCESS_INSTANCE";
pub const SUB_PROCESS: &str = "SUB_PROCESS";
pub const FLOW_NODE: &str = "FLOW_NODE";
pub const MESSAGE_INSTANCE: &str = "MESSAGE_INSTANCE";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct DataInstanceId(pub i64);

impl Display for DataInstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct ArchivedDataInstanceId(pub i64);

impl Display for ArchivedDataInstanceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque `(id, type)` pair naming one nesting level of a running process.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ContainerRef {
    pub container_id: i64,
    pub container_type: String,
}

impl ContainerRef {
    #[must_use]
    pub fn new(container_id: i64, container_type: impl Into<String>) -> Self {
        Self { container_id, container_type: container_type.into() }
    }

    #[must_use]
    pub fn process_instance(container_id: i64) -> Self {
        Self::new(container_id, PROCESS_INSTANCE)
    }

    #[must_use]
    pub fn sub_process(container_id: i64) -> Self {
        Self::new(container_id, SUB_PROCESS)
    }

    #[must_use]
    pub fn flow_node(container_id: i64) -> Self {
        Self::new(container_id, FLOW_NODE)
    }

    #[must_use]
    pub fn message_instance(container_id: i64) -> Self {
        Self::new(container_id, MESSAGE_INSTANCE)
    }

    #[must_use]
    pub fn matches(&self, container_id: i64, container_type: &str) -> bool {
        self.container_id == container_id && self.container_type == container_type
    }

    /// Reject references that cannot identify any container.
    ///
    /// # Errors
    /// Returns [`DataError::Validation`] when the container type is blank.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.container_type.trim().is_empty() {
            return Err(DataError::Validation("container_type MUST be non-empty".to_string()));
        }
        Ok(())
    }
}

impl Display for ContainerRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.container_type, self.container_id)
    }
}

/// Ancestor chain of a container: index 0 is the requesting container, the last
/// entry is the root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(from = "Vec<ContainerRef>", into = "Vec<ContainerRef>")]
pub struct ContainerHierarchy {
    containers: Vec<ContainerRef>,
}

/// Ids of every container of one type, in hierarchy order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ContainerTypeGroup {
    pub container_type: String,
    pub container_ids: Vec<i64>,
}

impl ContainerHierarchy {
    /// Build a hierarchy; a reference listed twice keeps its nearest position.
    #[must_use]
    pub fn new(containers: Vec<ContainerRef>) -> Self {
        let mut unique: Vec<ContainerRef> = Vec::with_capacity(containers.len());
        for container in containers {
            if !unique.contains(&container) {
                unique.push(container);
            }
        }
        Self { containers: unique }
    }

    #[must_use]
    pub fn single(container: ContainerRef) -> Self {
        Self { containers: vec![container] }
    }

    #[must_use]
    pub fn leaf(&self) -> Option<&ContainerRef> {
        self.containers.first()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ContainerRef> {
        self.containers.iter()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[ContainerRef] {
        &self.containers
    }

    /// Hierarchy index of a container, `None` when it is not an ancestor.
    #[must_use]
    pub fn position(&self, container_id: i64, container_type: &str) -> Option<usize> {
        self.containers.iter().position(|container| container.matches(container_id, container_type))
    }

    /// Group ids by container type, types in first-seen order.
    #[must_use]
    pub fn grouped_by_type(&self) -> Vec<ContainerTypeGroup> {
        let mut groups: Vec<ContainerTypeGroup> = Vec::new();
        for container in &self.containers {
            match groups.iter_mut().find(|group| group.container_type == container.container_type)
            {
                Some(group) => group.container_ids.push(container.container_id),
                None => groups.push(ContainerTypeGroup {
                    container_type: container.container_type.clone(),
                    container_ids: vec![container.container_id],
                }),
            }
        }
        groups
    }
}

impl From<Vec<ContainerRef>> for ContainerHierarchy {
    fn from(containers: Vec<ContainerRef>) -> Self {
        Self::new(containers)
    }
}

impl From<ContainerHierarchy> for Vec<ContainerRef> {
    fn from(hierarchy: ContainerHierarchy) -> Self {
        hierarchy.containers
    }
}

impl FromIterator<ContainerRef> for ContainerHierarchy {
    fn from_iter<T: IntoIterator<Item = ContainerRef>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DataValue {
    Null,
    Boolean(bool),
    Integer(i64),
    Double(f64),
    Text(String),
    Date(#[serde(with = "time::serde::rfc3339")] OffsetDateTime),
    Json(serde_json::Value),
}

impl DataValue {
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Double(_) => "double",
            Self::Text(_) => "text",
            Self::Date(_) => "date",
            Self::Json(_) => "json",
        }
    }
}

impl From<&str> for DataValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<i64> for DataValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<bool> for DataValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Current value of a named variable owned by one container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataInstance {
    pub id: DataInstanceId,
    pub name: String,
    pub description: Option<String>,
    pub container_id: i64,
    pub container_type: String,
    pub value: DataValue,
    pub is_transient: bool,
}

impl DataInstance {
    #[must_use]
    pub fn container(&self) -> ContainerRef {
        ContainerRef::new(self.container_id, self.container_type.clone())
    }

    /// Post-update state of this instance under `changes`.
    #[must_use]
    pub fn with_changes(&self, changes: &DataChangeSet) -> Self {
        let mut updated = self.clone();
        if let Some(value) = &changes.value {
            updated.value = value.clone();
        }
        if let Some(description) = &changes.description {
            updated.description = Some(description.clone());
        }
        updated
    }
}

/// Creation request for a data instance; the id is allocated on create.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewDataInstance {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub container: ContainerRef,
    pub value: DataValue,
    #[serde(default)]
    pub is_transient: bool,
}

impl NewDataInstance {
    #[must_use]
    pub fn new(name: impl Into<String>, container: ContainerRef, value: DataValue) -> Self {
        Self { name: name.into(), description: None, container, value, is_transient: false }
    }

    #[must_use]
    pub fn transient(mut self) -> Self {
        self.is_transient = true;
        self
    }

    /// Validate identity fields before any write is attempted.
    ///
    /// # Errors
    /// Returns [`DataError::Validation`] when the name or container type is blank.
    pub fn validate(&self) -> Result<(), DataError> {
        if self.name.trim().is_empty() {
            return Err(DataError::Validation("data name MUST be non-empty".to_string()));
        }
        self.container.validate()
    }

    #[must_use]
    pub fn into_instance(self, id: DataInstanceId) -> DataInstance {
        DataInstance {
            id,
            name: self.name,
            description: self.description,
            container_id: self.container.container_id,
            container_type: self.container.container_type,
            value: self.value,
            is_transient: self.is_transient,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DataChangeSet {
    #[serde(default)]
    pub value: Option<DataValue>,
    #[serde(default)]
    pub description: Option<String>,
}

impl DataChangeSet {
    #[must_use]
    pub fn value(value: DataValue) -> Self {
        Self { value: Some(value), description: None }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.description.is_none()
    }
}

/// Immutable snapshot of a data instance's value at `archive_date`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchivedDataInstance {
    pub id: ArchivedDataInstanceId,
    pub source_object_id: DataInstanceId,
    pub name: String,
    pub description: Option<String>,
    pub container_id: i64,
    pub container_type: String,
    pub value: DataValue,
    #[serde(with = "time::serde::rfc3339")]
    pub archive_date: OffsetDateTime,
}

impl ArchivedDataInstance {
    #[must_use]
    pub fn snapshot(
        instance: &DataInstance,
        id: ArchivedDataInstanceId,
        archive_date: OffsetDateTime,
    ) -> Self {
        Self {
            id,
            source_object_id: instance.id,
            name: instance.name.clone(),
            description: instance.description.clone(),
            container_id: instance.container_id,
            container_type: instance.container_type.clone(),
            value: instance.value.clone(),
            archive_date,
        }
    }

    #[must_use]
    pub fn container(&self) -> ContainerRef {
        ContainerRef::new(self.container_id, self.container_type.clone())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Notification paired with each recorder write.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub data_instance_id: DataInstanceId,
    pub name: String,
    pub container: ContainerRef,
}

impl ChangeEvent {
    #[must_use]
    pub fn for_instance(kind: ChangeKind, instance: &DataInstance) -> Self {
        Self {
            kind,
            data_instance_id: instance.id,
            name: instance.name.clone(),
            container: instance.container(),
        }
    }
}

/// Offset/limit window; `limit = None` reads every row.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct Page {
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Page {
    #[must_use]
    pub fn new(offset: usize, limit: usize) -> Self {
        Self { offset, limit: Some(limit) }
    }

    #[must_use]
    pub fn all() -> Self {
        Self { offset: 0, limit: None }
    }

    /// Validate a caller-supplied window.
    ///
    /// # Errors
    /// Returns [`DataError::Validation`] for a zero limit.
    pub fn checked(offset: usize, limit: usize) -> Result<Self, DataError> {
        if limit == 0 {
            return Err(DataError::Validation("limit MUST be >= 1".to_string()));
        }
        Ok(Self::new(offset, limit))
    }

    /// Window an already materialized list.
    #[must_use]
    pub fn slice<T>(self, items: Vec<T>) -> Vec<T> {
        items.into_iter().skip(self.offset).take(self.limit.unwrap_or(usize::MAX)).collect()
    }
}
