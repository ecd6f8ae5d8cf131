//! Named queries shared by the engine and every persistence executor.

/// Live rows named in `names` across `K` container-type groups.
pub const DATA_INSTANCES_WITH_NAMES: &str = "getDataInstancesWithNames";
/// Every live row across `K` container-type groups.
pub const DATA_INSTANCES: &str = "getDataInstances";
/// Archive rows named in `names` with `archive_date <= time` across `K` groups.
pub const ARCHIVED_DATA_INSTANCES_WITH_NAMES: &str = "getArchivedDataInstancesWithNames";
/// Every archive row with `archive_date <= time` across `K` groups.
pub const ARCHIVED_DATA_INSTANCES: &str = "getArchivedDataInstances";

/// Bases that come in one variant per container-type count.
pub const HIERARCHY_QUERY_BASES: [&str; 4] = [
    DATA_INSTANCES_WITH_NAMES,
    DATA_INSTANCES,
    ARCHIVED_DATA_INSTANCES_WITH_NAMES,
    ARCHIVED_DATA_INSTANCES,
];

pub const DATA_INSTANCE_BY_NAME_AND_CONTAINER: &str = "getDataInstanceByNameAndContainer";
pub const DATA_INSTANCES_OF_CONTAINER: &str = "getDataInstancesOfContainer";
pub const COUNT_DATA_INSTANCES_OF_CONTAINER: &str = "countDataInstancesOfContainer";
pub const ARCHIVED_DATA_INSTANCES_OF_CONTAINER: &str = "getArchivedDataInstancesOfContainer";
pub const LAST_ARCHIVED_DATA_INSTANCE_BY_SOURCE_ID: &str = "getLastArchivedDataInstanceBySourceId";
pub const ARCHIVED_DATA_INSTANCES_BY_SOURCE_ID: &str = "getArchivedDataInstancesBySourceId";

pub const PARAM_NAMES: &str = "names";
pub const PARAM_TIME: &str = "time";
pub const PARAM_NAME: &str = "name";
pub const PARAM_CONTAINER_ID: &str = "containerId";
pub const PARAM_CONTAINER_TYPE: &str = "containerType";
pub const PARAM_SOURCE_OBJECT_ID: &str = "sourceObjectId";

const VARIANT_SUFFIX: &str = "Containers";

/// `<base>Of<k>Containers`.
#[must_use]
pub fn variant_id(base: &str, container_types: usize) -> String {
    format!("{base}Of{container_types}{VARIANT_SUFFIX}")
}

/// Split `<base>Of<k>Containers` back into `(base, k)` for a known base.
#[must_use]
pub fn parse_variant_id(query_id: &str) -> Option<(&'static str, usize)> {
    let stem = query_id.strip_suffix(VARIANT_SUFFIX)?;
    HIERARCHY_QUERY_BASES.iter().find_map(|base| {
        let arity = stem.strip_prefix(base)?.strip_prefix("Of")?;
        if arity.is_empty() || !arity.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        let arity = arity.parse::<usize>().ok()?;
        (arity >= 1).then_some((*base, arity))
    })
}

/// Type tag key of the `k`-th container-type group (1-based).
#[must_use]
pub fn container_type_key(group: usize) -> String {
    format!("containerType{group}")
}

/// Id list key of the `k`-th container-type group (1-based).
#[must_use]
pub fn container_ids_key(group: usize) -> String {
    format!("containerType{group}Ids")
}
