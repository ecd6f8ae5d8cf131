//! Named query ids compiled to SQL.

use anyhow::{anyhow, Context, Result};
use rusqlite::types::Value;
use scoped_data_core::{queries, EntityKind, Page, QueryParams, SelectQuery};

use crate::to_nanos;

pub(crate) const DATA_COLUMNS: &str =
    "id, name, description, container_id, container_type, value_json, is_transient";
pub(crate) const ARCHIVED_COLUMNS: &str = "id, source_object_id, name, description, \
     container_id, container_type, value_json, archive_date";

#[derive(Debug)]
pub(crate) struct CompiledQuery {
    pub(crate) entity: EntityKind,
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
}

impl CompiledQuery {
    fn new(entity: EntityKind) -> Self {
        Self { entity, sql: String::new(), params: Vec::new() }
    }

    fn bind(&mut self, value: Value) -> String {
        self.params.push(value);
        format!("?{}", self.params.len())
    }

    fn bind_list(&mut self, values: impl IntoIterator<Item = Value>) -> String {
        values.into_iter().map(|value| self.bind(value)).collect::<Vec<_>>().join(", ")
    }

    fn select(&mut self, conditions: &[String], order_by: &str) {
        let (columns, table) = match self.entity {
            EntityKind::DataInstance => (DATA_COLUMNS, "data_instances"),
            EntityKind::ArchivedDataInstance => (ARCHIVED_COLUMNS, "archived_data_instances"),
        };
        self.sql = format!(
            "SELECT {columns} FROM {table} WHERE {} ORDER BY {order_by}",
            conditions.join(" AND ")
        );
    }

    /// Append `LIMIT/OFFSET`; a page without limit reads every row.
    pub(crate) fn paged(mut self, page: Page) -> Result<Self> {
        let limit = match page.limit {
            Some(limit) => i64::try_from(limit).context("page limit out of range")?,
            None => -1,
        };
        let offset = i64::try_from(page.offset).context("page offset out of range")?;
        let limit = self.bind(Value::Integer(limit));
        let offset = self.bind(Value::Integer(offset));
        self.sql = format!("{} LIMIT {limit} OFFSET {offset}", self.sql);
        Ok(self)
    }

    pub(crate) fn counted(mut self) -> Self {
        self.sql = format!("SELECT COUNT(*) FROM ({})", self.sql);
        self
    }
}

/// Compile a named query against the store schema.
///
/// # Errors
/// Returns an error for an unknown query id or a missing or mistyped parameter.
pub(crate) fn compile(query: &SelectQuery) -> Result<CompiledQuery> {
    if let Some((base, container_types)) = queries::parse_variant_id(&query.query_id) {
        return compile_hierarchy(base, container_types, &query.params)
            .with_context(|| format!("failed to compile query {}", query.query_id));
    }
    compile_fixed(&query.query_id, &query.params)
        .with_context(|| format!("failed to compile query {}", query.query_id))
}

fn compile_hierarchy(
    base: &str,
    container_types: usize,
    params: &QueryParams,
) -> Result<CompiledQuery> {
    let archived = base == queries::ARCHIVED_DATA_INSTANCES_WITH_NAMES
        || base == queries::ARCHIVED_DATA_INSTANCES;
    let with_names = base == queries::DATA_INSTANCES_WITH_NAMES
        || base == queries::ARCHIVED_DATA_INSTANCES_WITH_NAMES;
    let mut compiled = CompiledQuery::new(if archived {
        EntityKind::ArchivedDataInstance
    } else {
        EntityKind::DataInstance
    });

    let mut scopes = Vec::with_capacity(container_types);
    for group in 1..=container_types {
        let type_key = queries::container_type_key(group);
        let container_type = required_text(params, &type_key)?;
        let ids_key = queries::container_ids_key(group);
        let ids = params
            .int_list(&ids_key)
            .filter(|ids| !ids.is_empty())
            .ok_or_else(|| anyhow!("missing integer list parameter `{ids_key}`"))?;

        let container_type = compiled.bind(Value::Text(container_type.to_string()));
        let ids = compiled.bind_list(ids.iter().map(|id| Value::Integer(*id)));
        scopes.push(format!("(container_type = {container_type} AND container_id IN ({ids}))"));
    }

    let mut conditions = vec![format!("({})", scopes.join(" OR "))];
    if with_names {
        let names = params
            .text_list(queries::PARAM_NAMES)
            .ok_or_else(|| anyhow!("missing text list parameter `{}`", queries::PARAM_NAMES))?;
        let names = compiled.bind_list(names.iter().cloned().map(Value::Text));
        conditions.push(format!("name IN ({names})"));
    }
    if archived {
        let time = required_time(params, queries::PARAM_TIME)?;
        let time = compiled.bind(Value::Integer(time));
        conditions.push(format!("archive_date <= {time}"));
    }

    compiled.select(&conditions, "id ASC");
    Ok(compiled)
}

fn compile_fixed(query_id: &str, params: &QueryParams) -> Result<CompiledQuery> {
    let compiled = match query_id {
        queries::DATA_INSTANCE_BY_NAME_AND_CONTAINER => {
            let mut compiled = CompiledQuery::new(EntityKind::DataInstance);
            let mut conditions = container_conditions(&mut compiled, params)?;
            let name = required_text(params, queries::PARAM_NAME)?.to_string();
            let name = compiled.bind(Value::Text(name));
            conditions.push(format!("name = {name}"));
            compiled.select(&conditions, "id ASC");
            compiled
        }
        queries::DATA_INSTANCES_OF_CONTAINER | queries::COUNT_DATA_INSTANCES_OF_CONTAINER => {
            let mut compiled = CompiledQuery::new(EntityKind::DataInstance);
            let conditions = container_conditions(&mut compiled, params)?;
            compiled.select(&conditions, "id ASC");
            compiled
        }
        queries::ARCHIVED_DATA_INSTANCES_OF_CONTAINER => {
            let mut compiled = CompiledQuery::new(EntityKind::ArchivedDataInstance);
            let conditions = container_conditions(&mut compiled, params)?;
            compiled.select(&conditions, "id ASC");
            compiled
        }
        queries::LAST_ARCHIVED_DATA_INSTANCE_BY_SOURCE_ID => {
            let mut compiled = CompiledQuery::new(EntityKind::ArchivedDataInstance);
            let conditions = source_conditions(&mut compiled, params, true)?;
            compiled.select(&conditions, "archive_date DESC, id DESC");
            compiled
        }
        queries::ARCHIVED_DATA_INSTANCES_BY_SOURCE_ID => {
            let mut compiled = CompiledQuery::new(EntityKind::ArchivedDataInstance);
            let conditions = source_conditions(&mut compiled, params, false)?;
            compiled.select(&conditions, "archive_date ASC, id ASC");
            compiled
        }
        other => return Err(anyhow!("unknown query id `{other}`")),
    };
    Ok(compiled)
}

fn container_conditions(compiled: &mut CompiledQuery, params: &QueryParams) -> Result<Vec<String>> {
    let container_id = required_int(params, queries::PARAM_CONTAINER_ID)?;
    let container_type = required_text(params, queries::PARAM_CONTAINER_TYPE)?;
    let container_id = compiled.bind(Value::Integer(container_id));
    let container_type = compiled.bind(Value::Text(container_type.to_string()));
    Ok(vec![format!("container_id = {container_id}"), format!("container_type = {container_type}")])
}

fn source_conditions(
    compiled: &mut CompiledQuery,
    params: &QueryParams,
    time_required: bool,
) -> Result<Vec<String>> {
    let source = required_int(params, queries::PARAM_SOURCE_OBJECT_ID)?;
    let source = compiled.bind(Value::Integer(source));
    let mut conditions = vec![format!("source_object_id = {source}")];
    if time_required || params.get(queries::PARAM_TIME).is_some() {
        let time = compiled.bind(Value::Integer(required_time(params, queries::PARAM_TIME)?));
        conditions.push(format!("archive_date <= {time}"));
    }
    Ok(conditions)
}

fn required_int(params: &QueryParams, key: &str) -> Result<i64> {
    params.int(key).ok_or_else(|| anyhow!("missing integer parameter `{key}`"))
}

fn required_text<'a>(params: &'a QueryParams, key: &str) -> Result<&'a str> {
    params.text(key).ok_or_else(|| anyhow!("missing text parameter `{key}`"))
}

fn required_time(params: &QueryParams, key: &str) -> Result<i64> {
    let time = params.time(key).ok_or_else(|| anyhow!("missing time parameter `{key}`"))?;
    to_nanos(time)
}
