use time::OffsetDateTime;
use tracing::debug;

use crate::error::DataError;
use crate::model::{ContainerHierarchy, Page};
use crate::planner::{NameFilter, QueryFamily, QueryPlanner};
use crate::ports::{FromRow, ReadPersistence, Row};

/// Narrow executor rows to `R`; a row of the wrong entity kind is a read failure.
pub(crate) fn rows_into<R: FromRow>(rows: Vec<Row>, query_id: &str) -> Result<Vec<R>, DataError> {
    rows.into_iter().map(|row| row_into(row, query_id)).collect()
}

pub(crate) fn row_into<R: FromRow>(row: Row, query_id: &str) -> Result<R, DataError> {
    let found = row.kind();
    R::from_row(row).ok_or_else(|| {
        DataError::read_failure(
            format!("decode rows of {query_id}"),
            format!("expected {} row, got {}", R::KIND.as_str(), found.as_str()),
        )
    })
}

/// Fetch every candidate row visible from `hierarchy`, unresolved.
///
/// An empty name selection or an empty hierarchy issues no query.
pub(crate) fn fetch_candidates<R: FromRow>(
    planner: &QueryPlanner,
    persistence: &dyn ReadPersistence,
    family: QueryFamily,
    hierarchy: &ContainerHierarchy,
    names: &NameFilter,
    as_of: Option<OffsetDateTime>,
) -> Result<Vec<R>, DataError> {
    let Some(plan) = planner.plan(family, hierarchy, names, as_of)? else {
        return Ok(Vec::new());
    };

    let query_id = plan.query.query_id.as_str();
    let rows = persistence
        .select_list(&plan.query, Page::all())
        .map_err(|err| DataError::from_read(format!("fetch {query_id}"), err))?;
    debug!(query_id, rows = rows.len(), "fetched hierarchy candidates");
    rows_into(rows, query_id)
}
