use std::cmp::Reverse;
use std::collections::BTreeMap;

use time::OffsetDateTime;
use tracing::{debug, error};

use crate::error::DataError;
use crate::model::{ArchivedDataInstance, ContainerHierarchy, DataInstance};

/// Anything that can be shadowed: a named value owned by one container.
pub trait ScopedRecord {
    fn name(&self) -> &str;
    fn container_id(&self) -> i64;
    fn container_type(&self) -> &str;

    /// `(archive_date, archived id)` for history rows, `None` for live rows.
    fn recency(&self) -> Option<(OffsetDateTime, i64)> {
        None
    }
}

impl ScopedRecord for DataInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn container_id(&self) -> i64 {
        self.container_id
    }

    fn container_type(&self) -> &str {
        &self.container_type
    }
}

impl ScopedRecord for ArchivedDataInstance {
    fn name(&self) -> &str {
        &self.name
    }

    fn container_id(&self) -> i64 {
        self.container_id
    }

    fn container_type(&self) -> &str {
        &self.container_type
    }

    fn recency(&self) -> Option<(OffsetDateTime, i64)> {
        Some((self.archive_date, self.id.0))
    }
}

pub type ProximityKey = (usize, Reverse<Option<(OffsetDateTime, i64)>>);

/// Sort key: nearest container first, then most recent archive row first.
/// Records outside the hierarchy get index `usize::MAX`.
#[must_use]
pub fn proximity_key<R: ScopedRecord>(hierarchy: &ContainerHierarchy, record: &R) -> ProximityKey {
    let index =
        hierarchy.position(record.container_id(), record.container_type()).unwrap_or(usize::MAX);
    (index, Reverse(record.recency()))
}

/// Stable sort of `candidates` into proximity order.
pub fn order_by_proximity<R: ScopedRecord>(hierarchy: &ContainerHierarchy, candidates: &mut [R]) {
    candidates.sort_by_cached_key(|record| proximity_key(hierarchy, record));
}

/// Keep the nearest (and for history rows, most recent) record of every name.
///
/// The result stays in proximity order. Records whose container is not part of
/// `hierarchy` are not visible from it and are dropped.
///
/// # Errors
/// Returns [`DataError::ReadInconsistency`] when two live records share a name
/// inside the same container.
pub fn resolve_shadowing<R: ScopedRecord>(
    hierarchy: &ContainerHierarchy,
    mut candidates: Vec<R>,
) -> Result<Vec<R>, DataError> {
    let candidate_count = candidates.len();
    order_by_proximity(hierarchy, &mut candidates);

    let mut winner_index: BTreeMap<String, usize> = BTreeMap::new();
    let mut winners = Vec::new();
    for record in candidates {
        let (index, _) = proximity_key(hierarchy, &record);
        if index == usize::MAX {
            continue;
        }

        if let Some(&seen_at) = winner_index.get(record.name()) {
            if seen_at == index && record.recency().is_none() {
                error!(
                    name = record.name(),
                    container_id = record.container_id(),
                    container_type = record.container_type(),
                    "duplicate live data in one container"
                );
                return Err(DataError::ReadInconsistency(format!(
                    "more than one live data named `{}` in {}({})",
                    record.name(),
                    record.container_type(),
                    record.container_id()
                )));
            }
            continue;
        }

        winner_index.insert(record.name().to_string(), index);
        winners.push(record);
    }

    debug!(candidates = candidate_count, winners = winners.len(), "resolved shadowing");
    Ok(winners)
}

/// Resolve a lookup that asked for exactly one name.
///
/// # Errors
/// Returns [`DataError::ReadInconsistency`] when more than one record survives
/// resolution, plus any error of [`resolve_shadowing`].
pub fn resolve_single<R: ScopedRecord>(
    hierarchy: &ContainerHierarchy,
    candidates: Vec<R>,
    name: &str,
) -> Result<Option<R>, DataError> {
    let mut winners = resolve_shadowing(hierarchy, candidates)?;
    if winners.len() > 1 {
        error!(name, winners = winners.len(), "single-name lookup resolved to several winners");
        return Err(DataError::ReadInconsistency(format!(
            "lookup of `{name}` resolved to {} data instances",
            winners.len()
        )));
    }
    Ok(winners.pop())
}
