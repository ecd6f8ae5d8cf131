use std::collections::BTreeMap;

use time::OffsetDateTime;
use tracing::debug;

use crate::error::DataError;
use crate::model::ContainerHierarchy;
use crate::ports::{QueryParam, QueryParams, SelectQuery};
use crate::queries;

/// Which names a hierarchy fetch asks for.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum NameFilter {
    All,
    Only(Vec<String>),
}

impl NameFilter {
    #[must_use]
    pub fn single(name: impl Into<String>) -> Self {
        Self::Only(vec![name.into()])
    }

    /// Names in first-seen order without repeats.
    #[must_use]
    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for name in names {
            let name = name.into();
            if !unique.contains(&name) {
                unique.push(name);
            }
        }
        Self::Only(unique)
    }

    /// `true` when nothing at all was requested.
    #[must_use]
    pub fn selects_nothing(&self) -> bool {
        matches!(self, Self::Only(names) if names.is_empty())
    }
}

/// Which row family a hierarchy fetch reads.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum QueryFamily {
    Live,
    Archived,
}

impl QueryFamily {
    fn base(self, names: &NameFilter) -> &'static str {
        match (self, names) {
            (Self::Live, NameFilter::Only(_)) => queries::DATA_INSTANCES_WITH_NAMES,
            (Self::Live, NameFilter::All) => queries::DATA_INSTANCES,
            (Self::Archived, NameFilter::Only(_)) => queries::ARCHIVED_DATA_INSTANCES_WITH_NAMES,
            (Self::Archived, NameFilter::All) => queries::ARCHIVED_DATA_INSTANCES,
        }
    }
}

/// Query variant ids for every supported container-type count, built once.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryCatalog {
    variants: BTreeMap<&'static str, Vec<String>>,
}

impl QueryCatalog {
    #[must_use]
    pub fn new(max_container_types: usize) -> Self {
        let variants = queries::HIERARCHY_QUERY_BASES
            .iter()
            .map(|base| {
                let ids = (1..=max_container_types)
                    .map(|arity| queries::variant_id(base, arity))
                    .collect::<Vec<_>>();
                (*base, ids)
            })
            .collect();
        Self { variants }
    }

    #[must_use]
    pub fn variant(&self, base: &str, container_types: usize) -> Option<&str> {
        let index = container_types.checked_sub(1)?;
        self.variants.get(base)?.get(index).map(String::as_str)
    }

    #[must_use]
    pub fn max_container_types(&self) -> usize {
        self.variants.values().next().map_or(0, Vec::len)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub query: SelectQuery,
    pub container_types: usize,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueryPlanner {
    catalog: QueryCatalog,
}

impl QueryPlanner {
    #[must_use]
    pub fn new(catalog: QueryCatalog) -> Self {
        Self { catalog }
    }

    #[must_use]
    pub fn catalog(&self) -> &QueryCatalog {
        &self.catalog
    }

    /// Build the candidate fetch for `hierarchy`.
    ///
    /// Returns `Ok(None)` when there is nothing to fetch: an empty name selection
    /// or an empty hierarchy.
    ///
    /// # Errors
    /// Returns [`DataError::ReadFailure`] when the hierarchy spans more container
    /// types than the catalog has variants for.
    pub fn plan(
        &self,
        family: QueryFamily,
        hierarchy: &ContainerHierarchy,
        names: &NameFilter,
        as_of: Option<OffsetDateTime>,
    ) -> Result<Option<QueryPlan>, DataError> {
        if names.selects_nothing() || hierarchy.is_empty() {
            return Ok(None);
        }

        let groups = hierarchy.grouped_by_type();
        let base = family.base(names);
        let Some(query_id) = self.catalog.variant(base, groups.len()) else {
            return Err(DataError::read_failure(
                format!("plan {base} for {} container types", groups.len()),
                format!(
                    "no query variant for {} container types (max {})",
                    groups.len(),
                    self.catalog.max_container_types()
                ),
            ));
        };

        let mut params = QueryParams::new();
        for (index, group) in groups.iter().enumerate() {
            let ordinal = index + 1;
            params.insert(
                queries::container_type_key(ordinal),
                QueryParam::Text(group.container_type.clone()),
            );
            params.insert(
                queries::container_ids_key(ordinal),
                QueryParam::IntList(group.container_ids.clone()),
            );
        }
        if let NameFilter::Only(names) = names {
            params.insert(queries::PARAM_NAMES, QueryParam::TextList(names.clone()));
        }
        if let Some(as_of) = as_of {
            params.insert(queries::PARAM_TIME, QueryParam::Time(as_of));
        }

        debug!(query_id, container_types = groups.len(), "planned hierarchy fetch");
        Ok(Some(QueryPlan {
            query: SelectQuery::new(query_id, params),
            container_types: groups.len(),
        }))
    }
}
