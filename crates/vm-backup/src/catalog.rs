//! Workload catalog queries.
//!

use thiserror::Error;
use tracing::debug;

use crate::provider::ProviderError;

/// A virtual machine registered with the hypervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    /// The stable system identifier.
    pub id: String,

    /// The display name.
    pub name: String,
}

/// Which workload field requested names are matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameKind {
    /// Match the stable system identifier.
    Id,

    /// Match the display name.
    DisplayName,
}

/// An OR-list of requested workload names.
#[derive(Debug, Clone)]
pub struct NameFilter {
    /// The requested names.
    pub names: Vec<String>,

    /// The field the names match against.
    pub kind: NameKind,
}

impl NameFilter {
    /// Whether `workload` matches any requested name.
    pub fn matches(&self, workload: &Workload) -> bool {
        let field = match self.kind {
            NameKind::Id => &workload.id,
            NameKind::DisplayName => &workload.name,
        };

        self.names.iter().any(|name| name == field)
    }

    /// The filter rendered as a query clause for service-backed catalogs.
    /// Single quotes inside names are escaped by doubling.
    pub fn query_clause(&self) -> String {
        let field = match self.kind {
            NameKind::Id => "Name",
            NameKind::DisplayName => "ElementName",
        };

        self.names
            .iter()
            .map(|name| format!("{field} = '{}'", name.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(" OR ")
    }
}

/// A query interface over the realized workloads.
pub trait WorkloadCatalog {
    /// The realized workloads, optionally filtered by an OR-list of names.
    fn query(&self, filter: Option<&NameFilter>) -> Result<Vec<Workload>, CatalogError>;
}

/// Catalog backed by the workload list in the local config file.
#[derive(Debug, Default)]
pub struct ConfigCatalog {
    workloads: Vec<Workload>,
}

impl ConfigCatalog {
    /// A catalog over a fixed workload list.
    pub fn new(workloads: Vec<Workload>) -> Self {
        Self { workloads }
    }
}

impl WorkloadCatalog for ConfigCatalog {
    fn query(&self, filter: Option<&NameFilter>) -> Result<Vec<Workload>, CatalogError> {
        if let Some(filter) = filter {
            debug!("Catalog query: {}", filter.query_clause());
        }

        Ok(self
            .workloads
            .iter()
            .filter(|workload| filter.is_none_or(|f| f.matches(workload)))
            .cloned()
            .collect())
    }
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to query the workload catalog:\n{0}")]
    Query(#[from] ProviderError),
}
