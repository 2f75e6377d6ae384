//! # Catalog Interface
//!
//! The catalog provides the optimizer with table metadata (columns, primary-key handle,
//! secondary indexes) and the statistics snapshot of each table.
//!
//! ## Trait Design
//!
//! The `Catalog` trait is intentionally minimal and used behind a trait object
//! (`dyn Catalog`) so that different backends can provide metadata. Statistics are
//! handed out as `Arc<TableStatistics>`: one snapshot is shared read-only by every
//! search that runs concurrently.
//!
//! ## Key Lookups
//!
//! Tables are identified by `TableRef` (schema + name):
//! - `table_info`: column names, handle column and indexes. Returns `None` if the table
//!   is unknown, which the optimizer reports as an invalid plan.
//! - `table_stats`: the statistics snapshot. Returns `None` if the table was never
//!   analyzed; the optimizer then assumes pseudo statistics.

use crate::expr::TableRef;
use crate::stats::TableStatistics;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// A secondary index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    /// Indexed column names, in key order.
    pub columns: Vec<String>,
    #[serde(default)]
    pub unique: bool,
}

impl IndexInfo {
    pub fn new(name: impl Into<String>, columns: &[&str]) -> Self {
        Self {
            name: name.into(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            unique: false,
        }
    }
}

/// Table metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table: TableRef,
    pub columns: Vec<String>,
    /// Integer primary-key column that doubles as the row handle.
    #[serde(default)]
    pub pk_handle: Option<String>,
    #[serde(default)]
    pub indexes: Vec<IndexInfo>,
}

impl TableInfo {
    pub fn new(table: TableRef, columns: &[&str]) -> Self {
        Self {
            table,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            pk_handle: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_pk_handle(mut self, column: &str) -> Self {
        self.pk_handle = Some(column.to_string());
        self
    }

    pub fn with_index(mut self, index: IndexInfo) -> Self {
        self.indexes.push(index);
        self
    }

    /// An index covers a scan when every scanned column, except the handle, is an
    /// index column.
    pub fn is_covering(&self, index: &IndexInfo, scanned: &[String]) -> bool {
        scanned.iter().all(|c| {
            self.pk_handle.as_deref() == Some(c.as_str()) || index.columns.contains(c)
        })
    }
}

/// Catalog provides table metadata and statistics.
pub trait Catalog: Send + Sync {
    fn table_info(&self, table: &TableRef) -> Option<Arc<TableInfo>>;
    fn table_stats(&self, table: &TableRef) -> Option<Arc<TableStatistics>>;
}

/// A table and its statistics, as accepted by the HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableDefinition {
    pub info: TableInfo,
    #[serde(default)]
    pub stats: Option<TableStatistics>,
}

/// In-memory catalog for testing and the HTTP service.
///
/// Tables are keyed by their fully-qualified name (`schema.table`).
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    pub tables: HashMap<String, Arc<TableInfo>>,
    pub table_stats: HashMap<String, Arc<TableStatistics>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, info: TableInfo, stats: Option<TableStatistics>) {
        let key = info.table.to_string();
        if let Some(stats) = stats {
            self.table_stats.insert(key.clone(), Arc::new(stats));
        }
        self.tables.insert(key, Arc::new(info));
    }

    pub fn from_definitions(defs: Vec<TableDefinition>) -> Self {
        let mut catalog = Self::new();
        for def in defs {
            catalog.add_table(def.info, def.stats);
        }
        catalog
    }
}

impl Catalog for InMemoryCatalog {
    fn table_info(&self, table: &TableRef) -> Option<Arc<TableInfo>> {
        self.tables.get(&table.to_string()).cloned()
    }

    fn table_stats(&self, table: &TableRef) -> Option<Arc<TableStatistics>> {
        self.table_stats.get(&table.to_string()).cloned()
    }
}
