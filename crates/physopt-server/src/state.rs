//! # Application State
//!
//! Shared, read-only state handed to every request handler. It is built once at
//! startup from the optional TOML configuration file:
//!
//! ```toml
//! [search]
//! join_concurrency = 8
//!
//! [search.cost]
//! network = 1.5
//! memory = 5.0
//!
//! [storage]
//! aggregation = false
//! blocked_functions = ["json_extract"]
//! ```
//!
//! Every section and key is optional; missing values take the built-in defaults.
//! Catalogs are per request, since clients ship the statistics of the tables their
//! plan touches.

use physopt_core::catalog::InMemoryCatalog;
use physopt_core::pushdown::{CapabilityClient, StorageCapabilities};
use physopt_rules::{PhysicalSearch, SearchConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("invalid log filter: {0}")]
    LogFilter(#[from] tracing_subscriber::filter::ParseError),
}

/// Server configuration, as read from TOML.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub search: SearchConfig,
    /// Capabilities of the storage layer the produced plans run against.
    pub storage: StorageCapabilities,
}

impl ServerConfig {
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }
}

pub struct AppState {
    pub config: ServerConfig,
    pub client: Arc<CapabilityClient>,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let client = Arc::new(CapabilityClient::new(config.storage.clone()));
        Self { config, client }
    }

    /// A fresh search over `catalog`. Memos are never shared between requests.
    pub fn search(&self, catalog: InMemoryCatalog) -> PhysicalSearch {
        PhysicalSearch::new(Arc::new(catalog), self.client.clone(), self.config.search.clone())
    }
}
