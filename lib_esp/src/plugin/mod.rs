//! # Datasource Plugin
//!
//! The backend handlers of the ESP datasource and the pieces they are built
//! from: server addressing, query identity, shared maps, settings, server
//! discovery and the health check.

pub mod datasource;
pub mod discovery;
pub mod health;
pub mod query;
pub mod server;
pub mod settings;
pub mod sync_map;

pub use datasource::{
    DataQuery, DataResponse, Datasource, FrameSender, PluginError, QueryDataRequest, QueryDataResponse,
    ResourceResponse, StreamStatus,
};
pub use discovery::{DiscoveryError, ServerInfo};
pub use health::{HealthCheckResult, HealthStatus};
pub use query::Query;
pub use server::{EspServer, ServerUrlError};
pub use settings::{DatasourceJsonData, DatasourceSettings, QueryModel};
pub use sync_map::{SyncMap, SyncMapError};
