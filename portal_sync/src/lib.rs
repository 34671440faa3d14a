//! Portal Sync — keeps the developer portal's project catalog and cloud
//! resource inventory converged with their sources of truth.
//!
//! Catalog declarations live as YAML files in a GitHub repository and are
//! synced on demand or from push webhooks. Cloud resources are discovered
//! by sweeping an AWS account with a stored credential, associated by hand,
//! or provisioned asynchronously.

pub mod config;
pub mod error;
pub mod metrics;
pub mod migration;
pub mod models;
pub mod routes;
pub mod schema;
pub mod services;
pub mod store;
