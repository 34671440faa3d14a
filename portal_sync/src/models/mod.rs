//! Portal data models — persisted entities and ephemeral reconciliation records.

pub mod audit;
pub mod declaration;
pub mod project;
pub mod provisioning;
pub mod resource;
pub mod secret;
pub mod sync_result;
pub mod team;
