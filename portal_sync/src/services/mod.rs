//! Portal services — catalog and resource reconciliation, plus the adapters
//! they drive (GitHub, AWS, the credential vault).

pub mod audit_service;
pub mod catalog_reader;
pub mod catalog_sync;
pub mod discovery;
pub mod github_service;
pub mod provisioner;
pub mod resource_sync;
pub mod sweep_lock;
pub mod vault;
pub mod webhook_delta;
