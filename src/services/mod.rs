//! Discovery services.
//!
//! Leaves first: `fingerprint`/`schema` hash a listed object, `reconcile`
//! classifies the write, `retry` wraps it. `orchestrator` drives full runs
//! over the `storage_client` and `discovery_store` collaborators, and
//! `scheduler` decides when runs happen. `approval` is the review workflow.

pub mod approval;
pub mod discovery_store;
pub mod fingerprint;
pub mod notifier;
pub mod orchestrator;
pub mod reconcile;
pub mod retry;
pub mod scheduler;
pub mod schema;
pub mod storage_client;
