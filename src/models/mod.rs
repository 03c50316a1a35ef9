//! Core data models for the discovery service.
//!
//! `object` holds the transient listing view of a remote file; `discovery`
//! holds the persisted catalog entry and the value types used to write it.
//! Records map to the `data_discovery` table via `sqlx::FromRow` and
//! serialize as JSON via `serde`.

pub mod discovery;
pub mod object;
