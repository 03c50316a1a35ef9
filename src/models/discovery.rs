//! Represents a catalog entry for one discovered file and the values used to
//! create, refresh, and decide on it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{FromRow, types::Json};
use std::{collections::BTreeMap, fmt};

/// Governance review state of a discovery record.
#[derive(Serialize, Deserialize, sqlx::Type, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum ApprovalStatus {
    PendingReview,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::PendingReview => "pending_review",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ApprovalStatus::PendingReview)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural key of a catalog entry. At most one record exists per key.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BusinessKey {
    pub storage_type: String,
    pub storage_identifier: String,
    pub storage_path: String,
}

/// A persisted discovery record, as stored in `data_discovery`.
///
/// The JSON columns are opaque to the engine beyond the hashes it keeps in
/// dedicated columns.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct DiscoveryRecord {
    pub id: i64,
    pub storage_type: String,
    pub storage_identifier: String,
    pub storage_path: String,
    pub storage_location: Json<Value>,
    pub file_metadata: Json<Value>,
    pub file_hash: String,
    pub schema_json: Json<Value>,
    pub schema_hash: String,
    pub storage_metadata: Json<Value>,
    pub discovery_info: Json<Value>,
    /// Coarse record status: `pending`, then the decision outcome.
    pub status: String,
    pub approval_status: ApprovalStatus,
    pub is_visible: bool,
    pub is_active: bool,
    pub environment: String,
    pub env_type: String,
    pub data_source_type: String,
    pub folder_path: String,
    pub discovered_at: DateTime<Utc>,
    pub last_checked_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_by: String,
    pub decided_by: Option<String>,
    pub decided_role: Option<String>,
    pub decision_comments: Option<String>,
    pub rejection_reason: Option<String>,
    pub decided_at: Option<DateTime<Utc>>,
}

/// The subset of a record needed to reconcile it against a fresh fingerprint.
#[derive(Clone, FromRow, Debug, PartialEq, Eq)]
pub struct StoredFingerprint {
    pub id: i64,
    pub file_hash: String,
    pub schema_hash: String,
}

/// Values written by an `Insert`.
#[derive(Clone, Debug)]
pub struct NewDiscovery {
    pub key: BusinessKey,
    pub storage_location: Value,
    pub refresh: DiscoveryRefresh,
    pub environment: String,
    pub env_type: String,
    pub data_source_type: String,
    pub folder_path: String,
    pub created_by: String,
}

/// Values replaced by a `FullUpdate` (and written once by an `Insert`).
#[derive(Clone, Debug)]
pub struct DiscoveryRefresh {
    pub file_metadata: Value,
    pub file_hash: String,
    pub schema_json: Value,
    pub schema_hash: String,
    pub storage_metadata: Value,
    pub discovery_info: Value,
}

/// A record announced to governance reviewers after a scan.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SurfacedDiscovery {
    pub id: i64,
    pub file_name: String,
    pub storage_path: String,
}

/// An approval or rejection by an external actor.
#[derive(Clone, Debug)]
pub struct Decision {
    pub outcome: ApprovalStatus,
    pub actor: String,
    pub role: Option<String>,
    pub comments: Option<String>,
    pub rejection_reason: Option<String>,
}

/// Filters accepted by the listing endpoint. `None` means "any".
#[derive(Clone, Debug, Default)]
pub struct ListFilter {
    pub status: Option<String>,
    pub environment: Option<String>,
    pub data_source_type: Option<String>,
    pub search: Option<String>,
}

/// Aggregate counts over the catalog.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct DiscoveryStats {
    pub total: i64,
    pub pending_review: i64,
    pub approved: i64,
    pub rejected: i64,
    pub active: i64,
    pub by_environment: BTreeMap<String, i64>,
    pub by_data_source_type: BTreeMap<String, i64>,
}
