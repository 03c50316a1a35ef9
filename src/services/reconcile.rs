//! Reconciliation decision: what to write for one object, given the record
//! already stored for its business key (if any) and a fresh fingerprint.

use crate::{models::discovery::StoredFingerprint, services::fingerprint::Fingerprint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    /// No record exists for the key.
    Insert,
    /// The schema changed: replace metadata and announce.
    FullUpdate,
    /// Only the change indicators moved: acknowledge without rewriting.
    TouchOnly,
    /// Nothing changed: issue no write at all.
    Skip,
}

impl ReconcileAction {
    /// Whether the outcome is announced to governance reviewers.
    pub fn surfaces(&self) -> bool {
        matches!(self, ReconcileAction::Insert | ReconcileAction::FullUpdate)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReconcileAction::Insert => "insert",
            ReconcileAction::FullUpdate => "full_update",
            ReconcileAction::TouchOnly => "touch_only",
            ReconcileAction::Skip => "skip",
        }
    }
}

/// Classify the required write. A schema change always wins over a file
/// hash change.
pub fn decide(existing: Option<&StoredFingerprint>, fresh: &Fingerprint) -> ReconcileAction {
    let Some(existing) = existing else {
        return ReconcileAction::Insert;
    };
    let file_changed = existing.file_hash != fresh.file_hash;
    let schema_changed = existing.schema_hash != fresh.schema_hash;

    match (file_changed, schema_changed) {
        (_, true) => ReconcileAction::FullUpdate,
        (true, false) => ReconcileAction::TouchOnly,
        (false, false) => ReconcileAction::Skip,
    }
}
