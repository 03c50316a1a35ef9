//! Approval workflow for discovered records.
//!
//! `pending_review` moves to `approved` or `rejected`. Re-deciding a record
//! that already carries a decision is allowed unless the service runs with
//! strict transitions, in which case it is a conflict.

use crate::{
    errors::{DiscoveryError, DiscoveryResult},
    models::discovery::{ApprovalStatus, Decision, DiscoveryRecord},
    services::discovery_store::DiscoveryStore,
};
use tracing::info;

#[derive(Clone)]
pub struct ApprovalService {
    store: DiscoveryStore,
    strict: bool,
}

impl ApprovalService {
    pub fn new(store: DiscoveryStore, strict: bool) -> Self {
        Self { store, strict }
    }

    pub async fn approve(
        &self,
        id: i64,
        actor: &str,
        role: Option<String>,
        comments: Option<String>,
    ) -> DiscoveryResult<DiscoveryRecord> {
        let decision = Decision {
            outcome: ApprovalStatus::Approved,
            actor: require_actor(actor, "approved_by")?,
            role: non_blank(role),
            comments: non_blank(comments),
            rejection_reason: None,
        };
        self.decide(id, decision).await
    }

    pub async fn reject(
        &self,
        id: i64,
        actor: &str,
        reason: Option<String>,
        role: Option<String>,
        comments: Option<String>,
    ) -> DiscoveryResult<DiscoveryRecord> {
        let decision = Decision {
            outcome: ApprovalStatus::Rejected,
            actor: require_actor(actor, "rejected_by")?,
            role: non_blank(role),
            comments: non_blank(comments),
            rejection_reason: non_blank(reason),
        };
        self.decide(id, decision).await
    }

    async fn decide(&self, id: i64, decision: Decision) -> DiscoveryResult<DiscoveryRecord> {
        let strict = self.strict;
        let record = self
            .store
            .record_decision(id, &decision, |current| check_transition(id, current, strict))
            .await?;
        info!(
            discovery_id = id,
            outcome = %decision.outcome,
            actor = %decision.actor,
            "discovery decision recorded"
        );
        Ok(record)
    }
}

/// Whether a record in `current` may receive a new decision.
pub fn check_transition(id: i64, current: ApprovalStatus, strict: bool) -> DiscoveryResult<()> {
    if strict && current.is_terminal() {
        return Err(DiscoveryError::Conflict { id, current });
    }
    Ok(())
}

fn require_actor(actor: &str, field: &str) -> DiscoveryResult<String> {
    let actor = actor.trim();
    if actor.is_empty() {
        return Err(DiscoveryError::Validation(format!(
            "{field} is required and must be a non-empty string"
        )));
    }
    Ok(actor.to_string())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::discovery::{BusinessKey, DiscoveryRefresh, NewDiscovery},
        services::discovery_store::memory_store,
    };
    use serde_json::json;

    async fn seeded(strict: bool) -> (ApprovalService, DiscoveryStore, i64) {
        let store = memory_store().await;
        let id = store
            .insert(&NewDiscovery {
                key: BusinessKey {
                    storage_type: "azure_blob".into(),
                    storage_identifier: "acct".into(),
                    storage_path: "raw/a.csv".into(),
                },
                storage_location: json!({}),
                refresh: DiscoveryRefresh {
                    file_metadata: json!({}),
                    file_hash: "f".into(),
                    schema_json: json!({}),
                    schema_hash: "s".into(),
                    storage_metadata: json!({}),
                    discovery_info: json!({}),
                },
                environment: "prod".into(),
                env_type: "production".into(),
                data_source_type: "finance".into(),
                folder_path: "".into(),
                created_by: "scheduler".into(),
            })
            .await
            .unwrap()
            .unwrap();
        (ApprovalService::new(store.clone(), strict), store, id)
    }

    #[tokio::test]
    async fn approve_is_reflected_by_get() {
        let (approvals, store, id) = seeded(false).await;
        approvals
            .approve(id, " alice ", Some("steward".into()), Some("ok".into()))
            .await
            .unwrap();

        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.approval_status, ApprovalStatus::Approved);
        assert_eq!(record.decided_by.as_deref(), Some("alice"));
        assert_eq!(record.decided_role.as_deref(), Some("steward"));
        assert_eq!(record.decision_comments.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn reject_records_reason() {
        let (approvals, _, id) = seeded(false).await;
        let record = approvals
            .reject(id, "bob", Some("contains PII".into()), None, Some("  ".into()))
            .await
            .unwrap();
        assert_eq!(record.approval_status, ApprovalStatus::Rejected);
        assert_eq!(record.status, "rejected");
        assert_eq!(record.rejection_reason.as_deref(), Some("contains PII"));
        assert_eq!(record.decision_comments, None);
    }

    #[tokio::test]
    async fn blank_actor_is_rejected_before_lookup() {
        let (approvals, _, _) = seeded(false).await;
        let result = approvals.approve(9999, "   ", None, None).await;
        assert!(matches!(result, Err(DiscoveryError::Validation(_))));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (approvals, _, _) = seeded(false).await;
        assert!(matches!(
            approvals.approve(9999, "alice", None, None).await,
            Err(DiscoveryError::NotFound(9999))
        ));
        assert!(matches!(
            approvals.reject(9999, "alice", None, None, None).await,
            Err(DiscoveryError::NotFound(9999))
        ));
    }

    #[tokio::test]
    async fn permissive_mode_allows_redeciding() {
        let (approvals, _, id) = seeded(false).await;
        approvals.approve(id, "alice", None, None).await.unwrap();
        let record = approvals.reject(id, "bob", None, None, None).await.unwrap();
        assert_eq!(record.approval_status, ApprovalStatus::Rejected);
        assert_eq!(record.decided_by.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn strict_mode_refuses_terminal_transitions() {
        let (approvals, store, id) = seeded(true).await;
        approvals.approve(id, "alice", None, None).await.unwrap();

        let result = approvals.reject(id, "bob", None, None, None).await;
        assert!(matches!(result, Err(DiscoveryError::Conflict { .. })));
        let record = store.get(id).await.unwrap().unwrap();
        assert_eq!(record.approval_status, ApprovalStatus::Approved);
    }

    #[test]
    fn pending_review_always_transitions() {
        assert!(check_transition(1, ApprovalStatus::PendingReview, true).is_ok());
        assert!(check_transition(1, ApprovalStatus::Approved, false).is_ok());
        assert!(check_transition(1, ApprovalStatus::Rejected, true).is_err());
    }
}
