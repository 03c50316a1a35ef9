//! Defines routes for the discovery catalog.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz` liveness
//!   - `GET  /readyz` readiness (SQLite)
//!
//! - **Catalog**
//!   - `GET  /api/discovery` list with filters and pagination
//!   - `GET  /api/discovery/stats` summary counts
//!   - `POST /api/discovery/trigger` start a scan, answers 202
//!   - `GET  /api/discovery/{id}` one record
//!   - `PUT  /api/discovery/{id}/approve` approve
//!   - `PUT  /api/discovery/{id}/reject` reject
//!
//! Static segments (`stats`, `trigger`) take priority over `{id}`.

use crate::{
    handlers::{
        discovery_handlers::{
            approve_discovery, discovery_stats, get_discovery, list_discoveries,
            reject_discovery, trigger_discovery,
        },
        health_handlers::{healthz, readyz},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router with every endpoint; handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Catalog routes
        .route("/api/discovery", get(list_discoveries))
        .route("/api/discovery/stats", get(discovery_stats))
        .route("/api/discovery/trigger", post(trigger_discovery))
        .route("/api/discovery/{id}", get(get_discovery))
        .route("/api/discovery/{id}/approve", put(approve_discovery))
        .route("/api/discovery/{id}/reject", put(reject_discovery))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        approval::ApprovalService,
        discovery_store::{DiscoveryStore, memory_store},
        orchestrator::tests::{FakeStorage, RecordingNotifier, discovery_config, orchestrator},
        scheduler::DiscoveryScheduler,
    };
    use axum::{
        body::{Body, to_bytes},
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use std::{sync::Arc, time::Duration};
    use tower::ServiceExt;

    async fn app() -> (Router, DiscoveryStore) {
        let store = memory_store().await;
        let storage = Arc::new(FakeStorage::default());
        storage.put("raw", "landing/accounts.csv", "E1", b"account_id,balance\n1,2\n");
        let orch = orchestrator(
            discovery_config(
                r#"
                [[accounts]]
                name = "acct"
                dsn = "memory://"
                containers = ["raw"]
                environment = "dev"
                "#,
            ),
            store.clone(),
            &storage,
            Arc::new(RecordingNotifier::default()),
            100,
        );
        let state = AppState {
            store: store.clone(),
            approvals: ApprovalService::new(store.clone(), false),
            scheduler: DiscoveryScheduler::new(Arc::new(orch), Duration::from_secs(30)),
        };
        (routes().with_state(state), store)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if body.is_some() {
            req = req.header("content-type", "application/json");
        }
        let req = req
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn scan(app: &Router, store: &DiscoveryStore) -> i64 {
        let (status, body) = send(app, "POST", "/api/discovery/trigger", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["status"], "running");
        assert!(body["run_id"].is_string());

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let (rows, _) = store.list(&Default::default(), 0, 1).await.unwrap();
            if let Some(record) = rows.first() {
                return record.id;
            }
            assert!(tokio::time::Instant::now() < deadline, "scan never wrote");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn health_endpoints_report_ok() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/healthz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"status": "ok"}));

        let (status, body) = send(&app, "GET", "/readyz", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["checks"]["sqlite"]["ok"], true);
    }

    #[tokio::test]
    async fn empty_catalog_lists_and_counts_nothing() {
        let (app, _) = app().await;
        let (status, body) = send(&app, "GET", "/api/discovery", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["discoveries"], json!([]));
        assert_eq!(
            body["pagination"],
            json!({"page": 0, "size": 50, "total": 0, "total_pages": 0})
        );

        let (status, body) = send(&app, "GET", "/api/discovery/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 0);
    }

    #[tokio::test]
    async fn invalid_input_is_a_validation_error() {
        let (app, _) = app().await;
        for uri in ["/api/discovery?page=-1", "/api/discovery?page=x", "/api/discovery?size=x"] {
            let (status, body) = send(&app, "GET", uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["reason"], "validation_error");
            assert_eq!(body["status"], 400);
        }

        let (status, _) = send(&app, "GET", "/api/discovery/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&app, "GET", "/api/discovery/999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["reason"], "not_found");
    }

    #[tokio::test]
    async fn triggered_scan_feeds_review_workflow() {
        let (app, store) = app().await;
        let id = scan(&app, &store).await;

        let (status, body) = send(&app, "GET", "/api/discovery?environment=dev&size=500", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["size"], 100);
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["discoveries"][0]["storage_path"], "raw/landing/accounts.csv");
        assert_eq!(body["discoveries"][0]["created_by"], "api_trigger");

        let approve = format!("/api/discovery/{id}/approve");
        let (status, body) = send(&app, "PUT", &approve, Some("{}")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "approved_by is required and must be a non-empty string"
        );

        let (status, _) = send(&app, "PUT", &approve, Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "PUT",
            &approve,
            Some(r#"{"approved_by": "alice", "role": "steward", "comments": "fine"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["approval_status"], "approved");
        assert_eq!(body["decided_by"], "alice");

        let (status, body) = send(&app, "GET", &format!("/api/discovery/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "approved");

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/discovery/{id}/reject"),
            Some(r#"{"rejected_by": "bob", "rejection_reason": "PII"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["rejection_reason"], "PII");

        let (_, body) = send(&app, "GET", "/api/discovery/stats", None).await;
        assert_eq!(body["rejected"], 1);
        assert_eq!(body["by_environment"]["dev"], 1);
    }

    #[tokio::test]
    async fn deciding_unknown_record_is_not_found() {
        let (app, _) = app().await;
        let (status, _) = send(
            &app,
            "PUT",
            "/api/discovery/77/reject",
            Some(r#"{"rejected_by": "bob"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
