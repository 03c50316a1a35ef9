//! Liveness and readiness endpoints.

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde_json::json;

/// `GET /healthz`: always 200, no I/O.
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

/// `GET /readyz`: 200 when the catalog database answers `SELECT 1`, 503
/// otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let answer = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.store.db)
        .await;
    let error = match answer {
        Ok(1) => None,
        Ok(other) => Some(format!("unexpected result: {other}")),
        Err(err) => Some(format!("error: {err}")),
    };

    let (status, label) = match error {
        None => (StatusCode::OK, "ok"),
        Some(_) => (StatusCode::SERVICE_UNAVAILABLE, "error"),
    };
    let body = json!({
        "status": label,
        "checks": { "sqlite": { "ok": error.is_none(), "error": error } },
    });
    (status, Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        approval::ApprovalService,
        discovery_store::memory_store,
        orchestrator::tests::{FakeStorage, RecordingNotifier, discovery_config, orchestrator},
        scheduler::DiscoveryScheduler,
    };
    use axum::body::to_bytes;
    use serde_json::Value;
    use std::{sync::Arc, time::Duration};

    async fn state() -> AppState {
        let store = memory_store().await;
        let storage = Arc::new(FakeStorage::default());
        let orch = orchestrator(
            discovery_config(""),
            store.clone(),
            &storage,
            Arc::new(RecordingNotifier::default()),
            100,
        );
        AppState {
            store: store.clone(),
            approvals: ApprovalService::new(store, false),
            scheduler: DiscoveryScheduler::new(Arc::new(orch), Duration::from_secs(30)),
        }
    }

    async fn body(resp: axum::response::Response) -> Value {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn readyz_fails_once_the_pool_is_closed() {
        let state = state().await;
        let resp = readyz(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body(resp).await["checks"]["sqlite"]["error"], Value::Null);

        state.store.db.close().await;
        let resp = readyz(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let json = body(resp).await;
        assert_eq!(json["status"], "error");
        assert_eq!(json["checks"]["sqlite"]["ok"], false);
    }
}
