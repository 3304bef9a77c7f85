//! HTTP routes next to the WebSocket: history, ledger snapshots, uploads.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use taskgate_core::{ChangeEntry, HistoryError, TaskHistory, TaskRecord};
use taskgate_session::{ConnectionRegistry, LedgerRegistry};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::{
    upload::{create_upload_router, UploadStore},
    websocket::create_ws_router,
};

/// HTTP error body for history failures.
struct ApiError(HistoryError);

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HistoryError::NotFound(_) => StatusCode::NOT_FOUND,
            HistoryError::Io(_) | HistoryError::Format(_) | HistoryError::Internal(_) => {
                tracing::error!("History request failed: {}", self.0);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<usize>,
}

async fn list_history(
    State(history): State<Arc<dyn TaskHistory>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<TaskRecord>>, ApiError> {
    Ok(Json(history.list(query.limit).await?))
}

async fn recent_dirs(
    State(history): State<Arc<dyn TaskHistory>>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(history.recent_base_dirs().await?))
}

async fn get_record(
    State(history): State<Arc<dyn TaskHistory>>,
    Path(id): Path<Uuid>,
) -> Result<Json<TaskRecord>, ApiError> {
    history
        .get(id)
        .await?
        .map(Json)
        .ok_or(ApiError(HistoryError::NotFound(id)))
}

async fn delete_record(
    State(history): State<Arc<dyn TaskHistory>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    history.remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Router serving the task history.
#[must_use]
pub fn create_history_router(history: Arc<dyn TaskHistory>) -> Router {
    Router::new()
        .route("/history", get(list_history))
        .route("/history/recent-dirs", get(recent_dirs))
        .route("/history/{id}", get(get_record).delete(delete_record))
        .with_state(history)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextQuery {
    base_dir: String,
}

async fn context_snapshot(
    State(ledgers): State<Arc<LedgerRegistry>>,
    Query(query): Query<ContextQuery>,
) -> Json<Vec<ChangeEntry>> {
    Json(
        ledgers
            .get(&query.base_dir)
            .map(|ledger| ledger.snapshot())
            .unwrap_or_default(),
    )
}

/// Router serving read-only ledger snapshots at `GET /context?baseDir=`.
#[must_use]
pub fn create_context_router(ledgers: Arc<LedgerRegistry>) -> Router {
    Router::new()
        .route("/context", get(context_snapshot))
        .with_state(ledgers)
}

/// Every route the server exposes, with request tracing.
///
/// History routes are only mounted when the registry records history.
#[must_use]
pub fn create_router(registry: Arc<ConnectionRegistry>, uploads: UploadStore) -> Router {
    let mut router = Router::new()
        .merge(create_context_router(Arc::clone(registry.ledgers())))
        .merge(create_upload_router(uploads));
    if let Some(history) = registry.history() {
        router = router.merge(create_history_router(Arc::clone(history)));
    }
    router
        .merge(create_ws_router(registry))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use taskgate_core::{ChangeKind, ChangePaths, TaskData};
    use taskgate_executor::{TaskContext, TaskWork, WorkError};
    use taskgate_session::storage::MemoryHistory;
    use tower::ServiceExt;

    use super::*;

    struct Idle;

    #[async_trait]
    impl TaskWork for Idle {
        async fn run(&self, _ctx: TaskContext) -> Result<String, WorkError> {
            Ok(String::new())
        }
    }

    async fn get_json(router: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_history_routes() {
        let history: Arc<dyn TaskHistory> = Arc::new(MemoryHistory::new());
        let record = history.record(&TaskData::new("/proj", "first")).await.unwrap();
        history.record(&TaskData::new("/other", "second")).await.unwrap();
        let router = create_history_router(Arc::clone(&history));

        let (status, body) = get_json(router.clone(), "/history?limit=1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(body[0]["prompt"], "second");

        let (_, body) = get_json(router.clone(), "/history/recent-dirs").await;
        assert_eq!(body, serde_json::json!(["/other", "/proj"]));

        let (status, body) = get_json(router.clone(), &format!("/history/{}", record.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["baseDir"], "/proj");

        let response = router
            .clone()
            .oneshot(
                Request::delete(format!("/history/{}", record.id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let (status, _) = get_json(router, &format!("/history/{}", record.id)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_context_snapshot_route() {
        let registry = Arc::new(ConnectionRegistry::new(Arc::new(Idle)));
        let ledger = registry.ledgers().claim("/proj", Uuid::new_v4()).unwrap();
        ledger
            .append(ChangeKind::MoveItem, ChangePaths::moved("a", "b"))
            .unwrap();

        let uploads = UploadStore::new(std::env::temp_dir().join("taskgate-unused"));
        let router = create_router(registry, uploads);

        let (status, body) = get_json(router.clone(), "/context?baseDir=/proj").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["kind"], "moveItem");
        assert_eq!(body[0]["ordinal"], 1);

        let (_, body) = get_json(router.clone(), "/context?baseDir=/elsewhere").await;
        assert_eq!(body, serde_json::json!([]));

        // No history configured on this registry.
        let (status, _) = get_json(router, "/history").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
