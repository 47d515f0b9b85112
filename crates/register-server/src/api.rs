use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use register_shared::types::KeyId;
use register_store::{Key, KeyUpdate, NewKey, SharedDatabase};
use register_sync::{Afterhandler, ReindexOptions};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use crate::encryption::EncryptionRules;
use crate::error::ServerError;
use crate::keys::KeyService;
use crate::records::{RecordService, RecordView};

/// Largest page a record listing returns.
const MAX_PAGE_LIMIT: u32 = 1000;
const DEFAULT_PAGE_LIMIT: u32 = 100;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDatabase,
    pub keys: KeyService,
    pub records: RecordService,
    pub rules: EncryptionRules,
    pub afterhandler: Arc<Afterhandler>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/keys", post(create_key))
        .route("/keys/:id", get(get_key).patch(update_key))
        .route("/keys/:id/process-encryption", post(process_encryption))
        .route("/keys/:id/reindex", post(start_reindex).get(reindex_status))
        .route("/keys/:id/records", post(create_record).get(list_records))
        .route(
            "/records/:id",
            get(get_record).put(update_record).delete(delete_record),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ProcessEncryptionResponse {
    count: u64,
}

#[derive(Serialize, Deserialize)]
struct ReindexStatusResponse {
    key_id: KeyId,
    is_reindexing: bool,
    last_sync_error: Option<String>,
}

#[derive(Deserialize)]
struct RecordInput {
    data: Value,
    #[serde(default)]
    signature: Option<String>,
}

#[derive(Deserialize)]
struct PageQuery {
    offset: Option<u32>,
    limit: Option<u32>,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Keys ───

async fn create_key(
    State(state): State<AppState>,
    Json(new_key): Json<NewKey>,
) -> Result<(StatusCode, Json<Key>), ServerError> {
    let key = state.keys.create(&new_key).await?;
    Ok((StatusCode::CREATED, Json(key)))
}

async fn get_key(
    State(state): State<AppState>,
    Path(id): Path<KeyId>,
) -> Result<Json<Key>, ServerError> {
    Ok(Json(state.keys.get(id).await?.data))
}

async fn update_key(
    State(state): State<AppState>,
    Path(id): Path<KeyId>,
    Json(update): Json<KeyUpdate>,
) -> Result<Json<Key>, ServerError> {
    Ok(Json(state.keys.update(id, &update).await?))
}

async fn process_encryption(
    State(state): State<AppState>,
    Path(id): Path<KeyId>,
) -> Result<Json<ProcessEncryptionResponse>, ServerError> {
    let count = state.rules.process_encryption(id).await?;
    Ok(Json(ProcessEncryptionResponse { count }))
}

/// Start a background reindex. Completion is observable through
/// `GET /keys/:id/reindex` only.
async fn start_reindex(
    State(state): State<AppState>,
    Path(id): Path<KeyId>,
    body: Option<Json<ReindexOptions>>,
) -> Result<(StatusCode, Json<Value>), ServerError> {
    state.keys.get(id).await?;
    let options = body.map(|Json(o)| o).unwrap_or_default();

    state.afterhandler.spawn_reindex(id, options).await?;
    info!(key_id = id, "Reindex accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "key_id": id, "accepted": true })),
    ))
}

async fn reindex_status(
    State(state): State<AppState>,
    Path(id): Path<KeyId>,
) -> Result<Json<ReindexStatusResponse>, ServerError> {
    state.keys.get(id).await?;
    let is_reindexing = state.afterhandler.is_key_reindexing(id).await;
    let last_sync_error = state
        .db
        .lock()
        .await
        .get_last_afterhandler_by_key_id(id)?
        .and_then(|row| row.sync_error);

    Ok(Json(ReindexStatusResponse {
        key_id: id,
        is_reindexing,
        last_sync_error,
    }))
}

// ─── Records ───

async fn create_record(
    State(state): State<AppState>,
    Path(key_id): Path<KeyId>,
    Json(input): Json<RecordInput>,
) -> Result<(StatusCode, Json<RecordView>), ServerError> {
    let record = state
        .records
        .create(key_id, input.data, input.signature)
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn list_records(
    State(state): State<AppState>,
    Path(key_id): Path<KeyId>,
    Query(page): Query<PageQuery>,
) -> Result<Json<Vec<RecordView>>, ServerError> {
    let limit = page
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let records = state
        .records
        .list(key_id, page.offset.unwrap_or(0), limit)
        .await?;
    Ok(Json(records))
}

async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<RecordView>, ServerError> {
    Ok(Json(state.records.get(id).await?))
}

async fn update_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(input): Json<RecordInput>,
) -> Result<Json<RecordView>, ServerError> {
    Ok(Json(
        state.records.update(id, input.data, input.signature).await?,
    ))
}

async fn delete_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ServerError> {
    state.records.delete(id).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use register_cache::{Cache, CacheConfig, MemoryBackend};
    use register_shared::crypto::generate_symmetric_key;
    use register_shared::Encryption;
    use register_store::Database;
    use register_sync::workers::PlinkConfig;
    use register_sync::{build_workers, AfterhandlerConfig, ReindexTracker, Worker, WorkersConfig};
    use tower::ServiceExt;

    fn app() -> (Router, AppState, tempfile::TempDir) {
        app_with(Vec::new())
    }

    fn app_with(workers: Vec<Arc<dyn Worker>>) -> (Router, AppState, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("api.db"))
            .unwrap()
            .into_shared();
        let engine = Arc::new(Encryption::new(&generate_symmetric_key(), 12).unwrap());
        let cache = Cache::new(Arc::new(MemoryBackend::new()), CacheConfig::default());
        let rules = EncryptionRules::new(db.clone(), Some(engine), 100);
        let keys = KeyService::new(db.clone(), cache.clone(), rules.clone());
        let afterhandler = Arc::new(Afterhandler::new(
            workers,
            db.clone(),
            ReindexTracker::for_cache(&cache),
            AfterhandlerConfig {
                page_size: 10,
                settle_delay: Duration::ZERO,
            },
        ));
        let records = RecordService::new(db.clone(), keys.clone(), rules.clone(), afterhandler.clone());
        let state = AppState {
            db,
            keys,
            records,
            rules,
            afterhandler,
        };
        (build_router(state.clone()), state, dir)
    }

    async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    async fn create_key(app: &Router) -> KeyId {
        let (status, key) = call(
            app,
            "POST",
            "/keys",
            Some(serde_json::json!({ "register_id": 1, "name": "people" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        key["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _, _dir) = app();
        let (status, body) = call(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_toggle_allowed_only_without_records() {
        let (app, _, _dir) = app();
        let id = create_key(&app).await;
        let uri = format!("/keys/{id}");

        let (status, key) = call(&app, "PATCH", &uri, Some(serde_json::json!({ "is_encrypted": true }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(key["is_encrypted"], true);

        let (status, _) = call(
            &app,
            "POST",
            &format!("/keys/{id}/records"),
            Some(serde_json::json!({ "data": { "name": "Alice" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(&app, "PATCH", &uri, Some(serde_json::json!({ "is_encrypted": false }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("without records"));
    }

    #[tokio::test]
    async fn test_encrypted_record_reads_back_as_plaintext() {
        let (app, state, _dir) = app();
        let id = create_key(&app).await;
        call(&app, "PATCH", &format!("/keys/{id}"), Some(serde_json::json!({ "is_encrypted": true }))).await;

        let (status, created) = call(
            &app,
            "POST",
            &format!("/keys/{id}/records"),
            Some(serde_json::json!({ "data": { "name": "Alice", "age": 30 } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let record_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

        let stored = state.db.lock().await.get_record(record_id).unwrap();
        assert!(stored.is_encrypted);
        assert!(!stored.data.contains("Alice"));
        assert!(stored.search_string.is_none());

        let (status, read) = call(&app, "GET", &format!("/records/{record_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(read["data"]["name"], "Alice");
        assert_eq!(read["data"]["age"], 30);

        let (_, list) = call(&app, "GET", &format!("/keys/{id}/records?limit=5"), None).await;
        assert_eq!(list[0]["data"]["name"], "Alice");
    }

    #[tokio::test]
    async fn test_tampered_record_is_a_client_error() {
        let (app, state, _dir) = app();
        let id = create_key(&app).await;
        call(&app, "PATCH", &format!("/keys/{id}"), Some(serde_json::json!({ "is_encrypted": true }))).await;
        let (_, created) = call(
            &app,
            "POST",
            &format!("/keys/{id}/records"),
            Some(serde_json::json!({ "data": { "name": "Bob" } })),
        )
        .await;
        let record_id: Uuid = created["id"].as_str().unwrap().parse().unwrap();

        // Corrupt the tag segment to 8 bytes.
        {
            let db = state.db.lock().await;
            let stored = db.get_record(record_id).unwrap();
            let mut parts: Vec<&str> = stored.data.splitn(3, ':').collect();
            parts[1] = "AAAAAAAAAAA=";
            let broken = parts.join(":");
            db.update_record_encryption(record_id, true, &broken, true, None)
                .unwrap();
        }

        let (status, body) = call(&app, "GET", &format!("/records/{record_id}"), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(
            body["error"],
            "Invalid authentication tag length. Expected 16 bytes."
        );
    }

    #[tokio::test]
    async fn test_record_lifecycle_and_process_encryption() {
        let (app, _, _dir) = app();
        let id = create_key(&app).await;

        let (_, created) = call(
            &app,
            "POST",
            &format!("/keys/{id}/records"),
            Some(serde_json::json!({ "data": { "v": 1 } })),
        )
        .await;
        let record_uri = format!("/records/{}", created["id"].as_str().unwrap());

        let (status, updated) = call(&app, "PUT", &record_uri, Some(serde_json::json!({ "data": { "v": 2 } }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["data"]["v"], 2);

        let (status, body) = call(&app, "POST", &format!("/keys/{id}/process-encryption"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);

        let (status, _) = call(&app, "DELETE", &record_uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, "GET", &record_uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_non_object_data_is_rejected() {
        let (app, _, _dir) = app();
        let id = create_key(&app).await;
        let (status, _) = call(
            &app,
            "POST",
            &format!("/keys/{id}/records"),
            Some(serde_json::json!({ "data": [1, 2, 3] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_reindex_accepted_then_finishes() {
        let (app, state, _dir) = app();
        let id = create_key(&app).await;

        let (status, _) = call(&app, "POST", &format!("/keys/{id}/reindex"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        for _ in 0..50 {
            if !state.afterhandler.is_key_reindexing(id).await {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let (status, body) = call(&app, "GET", &format!("/keys/{id}/reindex"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["is_reindexing"], false);
        assert_eq!(body["last_sync_error"], Value::Null);
    }

    #[tokio::test]
    async fn test_unknown_key_is_404() {
        let (app, _, _dir) = app();
        let (status, body) = call(&app, "GET", "/keys/777", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Key 777 not found");
    }

    #[tokio::test]
    async fn test_public_links_need_a_register() {
        let workers = build_workers(&WorkersConfig {
            plink: Some(PlinkConfig {
                url: "http://links.invalid".into(),
            }),
            ..Default::default()
        })
        .unwrap();
        let (app, state, _dir) = app_with(workers);
        let (status, key) = call(
            &app,
            "POST",
            "/keys",
            Some(serde_json::json!({ "register_id": 0, "name": "orphans" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = key["id"].as_i64().unwrap();

        let (status, body) = call(
            &app,
            "POST",
            &format!("/keys/{id}/records"),
            Some(serde_json::json!({ "data": { "name": "Alice" } })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("register id"));
        assert_eq!(state.db.lock().await.count_records_by_key_id(id).unwrap(), 0);
    }
}
