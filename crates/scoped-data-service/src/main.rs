use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use clap::Parser;
use scoped_data_api::{
    ArchivedBySourceRequest, DeleteDataRequest, MigrateResult, RegisterContainerRequest,
    ResolveAllRequest, ResolveArchivedRequest, ResolveDataRequest, ScopedDataApi,
    UpdateDataRequest, API_CONTRACT_VERSION, DEFAULT_PAGE_LIMIT,
};
use scoped_data_core::{ArchivedDataInstance, DataError, DataInstance, ErrorKind, NewDataInstance};
use scoped_data_store_sqlite::{ContainerRecord, StoredChangeEvent};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";

#[derive(Debug, Clone)]
struct ServiceState {
    api: ScopedDataApi,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceEnvelope<T>
where
    T: Serialize,
{
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    data: T,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    kind: &'static str,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct ServiceError {
    #[serde(skip)]
    status: StatusCode,
    service_contract_version: &'static str,
    error: ErrorBody,
}

#[derive(Debug, Clone, Deserialize)]
struct MigrateRequest {
    dry_run: bool,
}

#[derive(Debug, Clone, Deserialize)]
struct EventsQuery {
    #[serde(default)]
    after_seq: i64,
    #[serde(default = "default_events_limit")]
    limit: usize,
}

fn default_events_limit() -> usize {
    DEFAULT_PAGE_LIMIT
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Debug, Parser)]
#[command(name = "scoped-data-service")]
#[command(about = "Local HTTP service for scoped data resolution")]
struct Args {
    #[arg(long, default_value = "./scoped_data.sqlite3")]
    db: PathBuf,
    /// YAML file with engine settings.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

impl From<anyhow::Error> for ServiceError {
    fn from(err: anyhow::Error) -> Self {
        let kind = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<DataError>())
            .map(DataError::kind);
        let status = match kind {
            Some(ErrorKind::NotFound) => StatusCode::NOT_FOUND,
            Some(ErrorKind::Validation) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let message = format!("{err:#}");
        if status.is_server_error() {
            error!(error = %message, "request failed");
        } else {
            warn!(status = status.as_u16(), error = %message, "request rejected");
        }
        Self {
            status,
            service_contract_version: SERVICE_CONTRACT_VERSION,
            error: ErrorBody { kind: kind.map_or("internal", ErrorKind::as_str), message },
        }
    }
}

type ServiceResult<T> = std::result::Result<Json<ServiceEnvelope<T>>, ServiceError>;

fn envelope<T>(data: T) -> ServiceEnvelope<T>
where
    T: Serialize,
{
    ServiceEnvelope {
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        data,
    }
}

fn app(state: ServiceState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/db/migrate", post(db_migrate))
        .route("/v1/containers", post(containers_register))
        .route("/v1/data", post(data_create))
        .route("/v1/data/update", post(data_update))
        .route("/v1/data/delete", post(data_delete))
        .route("/v1/data/resolve", post(data_resolve))
        .route("/v1/data/resolve-all", post(data_resolve_all))
        .route("/v1/archive/resolve", post(archive_resolve))
        .route("/v1/archive/by-source", post(archive_by_source))
        .route("/v1/events", get(events_list))
        .with_state(state)
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing();

    let api = ScopedDataApi::from_config_file(args.db, args.config.as_deref())?;
    api.migrate(false)?;
    let state = ServiceState { api };
    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(bind = %args.bind, "scoped data service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health() -> Json<ServiceEnvelope<HealthResponse>> {
    Json(envelope(HealthResponse { status: "ok" }))
}

async fn db_migrate(
    State(state): State<ServiceState>,
    Json(request): Json<MigrateRequest>,
) -> ServiceResult<MigrateResult> {
    Ok(Json(envelope(state.api.migrate(request.dry_run)?)))
}

async fn containers_register(
    State(state): State<ServiceState>,
    Json(request): Json<RegisterContainerRequest>,
) -> ServiceResult<ContainerRecord> {
    Ok(Json(envelope(state.api.register_container(request)?)))
}

async fn data_create(
    State(state): State<ServiceState>,
    Json(request): Json<NewDataInstance>,
) -> ServiceResult<DataInstance> {
    Ok(Json(envelope(state.api.create_data(request)?)))
}

async fn data_update(
    State(state): State<ServiceState>,
    Json(request): Json<UpdateDataRequest>,
) -> ServiceResult<DataInstance> {
    Ok(Json(envelope(state.api.update_data(request)?)))
}

async fn data_delete(
    State(state): State<ServiceState>,
    Json(request): Json<DeleteDataRequest>,
) -> ServiceResult<DataInstance> {
    Ok(Json(envelope(state.api.delete_data(request)?)))
}

async fn data_resolve(
    State(state): State<ServiceState>,
    Json(request): Json<ResolveDataRequest>,
) -> ServiceResult<DataInstance> {
    Ok(Json(envelope(state.api.get_data(&request.name, &request.container)?)))
}

async fn data_resolve_all(
    State(state): State<ServiceState>,
    Json(request): Json<ResolveAllRequest>,
) -> ServiceResult<Vec<DataInstance>> {
    Ok(Json(envelope(state.api.resolve_all(&request)?)))
}

async fn archive_resolve(
    State(state): State<ServiceState>,
    Json(request): Json<ResolveArchivedRequest>,
) -> ServiceResult<ArchivedDataInstance> {
    let archived = state.api.archived_get(&request.name, &request.container, request.as_of)?;
    Ok(Json(envelope(archived)))
}

async fn archive_by_source(
    State(state): State<ServiceState>,
    Json(request): Json<ArchivedBySourceRequest>,
) -> ServiceResult<ArchivedDataInstance> {
    let archived = state.api.archived_by_source(request.source_object_id, request.as_of)?;
    Ok(Json(envelope(archived)))
}

async fn events_list(
    State(state): State<ServiceState>,
    Query(query): Query<EventsQuery>,
) -> ServiceResult<Vec<StoredChangeEvent>> {
    Ok(Json(envelope(state.api.list_change_events(query.after_seq, query.limit)?)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("scoped-data-service-{}.sqlite3", ulid::Ulid::new()))
    }

    async fn response_json(response: Response) -> Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    async fn post_json(router: &Router, uri: &str, payload: &Value) -> (StatusCode, Value) {
        let response = match router
            .clone()
            .oneshot(
                Request::builder()
                    .uri(uri)
                    .method("POST")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(payload.to_string()))
                    .unwrap_or_else(|err| panic!("failed to build request for {uri}: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("request to {uri} failed: {err}"),
        };
        let status = response.status();
        (status, response_json(response).await)
    }

    async fn seeded_router() -> Router {
        let router = app(ServiceState { api: ScopedDataApi::new(unique_temp_db_path()) });
        let (status, _) = post_json(
            &router,
            "/v1/containers",
            &serde_json::json!({
                "container": { "container_id": 1, "container_type": "PROCESS_INSTANCE" }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = post_json(
            &router,
            "/v1/containers",
            &serde_json::json!({
                "container": { "container_id": 10, "container_type": "FLOW_NODE" },
                "parent": { "container_id": 1, "container_type": "PROCESS_INSTANCE" }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        router
    }

    fn create_payload(name: &str, container: (i64, &str), value: &str) -> Value {
        serde_json::json!({
            "name": name,
            "container": { "container_id": container.0, "container_type": container.1 },
            "value": { "kind": "text", "value": value }
        })
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let router = app(ServiceState { api: ScopedDataApi::new(unique_temp_db_path()) });

        let response = match router
            .oneshot(
                Request::builder()
                    .uri("/v1/health")
                    .method("GET")
                    .body(axum::body::Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        };
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(
            value.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        assert_eq!(value.pointer("/data/status").and_then(Value::as_str), Some("ok"));
    }

    #[tokio::test]
    async fn resolve_prefers_nearest_container() {
        let router = seeded_router().await;
        let outer = create_payload("x", (1, "PROCESS_INSTANCE"), "outer");
        post_json(&router, "/v1/data", &outer).await;
        let (status, created) =
            post_json(&router, "/v1/data", &create_payload("x", (10, "FLOW_NODE"), "inner")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(created["api_contract_version"], API_CONTRACT_VERSION);

        let lookup = serde_json::json!({
            "name": "x",
            "container": { "container_id": 10, "container_type": "FLOW_NODE" }
        });
        let (status, resolved) = post_json(&router, "/v1/data/resolve", &lookup).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved.pointer("/data/value/value").and_then(Value::as_str), Some("inner"));

        let (_, all) = post_json(
            &router,
            "/v1/data/resolve-all",
            &serde_json::json!({
                "container": { "container_id": 10, "container_type": "FLOW_NODE" }
            }),
        )
        .await;
        assert_eq!(all["data"].as_array().map(Vec::len), Some(1));

        let id = created.pointer("/data/id").cloned().unwrap_or(Value::Null);
        let (status, _) =
            post_json(&router, "/v1/data/delete", &serde_json::json!({ "id": id })).await;
        assert_eq!(status, StatusCode::OK);

        let (_, fallback) = post_json(&router, "/v1/data/resolve", &lookup).await;
        assert_eq!(fallback.pointer("/data/value/value").and_then(Value::as_str), Some("outer"));
    }

    #[tokio::test]
    async fn updates_are_readable_from_the_archive() {
        let router = seeded_router().await;
        let (_, created) =
            post_json(&router, "/v1/data", &create_payload("x", (10, "FLOW_NODE"), "v1")).await;
        let id = created.pointer("/data/id").cloned().unwrap_or(Value::Null);

        let (status, updated) = post_json(
            &router,
            "/v1/data/update",
            &serde_json::json!({ "id": id, "value": { "kind": "integer", "value": 2 } }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated.pointer("/data/value/value").and_then(Value::as_i64), Some(2));

        let (status, latest) = post_json(
            &router,
            "/v1/archive/by-source",
            &serde_json::json!({ "source_object_id": id }),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(latest.pointer("/data/value/value").and_then(Value::as_i64), Some(2));

        let (status, early) = post_json(
            &router,
            "/v1/archive/resolve",
            &serde_json::json!({
                "name": "x",
                "container": { "container_id": 10, "container_type": "FLOW_NODE" },
                "as_of": "1970-01-01T00:00:00Z"
            }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(early.pointer("/error/kind").and_then(Value::as_str), Some("not_found"));
    }

    #[tokio::test]
    async fn engine_errors_map_to_http_status() {
        let router = seeded_router().await;

        let (status, missing) = post_json(
            &router,
            "/v1/data/resolve",
            &serde_json::json!({
                "name": "nope",
                "container": { "container_id": 1, "container_type": "PROCESS_INSTANCE" }
            }),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(
            missing.get("service_contract_version").and_then(Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );

        let blank = create_payload(" ", (1, "PROCESS_INSTANCE"), "v");
        let (status, invalid) = post_json(&router, "/v1/data", &blank).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(invalid.pointer("/error/kind").and_then(Value::as_str), Some("validation"));

        post_json(&router, "/v1/data", &create_payload("dup", (1, "PROCESS_INSTANCE"), "a")).await;
        let second = create_payload("dup", (1, "PROCESS_INSTANCE"), "b");
        let (status, duplicate) = post_json(&router, "/v1/data", &second).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            duplicate.pointer("/error/kind").and_then(Value::as_str),
            Some("write_failure")
        );
    }
}
