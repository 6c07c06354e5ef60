use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post, put},
    Router,
};
use cachebroker_engine::{CacheProvider, ControlPlaneError, Error, SecretStoreError};
use cachebroker_models::{
    Credentials, DeprovisionParameters, FailoverTestStarted, InstanceParameters, Operation,
    ProgressReport, ProvisionParameters, UpdateParameters,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared API state
#[derive(Clone)]
pub struct AppState {
    pub provider: Arc<CacheProvider>,
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(
            "/v1/instances/:id",
            put(provision).patch(update).delete(deprovision),
        )
        .route("/v1/instances/:id/last_operation", get(last_operation))
        .route("/v1/instances/:id/parameters", get(instance_parameters))
        .route(
            "/v1/instances/:id/bindings/:binding_id",
            put(bind).delete(unbind),
        )
        .route("/v1/instances/:id/failover_test", post(start_failover_test))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server
pub async fn start_server(host: &str, port: u16, state: AppState) -> Result<()> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("API server listening on {}", addr);

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

// ============================================================================
// Health Check
// ============================================================================

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cachebroker",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

// ============================================================================
// Instances
// ============================================================================

fn accepted(operation: Operation) -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "operation": operation })),
    )
}

async fn provision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<ProvisionParameters>,
) -> Result<impl IntoResponse, AppError> {
    state.provider.provision(&id, params).await?;
    Ok(accepted(Operation::Provision))
}

async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<UpdateParameters>,
) -> Result<impl IntoResponse, AppError> {
    state.provider.update(&id, params).await?;
    Ok(accepted(Operation::Update))
}

async fn deprovision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<DeprovisionParameters>,
) -> Result<impl IntoResponse, AppError> {
    state.provider.deprovision(&id, params).await?;
    Ok(accepted(Operation::Deprovision))
}

#[derive(Debug, Deserialize)]
struct LastOperationQuery {
    #[serde(default)]
    operation: Operation,
    previous_primary: Option<String>,
}

async fn last_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LastOperationQuery>,
) -> Result<Json<ProgressReport>, AppError> {
    let report = state
        .provider
        .progress_state(&id, query.operation, query.previous_primary.as_deref())
        .await?;
    Ok(Json(report))
}

async fn instance_parameters(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<InstanceParameters>, AppError> {
    Ok(Json(state.provider.instance_parameters(&id).await?))
}

async fn start_failover_test(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let previous_primary_node_id = state.provider.start_failover_test(&id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(FailoverTestStarted {
            previous_primary_node_id,
        }),
    ))
}

// ============================================================================
// Bindings
// ============================================================================

async fn bind(
    State(state): State<AppState>,
    Path((id, binding_id)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Credentials>), AppError> {
    let credentials = state.provider.generate_credentials(&id, &binding_id).await?;
    Ok((StatusCode::CREATED, Json(credentials)))
}

async fn unbind(
    State(state): State<AppState>,
    Path((id, binding_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.provider.revoke_credentials(&id, &binding_id).await?;
    Ok(Json(serde_json::json!({})))
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug)]
enum AppError {
    BadRequest(String),
    NotFound(String),
    Gone(String),
    Conflict(String),
    Unavailable(String),
    Timeout(String),
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        match &err {
            Error::InvalidParameters { .. } => AppError::BadRequest(message),
            Error::AmbiguousTopology { .. } => AppError::Conflict(message),
            Error::DeadlineExceeded { .. } => AppError::Timeout(message),
            Error::CredentialsUnavailable { .. } => AppError::Unavailable(message),
            Error::ControlPlane { source, .. } => match source {
                ControlPlaneError::NotFound(_) => AppError::NotFound(message),
                ControlPlaneError::AlreadyExists(_) | ControlPlaneError::InvalidState(_) => {
                    AppError::Conflict(message)
                }
                ControlPlaneError::Api(_) => AppError::Unavailable(message),
            },
            Error::SecretStore { source, .. } => match source {
                SecretStoreError::NotFound(_) => AppError::NotFound(message),
                SecretStoreError::MarkedForDeletion(_) => AppError::Gone(message),
                SecretStoreError::AlreadyExists(_) => AppError::Conflict(message),
                SecretStoreError::Backend(_) => AppError::Unavailable(message),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Gone(msg) => (StatusCode::GONE, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Timeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg),
        };

        if status.is_server_error() {
            tracing::warn!(status = %status, "Request failed: {}", message);
        }

        let body = Json(serde_json::json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use cachebroker_engine::memory::{InMemoryControlPlane, InMemorySecretStore};
    use cachebroker_engine::ProviderConfig;
    use tower::ServiceExt;

    fn app() -> Router {
        let provider = CacheProvider::new(
            Arc::new(InMemoryControlPlane::new(0)),
            Arc::new(InMemorySecretStore::new()),
            ProviderConfig::default(),
        );
        create_router(AppState {
            provider: Arc::new(provider),
        })
    }

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => request
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = send(&app(), Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_provision_poll_bind_deprovision() {
        let app = app();

        let (status, body) =
            send(&app, Method::PUT, "/v1/instances/abc", Some(serde_json::json!({}))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["operation"], "provision");

        let (status, body) =
            send(&app, Method::GET, "/v1/instances/abc/last_operation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "available");
        assert_eq!(body["progress"], "succeeded");

        let (status, body) = send(&app, Method::PUT, "/v1/instances/abc/bindings/b1", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["password"].as_str().map(str::len), Some(32));

        let (status, _) = send(&app, Method::DELETE, "/v1/instances/abc/bindings/b1", None).await;
        assert_eq!(status, StatusCode::OK);

        let uri = "/v1/instances/abc?final_snapshot_name=last";
        let (status, body) = send(&app, Method::DELETE, uri, None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["operation"], "deprovision");

        let (status, body) = send(
            &app,
            Method::GET,
            "/v1/instances/abc/last_operation?operation=deprovision",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "non-existing");
        assert_eq!(body["progress"], "succeeded");
    }

    #[tokio::test]
    async fn test_failover_test_flow() {
        let app = app();
        send(&app, Method::PUT, "/v1/instances/abc", Some(serde_json::json!({}))).await;

        let (status, body) =
            send(&app, Method::POST, "/v1/instances/abc/failover_test", None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let previous = body["previous_primary_node_id"].as_str().unwrap().to_string();

        let uri = format!(
            "/v1/instances/abc/last_operation?operation=failover-test&previous_primary={}",
            previous
        );
        let (_, first) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(first["state"], "modifying");
        let (_, second) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(second["state"], "modifying");
        let (_, third) = send(&app, Method::GET, &uri, None).await;
        assert_eq!(third["state"], "available");
        assert_eq!(third["progress"], "succeeded");
    }

    #[tokio::test]
    async fn test_invalid_parameters_are_bad_request() {
        let (status, body) = send(
            &app(),
            Method::PUT,
            "/v1/instances/abc",
            Some(serde_json::json!({ "parameters": { "cluster-enabled": "yes" } })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("cluster-enabled"));
    }

    #[tokio::test]
    async fn test_missing_instance() {
        let app = app();
        let (status, _) = send(&app, Method::GET, "/v1/instances/gone/parameters", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::PUT, "/v1/instances/gone/bindings/b1", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let (status, body) =
            send(&app, Method::GET, "/v1/instances/gone/last_operation", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "non-existing");
        assert_eq!(body["progress"], "in-progress");
    }
}
