mod catalog;
mod classifier;
mod http;
mod jobs;
mod metrics;
mod models;
mod pipeline;
mod security;
mod store;
#[cfg(test)]
mod test_support;
mod validator;

use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, Extension, Path, State},
    http::{HeaderMap, StatusCode, header},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use eyre::WrapErr;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use models::{ApiError, RunReport};
use pipeline::{Pipeline, PipelineError, PipelineErrorKind};
use security::{AuthContext, AuthState, require_api_auth};
use serde::Serialize;
use serde_json::json;
use std::{net::SocketAddr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!(target = "normalizer.api", "server crashed: {err:?}");
        std::process::exit(1);
    }
}

async fn run() -> eyre::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let pipeline = Pipeline::from_env().wrap_err("pipeline configuration")?;
    let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
    if let Some(period) = jobs::schedule_from_env() {
        info!(
            target = "normalizer.jobs",
            every_secs = period.as_secs(),
            "scheduled normalization enabled"
        );
        queue.spawn_schedule(period);
    }
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .wrap_err("installing prometheus recorder")?;

    let state = AppState {
        pipeline,
        queue,
        openapi: Arc::new(load_openapi()),
        prometheus_handle,
        metrics_key: std::env::var("METRICS_KEY").ok(),
    };

    let cors = CorsLayer::new()
        .allow_headers(Any)
        .allow_methods(Any)
        .allow_origin(Any);
    let app = app(state, AuthState::from_env())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(64 * 1024));

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(8000);
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    info!(target = "normalizer.api", "listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("binding {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    pipeline: Pipeline,
    queue: jobs::JobQueue,
    openapi: Arc<serde_json::Value>,
    prometheus_handle: PrometheusHandle,
    metrics_key: Option<String>,
}

fn app(state: AppState, auth: AuthState) -> Router {
    let protected = Router::new()
        .route("/normalize", post(normalize))
        .nest(
            "/jobs",
            Router::new()
                .route("/normalize", post(enqueue_normalize))
                .route("/{id}", get(get_job_status)),
        )
        .route_layer(middleware::from_fn_with_state(auth, require_api_auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/openapi.json", get(openapi_json))
        .merge(protected)
        .with_state(state)
}

fn load_openapi() -> serde_json::Value {
    serde_yaml::from_str(include_str!("../docs/openapi.yaml"))
        .unwrap_or(json!({"openapi": "3.0.3"}))
}

/// Liveness check.
///
/// - Method: `GET`
/// - Path: `/health`
/// - Auth: none
async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "service": "catalog-normalizer",
    }))
}

async fn openapi_json(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json((*state.openapi).clone())
}

async fn metrics_endpoint(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Some(secret) = &state.metrics_key {
        let presented = headers
            .get("X-Metrics-Key")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if presented != secret {
            return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
        }
    }
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.prometheus_handle.render(),
    )
        .into_response()
}

/// Run one normalization batch and wait for it.
///
/// - Method: `POST`
/// - Path: `/normalize`
/// - Auth: `Authorization: Bearer <key>` or `X-Normalizer-Key: <key>`
/// - Response: `RunReport`, or HTTP 500 `{"fatal_error": ...}` when the
///   batch cannot be selected
async fn normalize(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<Json<RunReport>, AppError> {
    crate::metrics::inc_requests("/normalize");
    info!(
        target = "normalizer.api",
        caller = %context.caller,
        key_id = %context.key_id,
        "normalization triggered",
    );
    let report = state.pipeline.run().await?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    job_id: String,
}

async fn enqueue_normalize(
    State(state): State<AppState>,
    Extension(context): Extension<AuthContext>,
) -> Result<(StatusCode, Json<EnqueueResponse>), AppError> {
    crate::metrics::inc_requests("/jobs/normalize");
    let id = state
        .queue
        .enqueue_run(format!("api:{}", context.caller))
        .await
        .map_err(AppError::Queue)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id: id.to_string(),
        }),
    ))
}

async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<jobs::JobInfo>, AppError> {
    crate::metrics::inc_requests("/jobs/{id}");
    let Ok(uuid) = uuid::Uuid::parse_str(&id) else {
        return Err(AppError::Pipeline(PipelineError::invalid_input(
            "jobs",
            "invalid_job_id",
        )));
    };
    state
        .queue
        .get(uuid)
        .await
        .map(Json)
        .ok_or(AppError::NotFound("job_not_found"))
}

#[derive(Debug)]
enum AppError {
    Pipeline(PipelineError),
    Queue(ApiError),
    NotFound(&'static str),
}

impl From<PipelineError> for AppError {
    fn from(value: PipelineError) -> Self {
        Self::Pipeline(value)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Pipeline(err) if err.stage() == "select_batch" => {
                error!(target = "normalizer.api", error = %err, "batch selection failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "fatal_error": err.detail() })),
                )
                    .into_response()
            }
            AppError::Pipeline(err) => {
                let status = match err.kind() {
                    PipelineErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
                    PipelineErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let payload = ApiError {
                    error: err.stage().to_string(),
                    detail: Some(err.detail().to_string()),
                };
                (status, Json(payload)).into_response()
            }
            AppError::Queue(payload) => (StatusCode::SERVICE_UNAVAILABLE, Json(payload)).into_response(),
            AppError::NotFound(code) => (
                StatusCode::NOT_FOUND,
                Json(ApiError {
                    error: code.to_string(),
                    detail: None,
                }),
            )
                .into_response(),
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineConfig;
    use crate::test_support::{FlakyStore, Reply, ScriptedClassifier, listing};
    use crate::validator::OutputValidator;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    const KEY: &str = "secret-1";

    fn test_app(store: FlakyStore, metrics_key: Option<&str>) -> Router {
        let classifier = ScriptedClassifier::default().on("junk", Reply::NotAProduct);
        let pipeline = Pipeline::new(
            PipelineConfig::default(),
            Arc::new(store),
            Arc::new(classifier),
            OutputValidator::default(),
        );
        let (queue, _worker) = jobs::JobQueue::spawn(pipeline.clone());
        let state = AppState {
            pipeline,
            queue,
            openapi: Arc::new(load_openapi()),
            prometheus_handle: PrometheusBuilder::new().build_recorder().handle(),
            metrics_key: metrics_key.map(str::to_string),
        };
        app(state, AuthState::from_pairs(&format!("tests:{KEY}")))
    }

    fn authed(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("X-Normalizer-Key", KEY)
            .body(Body::empty())
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let response = test_app(FlakyStore::default(), None)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn normalize_requires_key() {
        let response = test_app(FlakyStore::default(), None)
            .oneshot(Request::post("/normalize").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "missing_api_key");
    }

    #[tokio::test]
    async fn normalize_reports_idle_queue() {
        let response = test_app(FlakyStore::default(), None)
            .oneshot(authed("POST", "/normalize"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["idle"], true);
    }

    #[tokio::test]
    async fn normalize_returns_item_details() {
        let store = FlakyStore::with_listings(vec![listing(1, "P", None, "junk")]);
        let response = test_app(store, None)
            .oneshot(authed("POST", "/normalize"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["processed_count"], 1);
        assert_eq!(body["details"][0]["status"], "processed");
        assert_eq!(body["details"][0]["resolution"], "not_a_product");
    }

    #[tokio::test]
    async fn selection_failure_is_fatal_500() {
        let response = test_app(FlakyStore::default().failing_select(), None)
            .oneshot(authed("POST", "/normalize"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert!(
            body["fatal_error"]
                .as_str()
                .unwrap()
                .contains("connection refused")
        );
    }

    #[tokio::test]
    async fn job_lifecycle_endpoints() {
        let app = test_app(FlakyStore::default(), None);
        let response = app
            .clone()
            .oneshot(authed("POST", "/jobs/normalize"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let job_id = json_body(response).await["job_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(authed("GET", &format!("/jobs/{job_id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["id"], job_id.as_str());

        let response = app
            .clone()
            .oneshot(authed("GET", "/jobs/not-a-uuid"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(authed("GET", &format!("/jobs/{}", uuid::Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn metrics_key_is_enforced() {
        let app = test_app(FlakyStore::default(), Some("m-key"));
        let response = app
            .clone()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/metrics")
                    .header("X-Metrics-Key", "m-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn openapi_lists_routes() {
        let response = test_app(FlakyStore::default(), None)
            .oneshot(Request::get("/openapi.json").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert!(body["paths"].get("/normalize").is_some());
        assert!(body["paths"].get("/jobs/{id}").is_some());
    }
}
