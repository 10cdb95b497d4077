use crate::collectors::classify::CategoryTable;
use crate::collectors::disk::{collect_disk, MountProbe};
use crate::collectors::process::collect_processes;
use crate::collectors::services::{
    categorize_services, critical_services, list_services, Listing, ServiceManager,
};
use crate::collectors::system::{collect_cpu, collect_memory, collect_overview, educational_context};
use crate::collectors::{now, CollectionError};
use crate::config::Config;
use crate::metrics::Metrics;
use axum::body::Body;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{header::CONTENT_TYPE, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::{task, time};
use tracing::warn;

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<Config>,
    pub metrics: Arc<Metrics>,
    pub services: Arc<dyn ServiceManager>,
    pub mounts: Arc<dyn MountProbe>,
    pub categories: Arc<CategoryTable>,
}

impl AppContext {
    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_secs)
    }
}

#[derive(Serialize)]
struct Envelope<T> {
    success: bool,
    data: T,
    educational_note: &'static str,
}

fn success<T: Serialize>(data: T, educational_note: &'static str) -> Response {
    Json(Envelope {
        success: true,
        data,
        educational_note,
    })
    .into_response()
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    cause: String,
    message: &'static str,
}

impl ApiError {
    fn collection(cause: String, message: &'static str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            cause,
            message,
        }
    }

    fn bad_request(cause: String, message: &'static str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            cause,
            message,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.cause,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

async fn run_bounded<T, Fut>(
    metrics: &Metrics,
    collector: &'static str,
    limit: Duration,
    work: Fut,
) -> Result<T, String>
where
    Fut: Future<Output = Result<T, String>>,
{
    let start = Instant::now();
    let outcome = match time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_elapsed) => Err(format!(
            "collection timed out after {}s",
            limit.as_secs_f64()
        )),
    };
    metrics.observe_duration(collector, start.elapsed());

    if let Err(cause) = &outcome {
        metrics.inc_collect_error(collector);
        warn!(
            collector,
            elapsed_ms = start.elapsed().as_millis() as u64,
            error = %cause,
            "collection failed"
        );
    }
    outcome
}

async fn run_blocking<T, F>(
    metrics: &Metrics,
    collector: &'static str,
    limit: Duration,
    job: F,
) -> Result<T, String>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CollectionError> + Send + 'static,
{
    let work = async move {
        match task::spawn_blocking(job).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(err.to_string()),
            Err(join_err) => {
                warn!(collector, error = %join_err, "collector task aborted");
                Err("collector task failed".to_string())
            }
        }
    };
    run_bounded(metrics, collector, limit, work).await
}

async fn collect<T, F>(
    ctx: &AppContext,
    collector: &'static str,
    message: &'static str,
    job: F,
) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, CollectionError> + Send + 'static,
{
    ctx.metrics.inc_request(collector);
    run_blocking(&ctx.metrics, collector, ctx.request_timeout(), job)
        .await
        .map_err(|cause| ApiError::collection(cause, message))
}

async fn query_services<T, Fut>(
    ctx: &AppContext,
    collector: &'static str,
    message: &'static str,
    work: Fut,
) -> Result<T, ApiError>
where
    Fut: Future<Output = T>,
{
    ctx.metrics.inc_request(collector);
    run_bounded(&ctx.metrics, collector, ctx.request_timeout(), async {
        Ok(work.await)
    })
    .await
    .map_err(|cause| ApiError::collection(cause, message))
}

fn note_degraded<T>(ctx: &AppContext, collector: &'static str, listing: &Listing<T>) {
    if listing.cause().is_some() {
        ctx.metrics.inc_collect_error(collector);
    }
}

pub fn build_router(ctx: AppContext) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(home))
        .route("/api", get(api_docs))
        .route("/api/cpu", get(cpu_handler))
        .route("/api/memory", get(memory_handler))
        .route("/api/disk", get(disk_handler))
        .route("/api/processes", get(processes_handler))
        .route("/api/overview", get(overview_handler))
        .route("/api/education", get(education_handler))
        .route("/api/services", get(services_handler))
        .route("/api/services/categories", get(categories_handler))
        .route("/api/services/critical", get(critical_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(ctx)
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "homelabd",
        "timestamp": now(),
    }))
}

async fn home() -> impl IntoResponse {
    Json(json!({
        "message": "Welcome to homelabd",
        "description": "homelab monitoring system",
        "status": "running",
        "endpoints": {
            "health": "/health",
            "home": "/",
            "api_docs": "/api",
            "metrics": "/metrics",
        },
    }))
}

const ENDPOINTS: &[(&str, &str)] = &[
    ("/", "Home page"),
    ("/health", "Health check"),
    ("/api", "API documentation"),
    ("/api/cpu", "CPU information and usage"),
    ("/api/memory", "Memory usage information"),
    ("/api/disk", "Disk usage information"),
    ("/api/processes", "Top processes information (?limit=N)"),
    ("/api/overview", "Complete system overview"),
    ("/api/education", "Educational context for monitoring"),
    ("/api/services", "systemd services grouped by state"),
    ("/api/services/categories", "Active services grouped by category"),
    ("/api/services/critical", "Status of critical system services"),
    ("/metrics", "Prometheus self-metrics"),
];

async fn api_docs() -> impl IntoResponse {
    let endpoints: Vec<_> = ENDPOINTS
        .iter()
        .map(|(path, description)| json!({"path": path, "method": "GET", "description": description}))
        .collect();
    Json(json!({
        "name": "homelabd API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "homelab monitoring system",
        "endpoints": endpoints,
    }))
}

async fn cpu_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let sampling = ctx.config.sampling.clone();
    let snapshot = collect(&ctx, "cpu", "Failed to retrieve CPU information", move || {
        collect_cpu(&sampling)
    })
    .await?;
    ctx.metrics.observe_cpu(snapshot.usage_percent);
    Ok(success(
        snapshot,
        "CPU usage shows processor activity. High sustained usage may indicate system stress.",
    ))
}

async fn memory_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let snapshot = collect(
        &ctx,
        "memory",
        "Failed to retrieve memory information",
        collect_memory,
    )
    .await?;
    ctx.metrics.observe_memory(snapshot.usage_percent);
    Ok(success(
        snapshot,
        "Memory usage shows RAM consumption. High usage forces system to use slower disk swap.",
    ))
}

async fn disk_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let mounts = ctx.mounts.clone();
    let snapshot = collect(&ctx, "disk", "Failed to retrieve disk information", move || {
        collect_disk(mounts.as_ref())
    })
    .await?;
    ctx.metrics.observe_disk(&snapshot);
    Ok(success(
        snapshot,
        "Disk usage monitoring prevents system failures from full storage devices.",
    ))
}

#[derive(Debug, Deserialize)]
struct ProcessQuery {
    limit: Option<usize>,
}

async fn processes_handler(
    State(ctx): State<AppContext>,
    query: Result<Query<ProcessQuery>, QueryRejection>,
) -> Result<Response, ApiError> {
    let Query(query) = query.map_err(|rejection| {
        ApiError::bad_request(
            rejection.body_text(),
            "limit must be a non-negative integer",
        )
    })?;
    let limits = &ctx.config.processes;
    let limit = query
        .limit
        .unwrap_or(limits.default_limit)
        .clamp(1, limits.max_limit);
    let sampling = ctx.config.sampling.clone();
    let snapshot = collect(
        &ctx,
        "processes",
        "Failed to retrieve process information",
        move || Ok(collect_processes(&sampling, limit)),
    )
    .await?;
    Ok(success(
        snapshot,
        "Process monitoring helps identify what's using system resources and troubleshoot performance issues.",
    ))
}

async fn overview_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let sampling = ctx.config.sampling.clone();
    let limit = ctx.config.processes.overview_limit;
    let mounts = ctx.mounts.clone();
    let overview = collect(
        &ctx,
        "overview",
        "Failed to retrieve system overview",
        move || collect_overview(&sampling, limit, mounts.as_ref()),
    )
    .await?;
    ctx.metrics.observe_cpu(overview.cpu.usage_percent);
    ctx.metrics.observe_memory(overview.memory.usage_percent);
    ctx.metrics.observe_disk(&overview.disk);
    Ok(success(
        overview,
        "System overview provides holistic view of homelab health for comprehensive monitoring.",
    ))
}

async fn education_handler(State(ctx): State<AppContext>) -> Response {
    ctx.metrics.inc_request("education");
    success(
        educational_context(),
        "Educational explanations for system monitoring concepts",
    )
}

async fn services_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let listing = query_services(
        &ctx,
        "services",
        "Failed to retrieve systemd services",
        list_services(ctx.services.as_ref(), &ctx.categories),
    )
    .await?;
    note_degraded(&ctx, "services", &listing);
    ctx.metrics.observe_services(&listing.value().summary);
    Ok(success(
        listing,
        "Services are background programs managed by systemd. Failed services may need attention.",
    ))
}

async fn categories_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let listing = query_services(
        &ctx,
        "service_categories",
        "Failed to categorize systemd services",
        categorize_services(ctx.services.as_ref(), &ctx.categories),
    )
    .await?;
    note_degraded(&ctx, "service_categories", &listing);
    Ok(success(
        listing,
        "Grouping services by purpose shows which parts of the system each one supports.",
    ))
}

async fn critical_handler(State(ctx): State<AppContext>) -> Result<Response, ApiError> {
    let report = query_services(
        &ctx,
        "critical_services",
        "Failed to retrieve critical service status",
        critical_services(ctx.services.as_ref()),
    )
    .await?;
    Ok(success(
        report,
        "Critical services keep networking, display and user sessions working. Check these first when troubleshooting.",
    ))
}

async fn metrics_handler(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode_metrics() {
        Ok(encoded) => {
            let mut response = Response::new(Body::from(encoded));
            response.headers_mut().insert(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            );
            response
        }
        Err(err) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("failed to encode metrics: {err}"),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::disk::tests::root_and_tmp;
    use crate::collectors::services::tests::{sample_units, FakeManager};
    use crate::config::{ProcessConfig, SamplingConfig, ServicesConfig};
    use axum::body::to_bytes;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn context(manager: FakeManager) -> AppContext {
        let config = Config {
            listen: "127.0.0.1:0".to_string(),
            sampling: SamplingConfig {
                cpu_window_ms: 20,
                per_core_window_ms: 10,
                process_window_ms: 10,
            },
            processes: ProcessConfig {
                default_limit: 3,
                overview_limit: 2,
                max_limit: 4,
            },
            services: ServicesConfig::default(),
            request_timeout_secs: 30,
        };
        AppContext {
            config: Arc::new(config),
            metrics: Metrics::new().expect("metrics"),
            services: Arc::new(manager),
            mounts: Arc::new(root_and_tmp()),
            categories: Arc::new(CategoryTable::builtin()),
        }
    }

    fn healthy_manager() -> FakeManager {
        FakeManager {
            units: Some(sample_units()),
            states: vec![
                ("NetworkManager.service", "active"),
                ("gdm.service", "inactive"),
            ],
        }
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn health_is_independent_of_collectors() {
        let app = build_router(context(FakeManager::default()));
        let (status, body) = get_json(app, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["service"], "homelabd");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn api_docs_list_every_route() {
        let app = build_router(context(FakeManager::default()));
        let (status, body) = get_json(app, "/api").await;
        assert_eq!(status, StatusCode::OK);
        let paths: Vec<&str> = body["endpoints"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["path"].as_str())
            .collect();
        assert!(paths.contains(&"/api/services/critical"));
        assert_eq!(paths.len(), ENDPOINTS.len());
    }

    #[tokio::test]
    async fn disk_reports_inaccessible_mount_inline() {
        let app = build_router(context(FakeManager::default()));
        let (status, body) = get_json(app, "/api/disk").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["educational_note"].is_string());
        let partitions = &body["data"]["partitions"];
        assert_eq!(partitions["/"]["status"], "Critical");
        assert_eq!(partitions["/tmp"]["error"], "Permission denied");
    }

    #[tokio::test]
    async fn process_limit_is_clamped_to_configured_max() {
        let app = build_router(context(FakeManager::default()));
        let (status, body) = get_json(app, "/api/processes?limit=1000").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"]["top_cpu"].as_array().unwrap().len() <= 4);
        assert!(body["data"]["top_memory"].as_array().unwrap().len() <= 4);
    }

    #[tokio::test]
    async fn degraded_service_listing_is_still_success() {
        let ctx = context(FakeManager::default());
        let metrics = ctx.metrics.clone();
        let app = build_router(ctx);
        let (status, body) = get_json(app, "/api/services").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(body["data"]["error"]
            .as_str()
            .unwrap()
            .starts_with("Failed to get systemd services"));
        assert_eq!(body["data"]["summary"]["total_services"], 0);

        let text = String::from_utf8(metrics.encode_metrics().unwrap()).unwrap();
        assert!(text.contains("homelab_collect_errors_total{collector=\"services\"} 1"));
    }

    #[tokio::test]
    async fn services_are_bucketed_and_counted() {
        let app = build_router(context(healthy_manager()));
        let (status, body) = get_json(app, "/api/services").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].get("error").is_none());
        assert_eq!(body["data"]["summary"]["total_services"], 6);
        assert_eq!(body["data"]["services"]["failed"][0]["name"], "cups.service");
    }

    #[tokio::test]
    async fn categories_contain_only_active_units() {
        let app = build_router(context(healthy_manager()));
        let (status, body) = get_json(app, "/api/services/categories").await;
        assert_eq!(status, StatusCode::OK);
        let network = body["data"]["categories"]["Network Services"].as_array().unwrap();
        assert_eq!(network.len(), 1);
        assert_eq!(network[0]["name"], "NetworkManager.service");
        assert!(body["data"]["category_descriptions"]["Other"].is_string());
    }

    #[tokio::test]
    async fn critical_services_always_lists_every_entry() {
        let app = build_router(context(healthy_manager()));
        let (status, body) = get_json(app, "/api/services/critical").await;
        assert_eq!(status, StatusCode::OK);
        let services = body["data"]["critical_services"].as_object().unwrap();
        assert_eq!(services.len(), 8);
        assert_eq!(services["NetworkManager.service"]["status"], "active");
        assert_eq!(services["gdm.service"]["status"], "inactive");
        assert_eq!(services["systemd-logind.service"]["status"], "unknown");
        assert_eq!(services["systemd-logind.service"]["is_critical"], true);
    }

    #[tokio::test]
    async fn collection_errors_map_to_500_envelope() {
        let err = ApiError::collection(
            "memory query failed: no data".to_string(),
            "Failed to retrieve memory information",
        );
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "memory query failed: no data");
        assert_eq!(body["message"], "Failed to retrieve memory information");
    }

    #[tokio::test]
    async fn malformed_limit_gets_json_error() {
        for uri in ["/api/processes?limit=abc", "/api/processes?limit=-1"] {
            let app = build_router(context(FakeManager::default()));
            let (status, body) = get_json(app, uri).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["success"], false);
            assert!(body["error"]
                .as_str()
                .unwrap()
                .starts_with("Failed to deserialize query string"));
            assert_eq!(body["message"], "limit must be a non-negative integer");
        }
    }

    #[tokio::test]
    async fn slow_service_query_times_out() {
        let mut ctx = context(FakeManager::default());
        let mut config = (*ctx.config).clone();
        config.request_timeout_secs = 1;
        ctx.config = Arc::new(config);
        let err = query_services(&ctx, "services", "Failed to retrieve systemd services", async {
            time::sleep(Duration::from_secs(3)).await;
        })
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(err.cause.starts_with("collection timed out after 1s"));
    }

    #[tokio::test]
    async fn slow_collector_times_out() {
        let metrics = Metrics::new().expect("metrics");
        let outcome: Result<(), String> =
            run_blocking(&metrics, "slow", Duration::from_millis(20), || {
                std::thread::sleep(Duration::from_millis(300));
                Ok(())
            })
            .await;
        let cause = outcome.unwrap_err();
        assert!(cause.starts_with("collection timed out after"));
    }

    #[tokio::test]
    async fn panicking_collector_is_contained() {
        let metrics = Metrics::new().expect("metrics");
        let outcome: Result<(), String> =
            run_blocking(&metrics, "broken", Duration::from_secs(5), || {
                panic!("collector bug")
            })
            .await;
        assert_eq!(outcome.unwrap_err(), "collector task failed");
    }

    #[tokio::test]
    async fn metrics_endpoint_counts_requests() {
        let ctx = context(FakeManager::default());
        let app = build_router(ctx.clone());
        let _ = get_json(app.clone(), "/api/disk").await;
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("homelab_requests_total{endpoint=\"disk\"} 1"));
        assert!(text.contains("homelab_disk_usage_percent{mount=\"/\"} 96"));
        assert!(text.contains("homelab_uptime_seconds"));
    }
}
