use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{Request, Response, StatusCode};
use axum::routing::{get, post};
use opentelemetry::KeyValue;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::Semaphore;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
    trace::{MakeSpan, OnResponse, TraceLayer},
};
use tracing::Span;

mod config;
mod cost;
mod error;
mod llm;
mod model;
mod pipeline;
mod profiler;
mod render;
mod routes;
mod storage;
mod telemetry;

use config::Config;
use cost::{CostRates, CostTracker};
use pipeline::{ActivityOptions, PipelineClient, PipelineDeps, PipelineOptions, RetryPolicy};
use render::charts::SvgChartRenderer;
use render::export::{DocxExporter, HtmlExporter, PdfExporter};
use render::{ChartRenderer, DocumentRenderer};
use storage::Storage;
use telemetry::{HTTP_REQUEST_DURATION, HTTP_REQUESTS_TOTAL, init_telemetry};

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub storage: Arc<dyn Storage>,
    pub pipeline: Arc<PipelineClient>,
    pub cost: Arc<CostTracker>,
}

#[derive(Clone)]
struct HttpMakeSpan;

impl<B> MakeSpan<B> for HttpMakeSpan {
    fn make_span(&mut self, request: &Request<B>) -> Span {
        let method = request.method().as_str();
        let path = request.uri().path();

        tracing::info_span!(
            "HTTP request",
            otel.name = %format!("{} {}", method, path),
            http.method = %method,
            http.route = %path,
            http.target = %request.uri(),
            http.scheme = "http",
            http.flavor = ?request.version(),
            http.user_agent = request.headers()
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or(""),
            http.response.status_code = tracing::field::Empty,
            otel.status_code = tracing::field::Empty,
        )
    }
}

#[derive(Clone)]
struct HttpOnResponse;

impl<B> OnResponse<B> for HttpOnResponse {
    fn on_response(self, response: &Response<B>, latency: Duration, span: &Span) {
        let status = response.status().as_u16();

        span.record("http.response.status_code", status as i64);

        if status >= 500 {
            span.record("otel.status_code", "ERROR");
        } else {
            span.record("otel.status_code", "OK");
        }

        let latency_ms = latency.as_secs_f64() * 1000.0;
        let status_class = format!("{}xx", status / 100);

        HTTP_REQUESTS_TOTAL.add(
            1,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class.clone()),
            ],
        );

        HTTP_REQUEST_DURATION.record(
            latency_ms,
            &[
                KeyValue::new("http.status_code", status.to_string()),
                KeyValue::new("http.status_class", status_class),
            ],
        );

        tracing::info!(
            http.response.status_code = status,
            latency_ms = latency_ms,
            "finished processing request"
        );
    }
}

async fn build_storage(config: &Config) -> anyhow::Result<Arc<dyn Storage>> {
    match config.storage_backend.as_str() {
        "memory" => Ok(Arc::new(storage::memory::MemoryStorage::new())),
        "postgres" => {
            let url = config
                .database_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL required for postgres storage"))?;
            let pool = storage::postgres::create_pool(url).await?;
            let pg = storage::postgres::PgStorage::new(pool);
            pg.ensure_schema().await?;
            Ok(Arc::new(pg))
        }
        _ => Ok(Arc::new(
            storage::local::LocalStorage::new(&config.data_dir).await?,
        )),
    }
}

fn build_provider(name: &str, config: &Config) -> Option<Arc<dyn llm::Provider>> {
    match name {
        "anthropic" => Some(Arc::new(llm::anthropic::AnthropicProvider::new(
            config.anthropic_api_key.as_deref().unwrap_or(""),
        ))),
        "openai" => Some(Arc::new(llm::openai::OpenAIProvider::new(
            config.openai_api_key.as_deref().unwrap_or(""),
        ))),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env();

    let telemetry_guard = init_telemetry(&config)?;

    tracing::info!(
        port = config.port,
        environment = %config.environment,
        storage = %config.storage_backend,
        "Starting report-pipeline"
    );

    let storage = build_storage(&config).await?;

    let primary = build_provider(&config.llm_provider, &config)
        .ok_or_else(|| anyhow::anyhow!("unknown LLM provider {}", config.llm_provider))?;
    let fallback = build_provider(&config.fallback_provider, &config);

    tracing::info!(
        primary_provider = %config.llm_provider,
        fallback_provider = %config.fallback_provider,
        "LLM client initialized"
    );

    let llm_client = Arc::new(llm::LlmClient {
        primary,
        fallback,
        model: config.llm_model.clone(),
        fallback_model: config.fallback_model.clone(),
    });

    let cost = Arc::new(CostTracker::new(
        storage.clone(),
        CostRates {
            input_per_1k: config.cost_rate_input_per_1k,
            output_per_1k: config.cost_rate_output_per_1k,
            per_image: config.cost_rate_per_image,
        },
    ));

    let chart_renderer: Arc<dyn ChartRenderer> = Arc::new(SvgChartRenderer);
    let exporters: Vec<Arc<dyn DocumentRenderer>> = vec![
        Arc::new(HtmlExporter),
        Arc::new(PdfExporter),
        Arc::new(DocxExporter),
    ];

    let deps = Arc::new(PipelineDeps {
        storage: storage.clone(),
        generator: llm_client,
        chart_renderer,
        exporters,
        cost: cost.clone(),
        activity_slots: Arc::new(Semaphore::new(config.max_concurrent_activities)),
        options: PipelineOptions {
            activity: ActivityOptions {
                retry: RetryPolicy::default(),
                timeout: config.activity_timeout,
                heartbeat_interval: config.heartbeat_interval,
                heartbeat_grace: config.heartbeat_grace,
            },
            generate_cover_image: config.generate_cover_image,
        },
    });
    let pipeline = Arc::new(PipelineClient::new(deps, config.max_concurrent_workflows));

    let state = AppState {
        config: config.clone(),
        storage,
        pipeline,
        cost,
    };

    let app = Router::new()
        .route("/api/health", get(routes::health::health))
        .route("/api/reports", post(routes::reports::create_report))
        .route("/api/reports", get(routes::reports::list_reports))
        .route("/api/reports/{id}", get(routes::reports::get_report))
        .route("/api/reports/{id}/usage", get(routes::usage::report_usage))
        .route(
            "/api/workflows/{id}/status",
            get(routes::workflows::workflow_status),
        )
        .route(
            "/api/workflows/{id}/cancel",
            post(routes::workflows::cancel_workflow),
        )
        .route(
            "/api/workflows/{id}/resume",
            post(routes::workflows::resume_workflow),
        )
        .route("/api/usage", get(routes::usage::usage_summary))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(HttpMakeSpan)
                .on_response(HttpOnResponse),
        )
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            Duration::from_secs(300),
        ))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!(%addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");
    telemetry_guard.shutdown();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
