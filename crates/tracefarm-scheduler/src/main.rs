use axum::Router;
use clap::Parser;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracefarm_persistence::SceneStore;
use tracefarm_scheduler::api::{create_router, AppState};
use tracefarm_scheduler::metrics::SchedulerMetrics;
use tracefarm_scheduler::{tcp, Dispatcher, PngFinalizer, ServerConfig};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tf-scheduler")]
#[command(about = "Distributed scene rendering scheduler", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Bind host
    #[arg(long)]
    host: Option<String>,

    /// REST API and WebSocket port
    #[arg(long)]
    http_port: Option<u16>,

    /// Native worker port
    #[arg(long)]
    worker_port: Option<u16>,

    /// Pixels per unit of work
    #[arg(long)]
    chunk_size: Option<u32>,

    /// Seconds before an unreturned unit is handed out again
    #[arg(long)]
    tolerance_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_missing = !std::path::Path::new(&args.config).exists();
    let mut config = if config_missing {
        ServerConfig::default()
    } else {
        ServerConfig::from_file(&args.config)?
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.http_port {
        config.server.http_port = port;
    }
    if let Some(port) = args.worker_port {
        config.server.worker_port = Some(port);
    }
    if let Some(chunk_size) = args.chunk_size {
        config.scheduling.chunk_size = chunk_size;
    }
    if let Some(tolerance) = args.tolerance_secs {
        config.scheduling.tolerance_secs = tolerance;
    }
    config.validate()?;

    // Initialize tracing
    let default_filter = config.monitoring.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if config_missing {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }
    tracing::info!("Starting scheduler with config: {:?}", config);

    let store = Arc::new(SceneStore::open(config.to_scene_store_config())?);
    let metrics = Arc::new(SchedulerMetrics::new()?);
    let finalizer = Arc::new(PngFinalizer::new(config.output.image_dir.clone(), store.clone()));
    let dispatcher = Arc::new(Dispatcher::new(
        config.scheduling,
        store.clone(),
        finalizer,
        metrics.clone(),
    ));

    dispatcher.recover()?;

    let shutdown = CancellationToken::new();

    // Start native worker endpoint
    if let Some(worker_port) = config.server.worker_port {
        let addr = format!("{}:{}", config.server.host, worker_port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        tokio::spawn(tcp::serve(listener, dispatcher.clone(), shutdown.clone()));
    }

    // Start metrics server
    let metrics_port = config.monitoring.prometheus_port;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics, metrics_port).await {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    // Serve REST API and worker WebSocket until ctrl-c
    let state = AppState {
        dispatcher: dispatcher.clone(),
        store,
    };
    let app = create_router(state, &config.output.image_dir);
    let addr = format!("{}:{}", config.server.host, config.server.http_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HTTP API listening on {}", addr);

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for ctrl-c: {}", e);
            }
            tracing::info!("Shutdown requested");
            stop.cancel();
        })
        .await?;

    shutdown.cancel();
    dispatcher.shutdown(config.server.shutdown_timeout()).await;
    Ok(())
}

async fn start_metrics_server(metrics: Arc<SchedulerMetrics>, port: u16) -> anyhow::Result<()> {
    use axum::{extract::State, http::StatusCode, routing::get};

    async fn metrics_handler(
        State(metrics): State<Arc<SchedulerMetrics>>,
    ) -> Result<String, (StatusCode, String)> {
        let encoder = TextEncoder::new();
        let metric_families = metrics.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("0.0.0.0:{}", port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
