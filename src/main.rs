use anyhow::{Context, Result};
use clap::Parser;
use sensor_ingest::cli::Args;
use sensor_ingest::config::{Config, LogFormat};
use sensor_ingest::db::{self, MySqlStore};
use sensor_ingest::http::{self, HttpState};
use sensor_ingest::pipeline::{Pipeline, ShutdownOutcome};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::Subscriber;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .boxed(),
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .boxed(),
    }
}

fn init_tracing(config: &Config) -> Result<()> {
    use opentelemetry::KeyValue;
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::{runtime::Tokio, trace::Config as OTelTraceConfig, Resource};
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.log_level))
        .unwrap_or_else(|_| "info".into());

    if let Some(endpoint) = &config.otlp_endpoint {
        let endpoint = normalize_otlp_http_endpoint(endpoint);
        let exporter = opentelemetry_otlp::new_exporter()
            .http()
            .with_endpoint(endpoint);
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(exporter)
            .with_trace_config(OTelTraceConfig::default().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "sensor-ingest"),
            ])))
            .install_batch(Tokio)?;

        let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer(config.log_format))
            .with(otel_layer)
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer(config.log_format))
            .try_init()?;
    }

    Ok(())
}

fn normalize_otlp_http_endpoint(endpoint: &str) -> String {
    let trimmed = endpoint.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.contains("/v1/traces") {
        return trimmed.to_string();
    }
    format!("{}/v1/traces", trimmed.trim_end_matches('/'))
}

async fn bind_listener(addr: &str) -> Result<TcpListener> {
    match TcpListener::bind(addr).await {
        Ok(listener) => Ok(listener),
        Err(err) if err.kind() == std::io::ErrorKind::AddrInUse => {
            anyhow::bail!(
                "Failed to bind sensor-ingest listener on {addr}: port already in use. Stop the other service using this port or re-run with --port to choose another port.",
            );
        }
        Err(err) => {
            Err(err).with_context(|| format!("failed to bind sensor-ingest listener on {addr}"))
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.port = port;
    }
    init_tracing(&config)?;

    match &config.loaded_from {
        Some(path) => tracing::info!(path = %path.display(), "loaded settings file"),
        None => tracing::info!("no settings file found; using defaults and environment"),
    }

    let pool = db::connect(&config.database).await?;
    db::init_schema(&pool).await?;
    tracing::info!(
        host = %config.database.host,
        database = %config.database.name,
        "database ready"
    );
    let store = Arc::new(MySqlStore::new(pool));

    let pipeline = Pipeline::start(store.clone(), config.pipeline);
    let state = HttpState {
        gate: pipeline.gate(),
        stats: pipeline.stats(),
        sink: store.clone(),
        store_stats: store,
    };
    let app = http::router(state, config.request_timeout);

    let addr = config.bind_addr();
    let listener = bind_listener(&addr).await?;
    tracing::info!(%addr, "sensor-ingest listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed");

    match pipeline.shutdown().await {
        ShutdownOutcome::Drained => tracing::info!("ingest pipeline drained"),
        ShutdownOutcome::TimedOut => tracing::warn!("ingest pipeline shut down with readings lost"),
        ShutdownOutcome::WorkerFailed => tracing::error!("ingest pipeline worker failed"),
    }

    if config.otlp_endpoint.is_some() {
        opentelemetry::global::shutdown_tracer_provider();
    }
    served
}
