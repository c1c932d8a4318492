//! EventGate service entry point.
//!
//! Wires the pipeline together: producers into the registry, registry into
//! the router, router plus store plus notifier into the engine, engine into
//! the HTTP server and the timeout sweeper. Shuts down on SIGINT/SIGTERM via
//! a shared cancellation token.

use clap::Parser;
use eventgate::aggregate::AggregatorConfig;
use eventgate::approval::engine::{ApprovalEngine, EngineConfig};
use eventgate::approval::notify::{LogNotifier, Notifier, SlackConfig, SlackNotifier};
use eventgate::approval::store::MemoryApprovalStore;
use eventgate::approval::TimeoutSweeper;
use eventgate::config::GateConfig;
use eventgate::metrics::EngineMetrics;
use eventgate::producer::budget::BudgetReviewProducer;
use eventgate::producer::release::ReleaseReviewProducer;
use eventgate::producer::tech_debt::TechDebtReviewProducer;
use eventgate::producer::ProducerRegistry;
use eventgate::router::Router;
use eventgate::transport::{serve, AppState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Command-line options. Everything else comes from `EVENTGATE_*` env vars.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, env = "EVENTGATE_PORT", default_value = "8080")]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "127.0.0.1")]
    bind: String,

    /// Prometheus metrics port (with the `metrics` feature)
    #[arg(long, env = "EVENTGATE_METRICS_PORT", default_value = "9090")]
    metrics_port: u16,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = GateConfig::from_env();

    #[cfg(feature = "metrics")]
    {
        use opentelemetry::global;
        use opentelemetry_sdk::metrics::SdkMeterProvider;

        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(prometheus::default_registry().clone())
            .build()?;
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        global::set_meter_provider(provider);

        let metrics_port = cli.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = serve_metrics(metrics_port).await {
                error!(error = %e, "Metrics server error");
            }
        });
        info!(metrics_port, "Metrics endpoint started");
    }
    let metrics = EngineMetrics::new(&opentelemetry::global::meter("eventgate"));

    let mut registry = ProducerRegistry::new();
    registry.register(Arc::new(ReleaseReviewProducer::new()));
    registry.register(Arc::new(BudgetReviewProducer::new()));
    registry.register(Arc::new(TechDebtReviewProducer::new()));
    let router = Router::with_default_bindings(registry);

    let store = Arc::new(MemoryApprovalStore::with_retention(config.record_retention));

    let notifier: Arc<dyn Notifier> = match SlackConfig::from_env() {
        Ok(slack) => Arc::new(SlackNotifier::new(slack)?),
        Err(_) => {
            warn!("SLACK_BOT_TOKEN not set, approval prompts go to the log only");
            Arc::new(LogNotifier)
        }
    };

    let engine = Arc::new(ApprovalEngine::new(
        router,
        store,
        notifier,
        EngineConfig {
            approval_timeout: config.approval_timeout,
            aggregator: AggregatorConfig {
                auto_approve_threshold: config.auto_approve_threshold,
            },
        },
        metrics,
    ));

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone());

    let sweeper = TimeoutSweeper::new(engine.clone(), config.sweep_interval, shutdown.clone());
    let sweeper_task = tokio::spawn(async move { sweeper.run().await });

    let addr = format!("{}:{}", cli.bind, cli.port);
    let state = AppState::new(
        engine,
        config.webhook_secret.as_ref().map(|s| s.as_bytes().to_vec()),
    );

    info!(
        addr = %addr,
        approval_timeout_secs = config.approval_timeout.num_seconds(),
        sweep_interval_secs = config.sweep_interval.as_secs(),
        auto_approve_threshold = config.auto_approve_threshold,
        "EventGate starting"
    );

    serve(&addr, state, shutdown.clone()).await?;

    // The server only returns once the token fired; wait for the sweeper's
    // final pass so overdue approvals are expired before exit.
    shutdown.cancel();
    if let Err(e) = sweeper_task.await {
        error!(error = %e, "Sweeper task panicked");
    }

    info!("EventGate stopped");
    Ok(())
}

fn spawn_signal_handlers(shutdown: CancellationToken) {
    let token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received SIGINT (Ctrl+C), initiating graceful shutdown");
                token.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("Received SIGTERM, initiating graceful shutdown");
                shutdown.cancel();
            }
            Err(e) => error!(error = %e, "Failed to listen for SIGTERM"),
        }
    });
}

/// Serves the Prometheus scrape endpoint on its own port.
#[cfg(feature = "metrics")]
async fn serve_metrics(port: u16) -> std::io::Result<()> {
    use axum::routing::get;

    async fn render() -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let families = prometheus::default_registry().gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buf) {
            error!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    let app = axum::Router::new().route("/metrics", get(render));
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", port)).await?;
    axum::serve(listener, app).await
}
