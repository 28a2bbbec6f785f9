use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use clap::Parser;
use relay_channel::{BrokerChannel, TcpBrokerChannel};
use relay_core::FailurePolicy;
use relay_worker::{LoginHandler, Worker, WorkerConfig, WorkerMetrics};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-worker")]
#[command(about = "Login worker for the relay gateway", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Broker URL (relay://host:port)
    #[arg(long, env = "BROKER_URL")]
    broker_url: Option<String>,

    #[arg(long, env = "INBOUND_QUEUE")]
    inbound_queue: Option<String>,

    #[arg(long, env = "OUTBOUND_QUEUE")]
    outbound_queue: Option<String>,

    /// drop, requeue or dead-letter
    #[arg(long, env = "FAILURE_POLICY")]
    failure_policy: Option<FailurePolicy>,

    #[arg(long, env = "MAX_ATTEMPTS")]
    max_attempts: Option<u32>,

    #[arg(long, env = "DEAD_LETTER_QUEUE")]
    dead_letter_queue: Option<String>,

    #[arg(long, env = "HANDLER_TIMEOUT_SECS")]
    handler_timeout_secs: Option<u64>,

    /// Serve Prometheus metrics on this port
    #[arg(long, env = "WORKER_METRICS_PORT")]
    metrics_port: Option<u16>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(self, config: &mut WorkerConfig) {
        if let Some(broker_url) = self.broker_url {
            config.broker_url = broker_url;
        }
        if let Some(queue) = self.inbound_queue {
            config.inbound_queue = queue;
        }
        if let Some(queue) = self.outbound_queue {
            config.outbound_queue = queue;
        }
        if let Some(policy) = self.failure_policy {
            config.failure_policy = policy;
        }
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(queue) = self.dead_letter_queue {
            config.dead_letter_queue = Some(queue);
        }
        if let Some(secs) = self.handler_timeout_secs {
            config.handler_timeout_secs = secs;
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = Some(port);
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        if self.log_json {
            config.log_json = true;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let mut args = Args::parse();

    // Load configuration
    let mut config = match args.config.take() {
        Some(path) => WorkerConfig::from_file(path)?,
        None => WorkerConfig::default(),
    };
    args.apply(&mut config);

    init_tracing(&config.log_level, config.log_json);

    tracing::info!("Connecting to broker at {}", config.broker_url);
    let channel = Arc::new(TcpBrokerChannel::connect(&config.broker_url).await?);

    let worker = Worker::new(config.clone(), channel.clone(), Arc::new(LoginHandler))?;

    if let Some(port) = config.metrics_port {
        let metrics = worker.metrics();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics, port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    tokio::select! {
        result = worker.run() => {
            if let Err(e) = result {
                tracing::error!("Worker stopped: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            channel.close().await;
        }
    }

    Ok(())
}

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .init();
    }
}

async fn start_metrics_server(metrics: Arc<WorkerMetrics>, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(State(metrics): State<Arc<WorkerMetrics>>) -> impl IntoResponse {
        match metrics.render() {
            Ok(body) => (StatusCode::OK, body),
            Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
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
