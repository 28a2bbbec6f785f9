use clap::Parser;
use relay_broker::{api::create_http_api, Broker, BrokerConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-broker")]
#[command(about = "Message broker for the relay gateway", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/broker.yaml")]
    config: String,

    /// Broker host
    #[arg(long, env = "BROKER_HOST")]
    host: Option<String>,

    /// Broker port
    #[arg(long, env = "BROKER_PORT")]
    port: Option<u16>,

    /// Health/metrics HTTP port
    #[arg(long, env = "BROKER_HTTP_PORT")]
    http_port: Option<u16>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Load configuration
    let config_missing = !std::path::Path::new(&args.config).exists();
    let mut config = if config_missing {
        BrokerConfig::default()
    } else {
        BrokerConfig::from_file(&args.config)?
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(http_port) = args.http_port {
        config.api.http_port = http_port;
    }
    if let Some(log_level) = args.log_level {
        config.monitoring.log_level = log_level;
    }
    if args.log_json {
        config.monitoring.log_json = true;
    }

    init_tracing(&config.monitoring.log_level, config.monitoring.log_json);
    if config_missing {
        tracing::warn!("Config file {} not found, using defaults", args.config);
    }

    tracing::info!("Starting broker with config: {:?}", config);

    let broker = Arc::new(Broker::new(config.clone())?);

    let api_broker = broker.clone();
    let http_addr = config.http_addr();
    tokio::spawn(async move {
        if let Err(e) = start_http_api(api_broker, http_addr).await {
            tracing::error!("HTTP API error: {}", e);
        }
    });

    let server = broker.clone();
    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
            broker.shutdown();
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

async fn start_http_api(broker: Arc<Broker>, addr: String) -> anyhow::Result<()> {
    let app = create_http_api(broker);

    tracing::info!("HTTP API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
