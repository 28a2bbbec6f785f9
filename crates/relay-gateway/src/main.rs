use clap::Parser;
use relay_channel::{BrokerChannel, TcpBrokerChannel};
use relay_core::RoutingMissPolicy;
use relay_gateway::{Gateway, GatewayConfig};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "relay-gateway")]
#[command(about = "WebSocket gateway relaying client events through the broker", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Listen host
    #[arg(long, env = "GATEWAY_HOST")]
    host: Option<String>,

    /// Listen port
    #[arg(long, env = "INTERNAL_API_PORT")]
    port: Option<u16>,

    /// Broker URL (relay://host:port)
    #[arg(long, env = "BROKER_URL")]
    broker_url: Option<String>,

    #[arg(long, env = "INBOUND_QUEUE")]
    inbound_queue: Option<String>,

    #[arg(long, env = "OUTBOUND_QUEUE")]
    outbound_queue: Option<String>,

    /// Client event relayed to the inbound queue
    #[arg(long, env = "CLIENT_EVENT")]
    client_event: Option<String>,

    /// drop or notify
    #[arg(long, env = "ROUTING_MISS_POLICY")]
    routing_miss_policy: Option<RoutingMissPolicy>,

    #[arg(long, env = "CLIENT_GONE_QUEUE")]
    client_gone_queue: Option<String>,

    #[arg(long, env = "LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

impl Args {
    fn apply(self, config: &mut GatewayConfig) {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(broker_url) = self.broker_url {
            config.broker_url = broker_url;
        }
        if let Some(queue) = self.inbound_queue {
            config.inbound_queue = queue;
        }
        if let Some(queue) = self.outbound_queue {
            config.outbound_queue = queue;
        }
        if let Some(event) = self.client_event {
            config.client_event = event;
        }
        if let Some(policy) = self.routing_miss_policy {
            config.routing_miss_policy = policy;
        }
        if let Some(queue) = self.client_gone_queue {
            config.client_gone_queue = queue;
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
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };
    args.apply(&mut config);

    init_tracing(&config.log_level, config.log_json);

    tracing::info!("Connecting to broker at {}", config.broker_url);
    let channel = Arc::new(TcpBrokerChannel::connect(&config.broker_url).await?);

    let mut handle = Gateway::start(config, channel.clone()).await?;

    let outcome = tokio::select! {
        result = handle.wait() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match outcome {
        Some(Err(e)) => {
            tracing::error!("Gateway stopped: {}", e);
            Err(e.into())
        }
        Some(Ok(())) => Ok(()),
        None => {
            tracing::info!("Received shutdown signal");
            handle.shutdown().await;
            channel.close().await;
            Ok(())
        }
    }
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
