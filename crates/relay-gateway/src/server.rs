use crate::{
    config::GatewayConfig, metrics::GatewayMetrics, relay::OutboundRelay, state::GatewayState,
    ws::handle_connection, GatewayError,
};
use axum::{
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use relay_channel::{AckMode, BrokerChannel};
use relay_core::{RelayError, RoutingMissPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

/// Build the gateway router (shared between production startup and tests).
pub fn build_gateway_app(state: Arc<GatewayState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_upgrade_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

pub struct Gateway;

impl Gateway {
    /// Declare the queues, subscribe to the outbound queue and start serving
    /// clients on the configured address.
    pub async fn start(
        config: GatewayConfig,
        channel: Arc<dyn BrokerChannel>,
    ) -> Result<GatewayHandle, GatewayError> {
        config.validate()?;

        channel.declare_queue(&config.inbound_queue).await?;
        channel.declare_queue(&config.outbound_queue).await?;
        if config.routing_miss_policy == RoutingMissPolicy::Notify {
            channel.declare_queue(&config.client_gone_queue).await?;
        }

        let subscription = channel
            .subscribe(&config.outbound_queue, AckMode::Auto)
            .await?;

        let listener = TcpListener::bind(config.bind_addr()).await?;
        let address = listener.local_addr()?;

        let state = GatewayState::new(config, channel, GatewayMetrics::new()?);

        let relay = OutboundRelay::new(state.clone());
        let relay_task = tokio::spawn(async move { subscription.dispatch(&relay).await });

        let app = build_gateway_app(state.clone());
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let server_task = tokio::spawn(async move {
            let server = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });
            if let Err(err) = server.await {
                warn!(error = %err, "Gateway server exited with error");
            }
        });

        info!(
            address = %address,
            inbound = %state.config.inbound_queue,
            outbound = %state.config.outbound_queue,
            "Gateway listening"
        );

        Ok(GatewayHandle {
            address,
            state,
            shutdown: shutdown_tx,
            server_task,
            relay_task,
        })
    }
}

/// Handle for the running gateway.
pub struct GatewayHandle {
    address: SocketAddr,
    state: Arc<GatewayState>,
    shutdown: watch::Sender<bool>,
    server_task: JoinHandle<()>,
    relay_task: JoinHandle<relay_core::Result<()>>,
}

impl GatewayHandle {
    /// Return the bound listening address.
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Number of live client connections
    pub fn connection_count(&self) -> usize {
        self.state.registry.count()
    }

    pub fn state(&self) -> Arc<GatewayState> {
        self.state.clone()
    }

    /// Resolve once the gateway can no longer relay responses, which only
    /// happens when the broker is gone.
    pub async fn wait(&mut self) -> relay_core::Result<()> {
        match (&mut self.relay_task).await {
            Ok(result) => result,
            Err(e) => Err(RelayError::BrokerUnavailable(format!(
                "outbound relay stopped: {e}"
            ))),
        }
    }

    /// Stop accepting clients, let the server drain, and stop relaying.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(err) = self.server_task.await {
            warn!(error = %err, "Gateway server task failed");
        }
        self.relay_task.abort();
        info!("Gateway stopped");
    }
}

// ── Handlers ─────────────────────────────────────────────────────────────────

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": state.version,
        "connections": state.registry.count(),
    }))
}

async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => body.into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}
