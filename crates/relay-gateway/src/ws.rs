use crate::{events::EventFrame, state::GatewayState};
use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use relay_channel::BrokerChannelExt;
use relay_core::{ConnectionId, InboundEnvelope};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Serve one client for the lifetime of its WebSocket.
///
/// Responses routed to this connection and frames from the client are
/// handled in a single loop, so per-connection event handling is serialized.
pub async fn handle_connection(socket: WebSocket, state: Arc<GatewayState>) {
    let connection_id = ConnectionId::generate();
    let mut outgoing = state.registry.register(connection_id.clone());
    state.metrics.active_connections.inc();
    debug!(%connection_id, "Client connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            frame = outgoing.recv() => {
                let Some(text) = frame else {
                    break;
                };
                if sink.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            message = stream.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        relay_client_frame(&state, &connection_id, &text).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!(%connection_id, error = %e, "WebSocket error");
                        break;
                    }
                }
            }
        }
    }

    state.metrics.active_connections.dec();
    if let Some(client) = state.registry.remove(&connection_id) {
        let connected_for = Utc::now() - client.connected_at;
        debug!(
            %connection_id,
            connected_secs = connected_for.num_seconds(),
            "Client disconnected"
        );
    }
}

/// Tag a client event with its connection identity and publish it
async fn relay_client_frame(state: &GatewayState, connection_id: &ConnectionId, text: &str) {
    let frame = match EventFrame::parse(text) {
        Ok(frame) => frame,
        Err(e) => {
            state.metrics.invalid_payloads.inc();
            warn!(%connection_id, "Invalid client frame: {}", e);
            return;
        }
    };

    if frame.event != state.config.client_event {
        debug!(%connection_id, event = %frame.event, "Ignoring client event");
        return;
    }
    state.metrics.client_events.inc();

    let envelope = match frame
        .payload()
        .and_then(|payload| InboundEnvelope::tag(payload, connection_id.clone()))
    {
        Ok(envelope) => envelope,
        Err(e) => {
            state.metrics.invalid_payloads.inc();
            warn!(%connection_id, "Rejected client payload: {}", e);
            return;
        }
    };

    match state
        .channel
        .publish_json(&state.config.inbound_queue, &envelope)
        .await
    {
        Ok(()) => {
            state.metrics.envelopes_published.inc();
            debug!(%connection_id, queue = %state.config.inbound_queue, "Published envelope");
        }
        Err(e) => {
            error!(%connection_id, "Failed to publish envelope: {}", e);
        }
    }
}
