use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use relay_broker::{Broker, BrokerConfig, EmbeddedBroker};
use relay_channel::{AckMode, BrokerChannel, TcpBrokerChannel};
use relay_core::{ClientGone, InboundEnvelope, RelayError, RoutingMissPolicy, CLIENT_GONE_QUEUE};
use relay_gateway::{Gateway, GatewayConfig, GatewayHandle};
use relay_worker::{EnvelopeHandler, HandlerResult, LoginHandler, Worker, WorkerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Answers with the client's own fields, so each response is traceable to its request
struct EchoHandler {
    delay: Duration,
}

#[async_trait]
impl EnvelopeHandler for EchoHandler {
    fn event_type(&self) -> &str {
        "echo"
    }

    async fn handle(&self, envelope: &InboundEnvelope) -> HandlerResult {
        sleep(self.delay).await;
        Ok(Value::Object(envelope.fields().clone()))
    }
}

struct Stack {
    broker: EmbeddedBroker,
    gateway: GatewayHandle,
    gateway_channel: Arc<dyn BrokerChannel>,
}

async fn start_stack(handler: Arc<dyn EnvelopeHandler>, policy: RoutingMissPolicy) -> Stack {
    let broker = EmbeddedBroker::new().unwrap();

    let gateway_channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
    let config = GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        routing_miss_policy: policy,
        ..GatewayConfig::default()
    };
    let gateway = Gateway::start(config, gateway_channel.clone()).await.unwrap();

    let worker_channel: Arc<dyn BrokerChannel> = Arc::new(broker.channel());
    let worker = Worker::new(WorkerConfig::default(), worker_channel, handler).unwrap();
    tokio::spawn(async move {
        let _ = worker.run().await;
    });

    Stack {
        broker,
        gateway,
        gateway_channel,
    }
}

async fn connect(stack: &Stack) -> Client {
    let url = format!("ws://{}/ws", stack.gateway.local_addr());
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send_event(client: &mut Client, event: &str, data: Value) {
    let frame = json!({ "event": event, "data": data }).to_string();
    client.send(Message::Text(frame)).await.unwrap();
}

async fn recv_event(client: &mut Client) -> Value {
    loop {
        let message = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for event")
            .expect("connection closed")
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn assert_silent(client: &mut Client, wait: Duration) {
    if let Ok(Some(Ok(Message::Text(text)))) = timeout(wait, client.next()).await {
        panic!("unexpected event: {text}");
    }
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(5), async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_login_round_trip() {
    let stack = start_stack(Arc::new(LoginHandler), RoutingMissPolicy::Drop).await;
    let mut alice = connect(&stack).await;
    let mut bystander = connect(&stack).await;

    send_event(&mut alice, "message", json!({ "name": "alice" })).await;

    let event = recv_event(&mut alice).await;
    assert_eq!(event, json!({ "event": "loginResponse", "data": "User logged in" }));
    assert_silent(&mut bystander, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_stringified_payload_is_accepted() {
    let stack = start_stack(Arc::new(LoginHandler), RoutingMissPolicy::Drop).await;
    let mut client = connect(&stack).await;

    send_event(&mut client, "message", json!("{\"name\":\"carol\"}")).await;

    let event = recv_event(&mut client).await;
    assert_eq!(event["event"], "loginResponse");
}

#[tokio::test]
async fn test_each_client_gets_only_its_own_response() {
    let handler = Arc::new(EchoHandler {
        delay: Duration::ZERO,
    });
    let stack = start_stack(handler, RoutingMissPolicy::Drop).await;

    let mut clients = Vec::new();
    for _ in 0..8 {
        clients.push(connect(&stack).await);
    }
    for (i, client) in clients.iter_mut().enumerate() {
        send_event(client, "message", json!({ "name": format!("user-{i}") })).await;
    }

    for (i, client) in clients.iter_mut().enumerate() {
        let event = recv_event(client).await;
        assert_eq!(event["event"], "echo");
        assert_eq!(event["data"]["name"], format!("user-{i}"));
        assert_silent(client, Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn test_client_cannot_spoof_connection_id() {
    let handler = Arc::new(EchoHandler {
        delay: Duration::ZERO,
    });
    let stack = start_stack(handler, RoutingMissPolicy::Drop).await;
    let mut victim = connect(&stack).await;
    let mut attacker = connect(&stack).await;

    send_event(
        &mut attacker,
        "message",
        json!({ "name": "mallory", "socketId": "not-mine" }),
    )
    .await;

    let event = recv_event(&mut attacker).await;
    assert_eq!(event["data"], json!({ "name": "mallory" }));
    assert_silent(&mut victim, Duration::from_millis(200)).await;
}

#[tokio::test]
async fn test_sequential_messages_answered_in_order() {
    let handler = Arc::new(EchoHandler {
        delay: Duration::ZERO,
    });
    let stack = start_stack(handler, RoutingMissPolicy::Drop).await;
    let mut client = connect(&stack).await;

    send_event(&mut client, "message", json!({ "seq": 1 })).await;
    send_event(&mut client, "message", json!({ "seq": 2 })).await;

    assert_eq!(recv_event(&mut client).await["data"]["seq"], 1);
    assert_eq!(recv_event(&mut client).await["data"]["seq"], 2);
}

#[tokio::test]
async fn test_other_events_and_bad_payloads_are_ignored() {
    let stack = start_stack(Arc::new(LoginHandler), RoutingMissPolicy::Drop).await;
    let mut client = connect(&stack).await;

    send_event(&mut client, "typing", json!({ "name": "alice" })).await;
    send_event(&mut client, "message", json!([1, 2, 3])).await;
    client.send(Message::Text("not json".to_string())).await.unwrap();
    assert_silent(&mut client, Duration::from_millis(200)).await;

    let state = stack.gateway.state();
    let metrics = &state.metrics;
    assert_eq!(metrics.invalid_payloads.get(), 2);
    assert_eq!(metrics.envelopes_published.get(), 0);

    send_event(&mut client, "message", json!({ "name": "alice" })).await;
    assert_eq!(recv_event(&mut client).await["event"], "loginResponse");
}

#[tokio::test]
async fn test_response_for_disconnected_client_is_dropped() {
    let handler = Arc::new(EchoHandler {
        delay: Duration::from_millis(300),
    });
    let stack = start_stack(handler, RoutingMissPolicy::Drop).await;
    let mut leaver = connect(&stack).await;
    let mut stayer = connect(&stack).await;

    send_event(&mut leaver, "message", json!({ "name": "leaver" })).await;
    leaver.close(None).await.unwrap();
    drop(leaver);

    let state = stack.gateway.state();
    wait_until(|| state.metrics.routing_misses.get() == 1).await;
    assert_silent(&mut stayer, Duration::from_millis(100)).await;
    assert_eq!(stack.gateway.connection_count(), 1);

    // Still serving.
    send_event(&mut stayer, "message", json!({ "name": "stayer" })).await;
    assert_eq!(recv_event(&mut stayer).await["data"]["name"], "stayer");
}

#[tokio::test]
async fn test_notify_policy_publishes_client_gone() {
    let handler = Arc::new(EchoHandler {
        delay: Duration::from_millis(300),
    });
    let stack = start_stack(handler, RoutingMissPolicy::Notify).await;

    let observer = stack.broker.channel();
    let mut notices = observer
        .subscribe(CLIENT_GONE_QUEUE, AckMode::Auto)
        .await
        .unwrap();

    let mut leaver = connect(&stack).await;
    send_event(&mut leaver, "message", json!({ "name": "leaver" })).await;
    leaver.close(None).await.unwrap();

    let delivery = timeout(Duration::from_secs(5), notices.next())
        .await
        .unwrap()
        .unwrap();
    let notice: ClientGone = delivery.json().unwrap();
    assert_eq!(notice.event_type, "echo");
    assert!(!notice.connection_id.as_str().is_empty());
}

#[tokio::test]
async fn test_health_reports_connections() {
    let stack = start_stack(Arc::new(LoginHandler), RoutingMissPolicy::Drop).await;
    let _client = connect(&stack).await;
    wait_until(|| stack.gateway.connection_count() == 1).await;

    let mut stream = TcpStream::connect(stack.gateway.local_addr()).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let health: Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
}

#[tokio::test]
async fn test_broker_loss_stops_gateway() {
    let mut stack = start_stack(Arc::new(LoginHandler), RoutingMissPolicy::Drop).await;

    stack.gateway_channel.close().await;

    let result = timeout(Duration::from_secs(5), stack.gateway.wait())
        .await
        .unwrap();
    assert!(matches!(result, Err(RelayError::BrokerUnavailable(_))));
}

#[tokio::test]
async fn test_login_round_trip_over_tcp_broker() {
    let broker = Arc::new(Broker::new(BrokerConfig::default()).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let broker_url = format!("relay://{}", listener.local_addr().unwrap());
    let server = broker.clone();
    tokio::spawn(async move {
        server.serve(listener).await.unwrap();
    });

    let gateway_channel: Arc<dyn BrokerChannel> =
        Arc::new(TcpBrokerChannel::connect(&broker_url).await.unwrap());
    let config = GatewayConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        broker_url: broker_url.clone(),
        ..GatewayConfig::default()
    };
    let gateway = Gateway::start(config, gateway_channel).await.unwrap();

    let worker_config = WorkerConfig {
        broker_url: broker_url.clone(),
        ..WorkerConfig::default()
    };
    let worker_channel: Arc<dyn BrokerChannel> =
        Arc::new(TcpBrokerChannel::connect(&broker_url).await.unwrap());
    let worker = Worker::new(worker_config, worker_channel, Arc::new(LoginHandler)).unwrap();
    tokio::spawn(async move {
        let _ = worker.run().await;
    });

    let url = format!("ws://{}/ws", gateway.local_addr());
    let (mut alice, _) = connect_async(url.clone()).await.unwrap();
    let (mut bob, _) = connect_async(url).await.unwrap();

    send_event(&mut alice, "message", json!({ "name": "alice" })).await;
    send_event(&mut bob, "message", json!({ "name": "bob" })).await;

    for client in [&mut alice, &mut bob] {
        let event = recv_event(client).await;
        assert_eq!(event, json!({ "event": "loginResponse", "data": "User logged in" }));
    }
    assert_silent(&mut alice, Duration::from_millis(200)).await;

    assert_eq!(broker.table().depth("userLogin"), Some(0));
    assert_eq!(broker.table().depth("frontendMessage"), Some(0));
    gateway.shutdown().await;
}
