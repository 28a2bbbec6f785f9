use crate::{
    config::BrokerConfig,
    metrics::BrokerMetrics,
    queue::{Dispatch, PublishOutcome, QueueTable, SessionId},
    BrokerError, Result,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use relay_protocol::{
    ErrorCode, ErrorResponse, Frame, FrameCodec, OkResponse, ProtocolError,
};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Broker server speaking the relay frame protocol over TCP
pub struct Broker {
    config: Arc<BrokerConfig>,
    table: Arc<QueueTable>,
    metrics: Arc<BrokerMetrics>,
    shutdown: Arc<Notify>,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> Result<Self> {
        let metrics = Arc::new(BrokerMetrics::new()?);
        let table = Arc::new(QueueTable::new(metrics.clone()));

        Ok(Broker {
            config: Arc::new(config),
            table,
            metrics,
            shutdown: Arc::new(Notify::new()),
        })
    }

    pub fn table(&self) -> Arc<QueueTable> {
        self.table.clone()
    }

    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(self: Arc<Self>) -> Result<()> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;

        info!("Broker listening on {}", addr);
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!(peer = %addr, "New connection");
                            let broker = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = broker.handle_connection(stream).await {
                                    warn!(peer = %addr, error = %e, "Connection closed with error");
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Serve one client connection.
    ///
    /// Replies and deliveries share a single writer task. Closing the
    /// connection closes the session, which requeues unacked deliveries.
    async fn handle_connection(&self, stream: TcpStream) -> std::result::Result<(), ProtocolError> {
        let (mut sink, mut frames) = Framed::new(stream, FrameCodec).split();

        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Frame>();
        let (outbox, mut outbox_rx) = mpsc::unbounded_channel::<Dispatch>();

        let session = self.table.open_session(outbox);
        self.metrics.connections.inc();
        debug!(session, "Session opened");

        let writer = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    biased;
                    Some(reply) = reply_rx.recv() => reply,
                    Some(dispatch) = outbox_rx.recv() => Frame::Deliver(dispatch.into()),
                    else => break,
                };

                if let Err(e) = sink.send(frame).await {
                    debug!(error = %e, "Writer stopped");
                    break;
                }
            }
        });

        let mut result = Ok(());
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => {
                    if let Some(reply) = self.handle_frame(session, frame) {
                        if reply_tx.send(reply).is_err() {
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(session, "Protocol error: {}", e);
                    result = Err(e);
                    break;
                }
            }
        }

        let requeued = self.table.close_session(session);
        drop(reply_tx);
        let _ = writer.await;

        self.metrics.connections.dec();
        debug!(session, requeued, "Session closed");

        result
    }

    /// Apply one client frame; returns the reply to send, if any
    fn handle_frame(&self, session: SessionId, frame: Frame) -> Option<Frame> {
        match frame {
            Frame::DeclareQueue(req) => {
                if self.table.declare(&req.queue) {
                    info!(queue = %req.queue, "Queue declared");
                }
                Some(Frame::Ok(OkResponse {
                    request_id: req.request_id,
                }))
            }
            Frame::Publish(req) => {
                if self.table.publish(&req.queue, Bytes::from(req.body)) == PublishOutcome::Unroutable {
                    debug!(session, queue = %req.queue, "Unroutable publish");
                }
                None
            }
            Frame::Subscribe(req) => {
                match self
                    .table
                    .subscribe(session, &req.queue, req.consumer_tag, req.ack_mode)
                {
                    Ok(()) => {
                        debug!(
                            session,
                            queue = %req.queue,
                            consumer_tag = req.consumer_tag,
                            ack_mode = ?req.ack_mode,
                            "Consumer registered"
                        );
                        Some(Frame::Ok(OkResponse {
                            request_id: req.request_id,
                        }))
                    }
                    Err(BrokerError::QueueNotFound(queue)) => Some(error_frame(
                        Some(req.request_id),
                        ErrorCode::QueueNotFound,
                        queue,
                    )),
                    Err(e) => Some(error_frame(
                        Some(req.request_id),
                        ErrorCode::BadRequest,
                        e.to_string(),
                    )),
                }
            }
            Frame::Ack(req) => {
                if self.table.ack(session, req.delivery_tag) {
                    None
                } else {
                    warn!(session, delivery_tag = req.delivery_tag, "Ack for unknown delivery");
                    Some(error_frame(
                        None,
                        ErrorCode::BadRequest,
                        format!("unknown delivery tag {}", req.delivery_tag),
                    ))
                }
            }
            Frame::Nack(req) => {
                if !self.table.nack(session, req.delivery_tag, req.requeue) {
                    debug!(session, delivery_tag = req.delivery_tag, "Nack for unknown delivery");
                }
                None
            }
            Frame::Cancel(req) => {
                if self.table.cancel(session, req.consumer_tag) {
                    debug!(session, consumer_tag = req.consumer_tag, "Consumer cancelled");
                }
                None
            }
            other => {
                warn!(session, frame_type = ?other.frame_type(), "Unexpected frame from client");
                Some(error_frame(
                    None,
                    ErrorCode::BadRequest,
                    "unsupported frame".to_string(),
                ))
            }
        }
    }
}

fn error_frame(request_id: Option<u64>, code: ErrorCode, message: String) -> Frame {
    Frame::Error(ErrorResponse {
        request_id,
        code,
        message,
    })
}
