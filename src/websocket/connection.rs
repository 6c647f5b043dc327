use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::chat::{InboundMessage, MessageService, ParticipantId};
use crate::config::GatewayConfig;
use crate::error::WebSocketError;
use crate::websocket::hub::{ConnectionId, Payload};

/// Keepalive, deadline and sizing knobs for one connection.
#[derive(Debug, Clone)]
pub struct PumpConfig {
    pub handshake_timeout: Duration,
    pub write_wait: Duration,
    pub pong_wait: Duration,
    pub ping_period: Duration,
    pub max_message_size: usize,
    pub outbox_capacity: usize,
}

impl From<&GatewayConfig> for PumpConfig {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            handshake_timeout: config.handshake_timeout(),
            write_wait: config.write_wait(),
            pong_wait: config.pong_wait(),
            ping_period: config.ping_period(),
            max_message_size: config.max_message_size,
            outbox_capacity: config.outbox_capacity,
        }
    }
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(10),
            write_wait: Duration::from_secs(10),
            pong_wait: Duration::from_secs(60),
            ping_period: Duration::from_secs(54),
            max_message_size: 512 * 1024,
            outbox_capacity: 256,
        }
    }
}

/// Server side of one authenticated socket: an inbound pump that decodes
/// client frames and an outbound pump that drains the outbox.
pub struct Connection {
    id: ConnectionId,
    participant_id: ParticipantId,
    messages: Arc<MessageService>,
    config: PumpConfig,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        participant_id: ParticipantId,
        messages: Arc<MessageService>,
        config: PumpConfig,
    ) -> Self {
        Self {
            id,
            participant_id,
            messages,
            config,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    /// Splits the socket and runs both pumps as separate tasks.
    /// Returns the (inbound, outbound) handles.
    ///
    /// When the outbound pump exits the inbound pump is told to stop too, so
    /// both socket halves are dropped and the peer sees the connection close.
    pub fn spawn<T>(self, socket: WebSocketStream<T>, outbox: mpsc::Receiver<Payload>) -> (JoinHandle<()>, JoinHandle<()>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let span = info_span!("connection", connection_id = %self.id, participant_id = self.participant_id);
        let (sink, stream) = socket.split();
        let (closed_tx, closed_rx) = watch::channel(false);
        let connection = Arc::new(self);

        let writer = {
            let connection = connection.clone();
            tokio::spawn(
                async move {
                    connection.write_pump(sink, outbox).await;
                    closed_tx.send_replace(true);
                }
                .instrument(span.clone()),
            )
        };
        let reader = tokio::spawn(async move { connection.read_pump(stream, closed_rx).await }.instrument(span));

        (reader, writer)
    }

    /// Reads frames until the socket fails, closes, stays silent past the
    /// pong window or the outbound side shuts down, then unregisters the
    /// connection.
    ///
    /// Any received frame, pongs included, restarts the read deadline.
    /// `closed` flips to `true` (or its sender is dropped) once the outbound
    /// pump has exited; no frame is processed after that.
    pub async fn read_pump<S>(&self, mut stream: S, mut closed: watch::Receiver<bool>)
    where
        S: Stream<Item = Result<Message, WsError>> + Unpin,
    {
        loop {
            if *closed.borrow() {
                debug!("Outbound side closed, stopping reader");
                break;
            }

            let next = tokio::select! {
                biased;
                _ = closed.changed() => {
                    debug!("Outbound side closed, stopping reader");
                    break;
                }
                next = timeout(self.config.pong_wait, stream.next()) => next,
            };

            let message = match next {
                Err(_) => {
                    warn!(timeout = ?self.config.pong_wait, "Read deadline exceeded, closing connection");
                    break;
                }
                Ok(None) => {
                    info!("Socket stream ended");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "Error receiving websocket frame");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => self.handle_frame(text.as_bytes()).await,
                Message::Binary(data) => self.handle_frame(&data).await,
                Message::Pong(_) => debug!("Pong received"),
                // tungstenite queues the pong reply itself
                Message::Ping(_) => debug!("Ping received"),
                Message::Close(frame) => {
                    info!(reason = ?frame, "Client initiated close");
                    break;
                }
                Message::Frame(_) => {}
            }
        }

        self.messages.hub().unregister(&self.id).await;
    }

    /// Malformed frames and rejected messages are logged and dropped; neither
    /// ends the connection.
    async fn handle_frame(&self, data: &[u8]) {
        let inbound: InboundMessage = match serde_json::from_slice(data) {
            Ok(inbound) => inbound,
            Err(e) => {
                let err = WebSocketError::InvalidFormat(e.to_string());
                warn!(error = %err, bytes = data.len(), "Discarding malformed frame");
                return;
            }
        };

        let conversation_id = inbound.conversation_id;
        if let Err(e) = self.messages.send(self.participant_id, inbound).await {
            warn!(conversation_id, error = %e, "Message rejected");
        }
    }

    /// Writes queued payloads in order and pings on every keepalive tick.
    /// Stops when the outbox is closed by the hub or a write fails.
    pub async fn write_pump<K>(&self, mut sink: K, mut outbox: mpsc::Receiver<Payload>)
    where
        K: Sink<Message, Error = WsError> + Unpin,
    {
        let mut ticker = interval_at(Instant::now() + self.config.ping_period, self.config.ping_period);

        loop {
            tokio::select! {
                payload = outbox.recv() => match payload {
                    Some(payload) => {
                        if let Err(e) = self.write(&mut sink, Message::Text(payload)).await {
                            warn!(error = %e, "Write failed, dropping connection");
                            self.messages.hub().unregister(&self.id).await;
                            break;
                        }
                    }
                    None => {
                        debug!("Outbox closed, sending close frame");
                        if let Err(e) = self.write(&mut sink, Message::Close(None)).await {
                            debug!(error = %e, "Error sending close frame");
                        }
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.write(&mut sink, Message::Ping(Vec::new())).await {
                        warn!(error = %e, "Keepalive ping failed, dropping connection");
                        self.messages.hub().unregister(&self.id).await;
                        break;
                    }
                }
            }
        }

        if let Ok(Err(e)) = timeout(self.config.write_wait, sink.close()).await {
            debug!(error = %e, "Error closing websocket sink");
        }
    }

    async fn write<K>(&self, sink: &mut K, message: Message) -> Result<(), WebSocketError>
    where
        K: Sink<Message, Error = WsError> + Unpin,
    {
        match timeout(self.config.write_wait, sink.send(message)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(WebSocketError::TransportError(e.to_string())),
            Err(_) => Err(WebSocketError::WriteTimeout),
        }
    }
}
