use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tracing::{error, info, warn};

use crate::chat::{IdentityVerifier, MessageService, ParticipantId};
use crate::error::{AppError, AuthError, WebSocketError};
use crate::websocket::connection::{Connection, PumpConfig};
use crate::websocket::hub::Outbox;

/// Upgrade endpoint path.
pub const WS_PATH: &str = "/ws";

/// Handshake entry point: authenticates the caller before upgrading, then
/// binds the new socket to the hub.
pub struct WebSocketServer {
    messages: Arc<MessageService>,
    verifier: Arc<dyn IdentityVerifier>,
    config: PumpConfig,
}

impl WebSocketServer {
    pub fn new(messages: Arc<MessageService>, verifier: Arc<dyn IdentityVerifier>, config: PumpConfig) -> Self {
        Self {
            messages,
            verifier,
            config,
        }
    }

    /// Accepts connections until the listener fails.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        info!(addr = %listener.local_addr()?, path = WS_PATH, "Websocket gateway listening");
        loop {
            let (stream, addr) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                server.handle_connection(stream, addr).await;
            });
        }
    }

    /// Performs the authenticated handshake for one TCP stream and starts
    /// the connection's pumps. Unauthenticated callers get a 401 and no
    /// socket.
    pub async fn handle_connection(self: Arc<Self>, raw_stream: TcpStream, addr: SocketAddr) {
        let mut identity: Option<ParticipantId> = None;
        let verifier = self.verifier.clone();

        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            if request.uri().path() != WS_PATH {
                return Err(reject(StatusCode::NOT_FOUND, "not found"));
            }
            match authenticate(verifier.as_ref(), request) {
                Ok(participant_id) => {
                    identity = Some(participant_id);
                    Ok(response)
                }
                Err(e) => {
                    warn!(peer = %addr, error = %e, "Rejected unauthenticated upgrade");
                    Err(reject(StatusCode::UNAUTHORIZED, "unauthorized"))
                }
            }
        };

        let handshake = tokio_tungstenite::accept_hdr_async_with_config(raw_stream, callback, Some(self.socket_config()));
        let ws_stream = match timeout(self.config.handshake_timeout, handshake).await {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                let err = WebSocketError::HandshakeError(e.to_string());
                error!(peer = %addr, error = %err, "Error during websocket handshake");
                return;
            }
            Err(_) => {
                warn!(peer = %addr, timeout = ?self.config.handshake_timeout, "Websocket handshake timed out, dropping peer");
                return;
            }
        };

        let Some(participant_id) = identity else {
            error!(peer = %addr, "Handshake completed without an identity");
            return;
        };

        let (outbox, outbox_rx) = Outbox::channel(participant_id, self.config.outbox_capacity);
        let connection = Connection::new(outbox.id(), participant_id, self.messages.clone(), self.config.clone());
        info!(
            peer = %addr,
            connection_id = %connection.id(),
            participant_id = connection.participant_id(),
            "Websocket connection established"
        );

        self.messages.hub().register(outbox).await;
        connection.spawn(ws_stream, outbox_rx);
    }

    fn socket_config(&self) -> WebSocketConfig {
        let mut config = WebSocketConfig::default();
        config.max_message_size = Some(self.config.max_message_size);
        config.max_frame_size = Some(self.config.max_message_size);
        config
    }
}

fn reject(status: StatusCode, body: &str) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(body.to_string()));
    *response.status_mut() = status;
    response
}

/// Bearer header first, then the `token` query parameter used by browsers.
pub fn extract_token(request: &Request) -> Option<String> {
    let from_header = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    from_header.or_else(|| {
        request.uri().query().and_then(|query| {
            url::form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "token")
                .map(|(_, value)| value.into_owned())
                .filter(|t| !t.is_empty())
        })
    })
}

fn authenticate(verifier: &dyn IdentityVerifier, request: &Request) -> Result<ParticipantId, AppError> {
    let token = extract_token(request).ok_or(AppError::AuthError(AuthError::MissingToken))?;
    verifier.verify(&token)
}
