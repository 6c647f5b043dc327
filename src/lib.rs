pub mod auth;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod websocket;

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, HttpResponse};
use sqlx::PgPool;
use tracing::info;

pub use error::AppError;
pub type Result<T> = std::result::Result<T, AppError>;
pub use config::Settings;

pub use auth::TokenService;
pub use chat::{AccountStore, InMemoryChatStore, MembershipResolver, MessageService, MessageStore};
pub use db::{DbOperations, DbPoolStatus};
pub use websocket::{Hub, PumpConfig, WebSocketServer};

use config::StorageBackend;

/// Health check endpoint handler
/// Returns a JSON response with server status, timestamp, live connections
/// and, for the Postgres backend, pool usage
pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let database = state.db_pool.as_deref().map(DbPoolStatus::of);
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "connections": state.hub.connection_count().await,
        "database": database,
    }))
}

/// Application state shared across all components
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    pub accounts: Arc<dyn AccountStore>,
    pub membership: Arc<dyn MembershipResolver>,
    pub tokens: Arc<TokenService>,
    pub hub: Arc<Hub>,
    pub messages: Arc<MessageService>,
    pub db_pool: Option<Arc<PgPool>>,
}

impl AppState {
    pub async fn new(config: Settings) -> Result<Self> {
        match config.storage.backend {
            StorageBackend::Postgres => {
                let db = DbOperations::new_with_options(
                    &config.database.url,
                    config.database.max_connections,
                    Duration::from_secs(5),
                )
                .await?;
                db.run_migrations().await?;
                let pool = db.pool();
                let mut state = Self::with_backend(config, Arc::new(db));
                state.db_pool = Some(pool);
                Ok(state)
            }
            StorageBackend::Memory => {
                info!("Using in-memory storage backend");
                Ok(Self::with_backend(config, Arc::new(InMemoryChatStore::new())))
            }
        }
    }

    /// Wires the hub and services on top of one storage backend.
    pub fn with_backend<B>(config: Settings, backend: Arc<B>) -> Self
    where
        B: AccountStore + MessageStore + MembershipResolver + 'static,
    {
        let tokens = Arc::new(TokenService::new(
            config.auth.jwt_secret.clone(),
            config.auth.token_expiry_hours,
        ));
        let hub = Arc::new(Hub::new(backend.clone()));
        let messages = Arc::new(MessageService::new(
            backend.clone(),
            backend.clone(),
            hub.clone(),
            config.gateway.echo_to_sender,
        ));

        Self {
            config: Arc::new(config),
            membership: backend.clone(),
            accounts: backend,
            tokens,
            hub,
            messages,
            db_pool: None,
        }
    }

    /// Builds the websocket gateway bound to this state's hub.
    pub fn gateway(&self) -> WebSocketServer {
        WebSocketServer::new(
            self.messages.clone(),
            self.tokens.clone(),
            PumpConfig::from(&self.config.gateway),
        )
    }

    pub async fn shutdown(&self) -> Result<()> {
        if let Some(pool) = &self.db_pool {
            pool.close().await;
        }
        Ok(())
    }
}
