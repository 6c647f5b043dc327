use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use relay_server::auth::handlers::{login, me, register};
use relay_server::chat::handlers::{
    create_conversation, delete_conversation, delete_message, list_conversations, list_messages, send_message,
};
use relay_server::{health_check, AppState, Settings};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    let config = Settings::new().context("failed to load configuration")?;
    info!("Configuration loaded successfully");

    let state = AppState::new(config.clone())
        .await
        .context("failed to initialize application state")?;

    // Websocket gateway runs on its own listener
    let gateway = Arc::new(state.gateway());
    let listener = TcpListener::bind((config.gateway.host.as_str(), config.gateway.port))
        .await
        .with_context(|| format!("failed to bind gateway on {}:{}", config.gateway.host, config.gateway.port))?;
    let gateway_task = tokio::spawn(async move {
        if let Err(e) = gateway.run(listener).await {
            error!("Websocket gateway stopped: {}", e);
        }
    });

    info!("Starting HTTP API at {}:{}", config.server.host, config.server.port);
    let data = web::Data::new(state.clone());
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allowed_origin("http://localhost:3000")
            .allowed_methods(vec!["GET", "POST", "DELETE", "OPTIONS"])
            .allowed_headers(vec!["Authorization", "Content-Type"])
            .supports_credentials()
            .max_age(12 * 3600);

        App::new()
            .wrap(cors)
            .app_data(data.clone())
            .route("/health", web::get().to(health_check))
            .route("/auth/login", web::post().to(login))
            .route("/auth/register", web::post().to(register))
            .route("/me", web::get().to(me))
            .route("/conversations", web::get().to(list_conversations))
            .route("/conversations", web::post().to(create_conversation))
            .route("/conversations/{conversation_id}", web::delete().to(delete_conversation))
            .route("/conversations/{conversation_id}/messages", web::get().to(list_messages))
            .route("/conversations/{conversation_id}/messages", web::post().to(send_message))
            .route("/messages/{message_id}", web::delete().to(delete_message))
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .workers(config.server.workers as usize)
    .run();

    server.await.context("HTTP server failed")?;

    gateway_task.abort();
    state.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}
