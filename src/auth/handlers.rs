use actix_web::{web, HttpRequest, HttpResponse};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::chat::{Account, IdentityVerifier, ParticipantId};
use crate::error::{AppError, AuthError};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub login: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub login: String,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: Account,
}

pub async fn register(
    req: web::Json<RegisterRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let login = req.login.trim();
    if login.is_empty() {
        return Err(AppError::ValidationError("login cannot be empty".into()));
    }

    info!("Received registration request for login: {}", login);
    let user = match state.accounts.create_account(login, req.name.as_deref()).await {
        Ok(user) => user,
        Err(e) => {
            error!("Registration failed for login: {}: {}", login, e);
            return Err(e);
        }
    };

    let token = state.tokens.issue(user.id)?;
    Ok(HttpResponse::Created().json(AuthResponse { token, user }))
}

pub async fn login(
    req: web::Json<LoginRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    info!("Received login request for login: {}", req.login);
    let user = state
        .accounts
        .find_account_by_login(req.login.trim())
        .await?
        .ok_or(AppError::AuthError(AuthError::InvalidCredentials))?;

    let token = state.tokens.issue(user.id)?;
    info!("Login successful for user {}", user.id);
    Ok(HttpResponse::Ok().json(AuthResponse { token, user }))
}

/// The signed-in account.
pub async fn me(http: HttpRequest, state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let caller = authenticated_participant(&http, &state)?;
    let user = state
        .accounts
        .find_account(caller)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("account {}", caller)))?;
    Ok(HttpResponse::Ok().json(user))
}

/// Identity behind the request's `Authorization: Bearer` token.
pub(crate) fn authenticated_participant(req: &HttpRequest, state: &AppState) -> Result<ParticipantId, AppError> {
    let token = req
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .ok_or(AppError::AuthError(AuthError::MissingToken))?;

    state.tokens.verify(token)
}
