//! Authentication handlers: login, logout, me, customers

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use async_nats::{Client, Subscriber};
use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::{self, AuthError};
use crate::db::queries;
use crate::services::customer_name::{default_logo_url, normalize_customer_name};
use crate::types::{
    CustomerEntry, EmptyPayload, ErrorResponse, LoginResponse, MeResponse, Request, SuccessResponse, UserPublic,
};

use super::HandlerContext;

pub const LOGIN_MAX_ATTEMPTS: usize = 5;
pub const LOGIN_WINDOW_SECS: u64 = 5 * 60;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogoutResponse {
    pub logged_out: bool,
}

// =============================================================================
// Rate limiting
// =============================================================================

/// In-memory limiter for login attempts, keyed by lowercased email
pub struct RateLimiter {
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    max_attempts: usize,
    window_secs: u64,
}

impl RateLimiter {
    pub fn new(max_attempts: usize, window_secs: u64) -> Self {
        Self {
            attempts: Mutex::new(HashMap::new()),
            max_attempts,
            window_secs,
        }
    }

    pub fn for_login() -> Self {
        Self::new(LOGIN_MAX_ATTEMPTS, LOGIN_WINDOW_SECS)
    }

    /// Returns true if the attempt is allowed, and records it.
    pub fn check_and_record(&self, key: &str) -> bool {
        let mut attempts = self.attempts.lock();
        let now = Instant::now();
        let window = std::time::Duration::from_secs(self.window_secs);

        let entry = attempts.entry(key.trim().to_lowercase()).or_default();
        entry.retain(|t| now.duration_since(*t) < window);

        if entry.len() >= self.max_attempts {
            return false;
        }

        entry.push(now);
        true
    }

    /// Drop keys whose attempts have all aged out
    pub fn cleanup(&self) {
        let mut attempts = self.attempts.lock();
        let now = Instant::now();
        let window = std::time::Duration::from_secs(self.window_secs);

        attempts.retain(|_, entries| {
            entries.retain(|t| now.duration_since(*t) < window);
            !entries.is_empty()
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.attempts.lock().len()
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle auth.login messages
pub async fn handle_login(
    client: Client,
    mut subscriber: Subscriber,
    ctx: HandlerContext,
    rate_limiter: Arc<RateLimiter>,
) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received auth.login message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<LoginRequest> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse login request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let payload = &request.payload;

        if payload.email.trim().is_empty() || payload.password.is_empty() {
            let error = ErrorResponse::new(request.id, "VALIDATION_ERROR", "Email and password are required");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        if !rate_limiter.check_and_record(&payload.email) {
            warn!("Rate limited login attempt for: {}", payload.email);
            let error = ErrorResponse::new(request.id, "RATE_LIMITED", "Too many login attempts. Please try again later.");
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let user = match queries::user::get_user_by_email(&ctx.pool, &payload.email).await {
            Ok(Some(user)) => user,
            Ok(None) => {
                let error = ErrorResponse::new(request.id, "INVALID_CREDENTIALS", "Invalid email or password");
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
            Err(e) => {
                error!("Database error during login: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match auth::verify_password(&payload.password, &user.password_hash) {
            Ok(true) => {}
            Ok(false) => {
                let error = ErrorResponse::new(request.id, "INVALID_CREDENTIALS", "Invalid email or password");
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
            Err(e) => {
                error!("Password verification error: {}", e);
                let error = ErrorResponse::new(request.id, "INTERNAL_ERROR", "Failed to verify password");
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        }

        if user.disabled {
            let error = ErrorResponse::new(request.id, "FORBIDDEN", AuthError::Disabled.to_string());
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let token = auth::generate_session_token();
        let expires_at = auth::initial_expiry(Utc::now(), ctx.session_idle);

        if let Err(e) = queries::session::create_session(&ctx.pool, &auth::hash_token(&token), user.id, expires_at).await {
            error!("Failed to create session: {}", e);
            let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
            let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            continue;
        }

        let login_response = LoginResponse {
            token,
            expires_at,
            user: UserPublic::from(user),
        };
        info!("User logged in: {}", login_response.user.email);
        let response = SuccessResponse::new(request.id, login_response);
        let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
    }

    Ok(())
}

/// Handle auth.logout messages
pub async fn handle_logout(client: Client, mut subscriber: Subscriber, ctx: HandlerContext) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received auth.logout message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse logout request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let token = match request.token.as_deref().map(str::trim) {
            Some(token) if !token.is_empty() => token,
            _ => {
                let error = ErrorResponse::new(request.id, "UNAUTHORIZED", AuthError::Unauthenticated.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queries::session::delete_session(&ctx.pool, &auth::hash_token(token)).await {
            Ok(logged_out) => {
                let response = SuccessResponse::new(request.id, LogoutResponse { logged_out });
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to delete session: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}

/// Handle auth.me messages
pub async fn handle_me(client: Client, mut subscriber: Subscriber, ctx: HandlerContext) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received auth.me message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse me request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let auth_info = match auth::authenticate(&ctx.pool, &request, ctx.session_idle).await {
            Ok(info) => info,
            Err(e) => {
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let canonical = normalize_customer_name(auth_info.customer_name.as_deref());
        let me = MeResponse {
            user: auth_info.public(),
            logo_url: default_logo_url(canonical.as_deref()).map(str::to_string),
        };
        let response = SuccessResponse::new(request.id, me);
        let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
    }

    Ok(())
}

/// Handle auth.customers messages: customer accounts for the staff landing page
pub async fn handle_customers(client: Client, mut subscriber: Subscriber, ctx: HandlerContext) -> Result<()> {
    while let Some(msg) = subscriber.next().await {
        debug!("Received auth.customers message");

        let reply = match msg.reply {
            Some(ref reply) => reply.clone(),
            None => {
                warn!("Message without reply subject");
                continue;
            }
        };

        let request: Request<EmptyPayload> = match serde_json::from_slice(&msg.payload) {
            Ok(req) => req,
            Err(e) => {
                error!("Failed to parse customers request: {}", e);
                let error = ErrorResponse::new(Uuid::nil(), "INVALID_REQUEST", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        let auth_info = match auth::authenticate(&ctx.pool, &request, ctx.session_idle)
            .await
            .and_then(|info| info.require_staff().map(|_| info))
        {
            Ok(info) => info,
            Err(e) => {
                let error = ErrorResponse::new(request.id, e.code(), e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
                continue;
            }
        };

        match queries::user::list_customer_accounts(&ctx.pool).await {
            Ok(users) => {
                let entries: Vec<CustomerEntry> = users
                    .into_iter()
                    .map(|user| {
                        let customer_name = normalize_customer_name(user.customer_name.as_deref());
                        CustomerEntry {
                            id: user.id,
                            name: user.name,
                            logo_url: default_logo_url(customer_name.as_deref()).map(str::to_string),
                            customer_name,
                        }
                    })
                    .collect();
                debug!("Listed {} customer accounts for {}", entries.len(), auth_info.email);
                let response = SuccessResponse::new(request.id, entries);
                let _ = client.publish(reply, serde_json::to_vec(&response)?.into()).await;
            }
            Err(e) => {
                error!("Failed to list customer accounts: {}", e);
                let error = ErrorResponse::new(request.id, "DATABASE_ERROR", e.to_string());
                let _ = client.publish(reply, serde_json::to_vec(&error)?.into()).await;
            }
        }
    }

    Ok(())
}
