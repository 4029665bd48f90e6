//! Authentication utilities: password hashing, session tokens and role scoping

use anyhow::{anyhow, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::db::queries;
use crate::services::customer_name::normalize_customer_name;
use crate::types::{Request, SessionUser, UserPublic, ROLE_ADMIN, ROLE_CUSTOMER, ROLE_EMPLOYEE};

/// Why a request could not be authenticated or authorized
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Account disabled")]
    Disabled,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("Session lookup failed: {0:#}")]
    Database(anyhow::Error),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Unauthenticated => "UNAUTHORIZED",
            AuthError::Disabled | AuthError::Forbidden(_) => "FORBIDDEN",
            AuthError::Database(_) => "DATABASE_ERROR",
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone)]
pub struct AuthInfo {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub customer_name: Option<String>,
}

impl AuthInfo {
    /// Admins and employees work across customers
    pub fn is_staff(&self) -> bool {
        self.role == ROLE_ADMIN || self.role == ROLE_EMPLOYEE
    }

    pub fn require_staff(&self) -> Result<(), AuthError> {
        if self.is_staff() {
            Ok(())
        } else {
            Err(AuthError::Forbidden("Employee or admin role required"))
        }
    }

    /// Customer scope for reads.
    ///
    /// Staff may ask for any customer (or none for all rows). A customer
    /// account is always pinned to its own customer name.
    pub fn data_scope(&self, requested: Option<&str>) -> Result<Option<String>, AuthError> {
        if self.is_staff() {
            return Ok(normalize_customer_name(requested));
        }
        self.own_customer().map(Some)
    }

    /// Scope guard for writes: `None` lets staff touch any row.
    pub fn write_scope(&self) -> Result<Option<String>, AuthError> {
        if self.is_staff() {
            return Ok(None);
        }
        self.own_customer().map(Some)
    }

    fn own_customer(&self) -> Result<String, AuthError> {
        if self.role != ROLE_CUSTOMER {
            return Err(AuthError::Forbidden("Unknown role"));
        }
        normalize_customer_name(self.customer_name.as_deref())
            .ok_or(AuthError::Forbidden("Customer account has no customer assigned"))
    }

    pub fn public(&self) -> UserPublic {
        UserPublic {
            id: self.user_id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.clone(),
            customer_name: self.customer_name.clone(),
        }
    }
}

impl From<SessionUser> for AuthInfo {
    fn from(session: SessionUser) -> Self {
        Self {
            user_id: session.user_id,
            email: session.email,
            name: session.name,
            role: session.role,
            customer_name: session.customer_name,
        }
    }
}

/// Outcome of checking a stored session against the idle policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCheck {
    Expired,
    /// Live session; `extend_to` is the new expiry when idle expiry is on
    Active { extend_to: Option<DateTime<Utc>> },
}

/// Apply the idle policy. Without an idle timeout sessions never expire.
pub fn check_session(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>, idle: Option<Duration>) -> SessionCheck {
    let Some(idle) = idle else {
        return SessionCheck::Active { extend_to: None };
    };
    match expires_at {
        Some(expires_at) if expires_at < now => SessionCheck::Expired,
        _ => SessionCheck::Active {
            extend_to: Some(now + idle),
        },
    }
}

/// Expiry of a freshly created session
pub fn initial_expiry(now: DateTime<Utc>, idle: Option<Duration>) -> Option<DateTime<Utc>> {
    idle.map(|idle| now + idle)
}

/// Resolve the caller from the request's session token.
///
/// Expired sessions are deleted. Live sessions slide forward when idle
/// expiry is enabled; a failed extension is logged and the request proceeds.
pub async fn authenticate<T>(
    pool: &PgPool,
    request: &Request<T>,
    idle: Option<Duration>,
) -> Result<AuthInfo, AuthError> {
    let token = match request.token.as_deref().map(str::trim) {
        Some(token) if !token.is_empty() => token,
        _ => return Err(AuthError::Unauthenticated),
    };
    let token_hash = hash_token(token);

    let session = queries::session::find_session_with_user(pool, &token_hash)
        .await
        .map_err(AuthError::Database)?
        .ok_or(AuthError::Unauthenticated)?;

    match check_session(session.expires_at, Utc::now(), idle) {
        SessionCheck::Expired => {
            if let Err(e) = queries::session::delete_session(pool, &token_hash).await {
                warn!("Failed to delete expired session: {}", e);
            }
            return Err(AuthError::Unauthenticated);
        }
        SessionCheck::Active { extend_to: Some(expires_at) } => {
            if let Err(e) = queries::session::extend_session(pool, &token_hash, expires_at).await {
                warn!("Failed to extend session expiry: {}", e);
            }
        }
        SessionCheck::Active { extend_to: None } => {}
    }

    if session.disabled {
        return Err(AuthError::Disabled);
    }

    Ok(AuthInfo::from(session))
}

/// Random 32-byte session token, hex encoded
pub fn generate_session_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

/// Stored form of a session token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("Failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(hash).map_err(|e| anyhow!("Invalid password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn caller(role: &str, customer: Option<&str>) -> AuthInfo {
        AuthInfo {
            user_id: Uuid::new_v4(),
            email: "someone@example.com".to_string(),
            name: "Someone".to_string(),
            role: role.to_string(),
            customer_name: customer.map(str::to_string),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 15, h, m, 0).unwrap()
    }

    // ---- Password hashing tests ----

    #[test]
    fn test_hash_password_produces_valid_hash() {
        let hash = hash_password("my-secure-password").unwrap();
        assert!(hash.starts_with("$argon2"));
    }

    #[test]
    fn test_hash_password_different_each_time() {
        let hash1 = hash_password("same-password").unwrap();
        let hash2 = hash_password("same-password").unwrap();
        assert_ne!(hash1, hash2, "Hashes should differ due to random salt");
    }

    #[test]
    fn test_verify_password() {
        let hash = hash_password("correct-password").unwrap();
        assert!(verify_password("correct-password", &hash).unwrap());
        assert!(!verify_password("wrong-password", &hash).unwrap());
        assert!(verify_password("any-password", "not-a-valid-hash").is_err());
    }

    // ---- Session token tests ----

    #[test]
    fn test_session_tokens_are_random_hex() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_token_is_stable_sha256() {
        assert_eq!(hash_token("abc"), hash_token("abc"));
        assert_eq!(
            hash_token("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    // ---- Idle expiry tests ----

    #[test]
    fn test_sessions_never_expire_without_idle_timeout() {
        assert_eq!(check_session(Some(at(8, 0)), at(12, 0), None), SessionCheck::Active { extend_to: None });
        assert_eq!(initial_expiry(at(8, 0), None), None);
    }

    #[test]
    fn test_live_session_slides_forward() {
        let idle = Duration::minutes(30);
        assert_eq!(
            check_session(Some(at(12, 10)), at(12, 0), Some(idle)),
            SessionCheck::Active { extend_to: Some(at(12, 30)) }
        );
    }

    #[test]
    fn test_past_expiry_is_expired() {
        let idle = Duration::minutes(30);
        assert_eq!(check_session(Some(at(11, 59)), at(12, 0), Some(idle)), SessionCheck::Expired);
    }

    #[test]
    fn test_session_created_before_idle_was_enabled_slides() {
        let idle = Duration::minutes(30);
        assert_eq!(
            check_session(None, at(12, 0), Some(idle)),
            SessionCheck::Active { extend_to: Some(at(12, 30)) }
        );
    }

    // ---- Role scoping tests ----

    #[test]
    fn test_staff_may_pick_any_customer() {
        for role in [ROLE_ADMIN, ROLE_EMPLOYEE] {
            let auth = caller(role, None);
            assert_eq!(auth.data_scope(Some("vip")).unwrap().as_deref(), Some("VIP"));
            assert_eq!(auth.data_scope(None).unwrap(), None);
            assert_eq!(auth.write_scope().unwrap(), None);
            assert!(auth.require_staff().is_ok());
        }
    }

    #[test]
    fn test_customer_is_pinned_to_own_scope() {
        let auth = caller(ROLE_CUSTOMER, Some("Routeware Inc"));
        assert_eq!(auth.data_scope(Some("VIP")).unwrap().as_deref(), Some("Routeware"));
        assert_eq!(auth.data_scope(None).unwrap().as_deref(), Some("Routeware"));
        assert_eq!(auth.write_scope().unwrap().as_deref(), Some("Routeware"));
        assert!(matches!(auth.require_staff(), Err(AuthError::Forbidden(_))));
    }

    #[test]
    fn test_customer_without_customer_name_is_forbidden() {
        let auth = caller(ROLE_CUSTOMER, Some("  "));
        let err = auth.data_scope(None).unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[test]
    fn test_auth_error_codes() {
        assert_eq!(AuthError::Unauthenticated.code(), "UNAUTHORIZED");
        assert_eq!(AuthError::Disabled.code(), "FORBIDDEN");
        assert_eq!(AuthError::Disabled.to_string(), "Account disabled");
        assert_eq!(AuthError::Database(anyhow!("down")).code(), "DATABASE_ERROR");
    }
}
