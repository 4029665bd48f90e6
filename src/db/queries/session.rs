//! Session database queries

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::user::SessionUser;

pub async fn create_session(
    pool: &PgPool,
    token_hash: &str,
    user_id: Uuid,
    expires_at: Option<DateTime<Utc>>,
) -> Result<()> {
    sqlx::query("INSERT INTO sessions (token_hash, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(token_hash)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(())
}

/// Load a session together with its user
pub async fn find_session_with_user(pool: &PgPool, token_hash: &str) -> Result<Option<SessionUser>> {
    let session = sqlx::query_as::<_, SessionUser>(
        r#"
        SELECT
            s.expires_at,
            u.id AS user_id, u.email, u.name, u.role, u.customer_name, u.disabled
        FROM sessions s
        JOIN users u ON u.id = s.user_id
        WHERE s.token_hash = $1
        "#,
    )
    .bind(token_hash)
    .fetch_optional(pool)
    .await?;

    Ok(session)
}

pub async fn extend_session(pool: &PgPool, token_hash: &str, expires_at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE sessions SET expires_at = $2 WHERE token_hash = $1")
        .bind(token_hash)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(())
}

/// Returns true if a session was removed
pub async fn delete_session(pool: &PgPool, token_hash: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM sessions WHERE token_hash = $1")
        .bind(token_hash)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}

pub async fn delete_expired_sessions(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM sessions WHERE expires_at IS NOT NULL AND expires_at < NOW()")
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}
