//! User database queries

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::user::{User, ROLE_CUSTOMER};

const USER_COLUMNS: &str =
    "id, email, password_hash, name, role, customer_name, disabled, created_at, updated_at";

/// Get user by email (for login). Emails are compared case-insensitively.
pub async fn get_user_by_email(pool: &PgPool, email: &str) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE LOWER(email) = LOWER($1)"
    ))
    .bind(email.trim())
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

/// Create a user, or update password, name, role and customer of an existing email.
pub async fn upsert_user(
    pool: &PgPool,
    email: &str,
    password_hash: &str,
    name: &str,
    role: &str,
    customer_name: Option<&str>,
) -> Result<User> {
    let user = sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (id, email, password_hash, name, role, customer_name)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (email) DO UPDATE
        SET password_hash = EXCLUDED.password_hash,
            name = EXCLUDED.name,
            role = EXCLUDED.role,
            customer_name = EXCLUDED.customer_name,
            disabled = FALSE,
            updated_at = NOW()
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(name)
    .bind(role)
    .bind(customer_name)
    .fetch_one(pool)
    .await?;

    Ok(user)
}

/// Enabled customer accounts, ordered for display
pub async fn list_customer_accounts(pool: &PgPool) -> Result<Vec<User>> {
    let users = sqlx::query_as::<_, User>(&format!(
        r#"
        SELECT {USER_COLUMNS}
        FROM users
        WHERE role = $1 AND disabled = FALSE
        ORDER BY customer_name NULLS LAST, name
        "#
    ))
    .bind(ROLE_CUSTOMER)
    .fetch_all(pool)
    .await?;

    Ok(users)
}
