//! User and session types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EMPLOYEE: &str = "employee";
pub const ROLE_CUSTOMER: &str = "customer";

/// User account
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: String,
    pub customer_name: Option<String>,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// User without sensitive data (for API responses)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPublic {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub customer_name: Option<String>,
}

impl From<User> for UserPublic {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            role: user.role,
            customer_name: user.customer_name,
        }
    }
}

/// Session joined with its owning user
#[derive(Debug, Clone, FromRow)]
pub struct SessionUser {
    pub expires_at: Option<DateTime<Utc>>,
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub customer_name: Option<String>,
    pub disabled: bool,
}

/// Successful login reply
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserPublic,
}

/// Current-user reply
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    pub user: UserPublic,
    pub logo_url: Option<String>,
}

/// Customer tile shown on the employee landing page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerEntry {
    pub id: Uuid,
    pub name: String,
    pub customer_name: Option<String>,
    pub logo_url: Option<String>,
}
