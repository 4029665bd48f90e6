//! Infrastructure setup task types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Infra setup tracker task
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct InfraTask {
    pub id: i64,
    pub infra_phase: String,
    pub task_name: String,
    pub status: String,
    pub percent_complete: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub owner: String,
    pub customer_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Infra task parsed from a spreadsheet row, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewInfraTask {
    pub infra_phase: String,
    pub task_name: String,
    pub status: String,
    pub percent_complete: f64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub owner: String,
    pub customer_name: Option<String>,
}

/// Inline edit of an infra task. The customer scope is not editable here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateInfraTaskRequest {
    pub id: i64,
    pub infra_phase: Option<String>,
    pub task_name: Option<String>,
    pub status: Option<String>,
    pub percent_complete: Option<f64>,
    pub owner: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}
