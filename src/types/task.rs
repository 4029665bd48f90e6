//! Program task types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Program tracker task
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: i64,
    pub workstream: String,
    pub deliverable: String,
    pub status: String,
    pub progress: f64,
    pub phase: String,
    pub milestone: String,
    pub owner: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub customer_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Task parsed from a spreadsheet row, not yet persisted
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub workstream: String,
    pub deliverable: String,
    pub status: String,
    pub progress: f64,
    pub phase: String,
    pub milestone: String,
    pub owner: String,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub customer_name: Option<String>,
}

/// Inline edit of a task. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTaskRequest {
    pub id: i64,
    pub workstream: Option<String>,
    pub deliverable: Option<String>,
    pub status: Option<String>,
    pub progress: Option<f64>,
    pub phase: Option<String>,
    pub milestone: Option<String>,
    pub owner: Option<String>,
    pub customer_name: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}
