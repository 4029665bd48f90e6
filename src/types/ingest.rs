//! Spreadsheet replace-upload types

use serde::{Deserialize, Serialize};

/// Upload that replaces every record of one customer scope
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceUploadRequest {
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub file_base64: Option<String>,
    #[serde(default)]
    pub customer_name: Option<String>,
}

/// Rows removed and inserted by one replace transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceCounts {
    pub deleted_count: u64,
    pub inserted_count: u64,
}

/// Caller-visible outcome of a replace upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceSummary {
    pub message: String,
    pub customer_name: Option<String>,
    pub deleted_count: u64,
    pub inserted_count: u64,
    pub rows_read: usize,
}
