use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportStatus {
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    pub request_id: String,
    pub user_id: String,
    pub format: ExportFormat,
    pub status: ExportStatus,
    /// Object path of the generated archive
    pub location: String,
    pub requested_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

/// Body of an export request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateExportRequest {
    pub user_id: String,
    pub format: ExportFormat,
}

/// Payload for data_export.completed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportCompletedPayload {
    pub request_id: String,
    pub user_id: String,
    pub format: ExportFormat,
    pub location: String,
}

/// Payload for data_export.requested (analytics)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequestedMetric {
    pub user_id: String,
    pub format: ExportFormat,
}
