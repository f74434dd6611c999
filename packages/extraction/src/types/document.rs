//! Persisted document and extraction records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a document. Transitions `Pending -> Success | Failed`
/// once per processing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Success,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Outcome of validating a candidate value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Valid,
    Warning,
    Invalid,
    /// No validator exists for the field.
    NotValidated,
}

impl ValidationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "valid",
            Self::Warning => "warning",
            Self::Invalid => "invalid",
            Self::NotValidated => "not_validated",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "valid" => Some(Self::Valid),
            "warning" => Some(Self::Warning),
            "invalid" => Some(Self::Invalid),
            "not_validated" => Some(Self::NotValidated),
            _ => None,
        }
    }
}

/// One stored document. There is exactly one record per unique content hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: i64,
    pub filename: String,
    pub file_path: String,
    pub content_hash: String,
    pub file_size_bytes: i64,
    pub file_type: String,
    pub status: DocumentStatus,
    pub processed_at: Option<DateTime<Utc>>,
    pub processing_time_seconds: Option<f64>,
    pub error_message: Option<String>,
}

/// One determination for one field of one document.
///
/// Rows are append-only: the "current" value of a field is the most recent
/// row per `(document_id, field_name)`. Earlier rows are kept as provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    pub document_id: i64,
    pub field_name: String,
    pub value: String,
    pub confidence: f64,
    pub context: String,
    pub validation_status: ValidationStatus,
    pub validation_message: Option<String>,
    pub source_urls: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// Latest determination of a field, as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDetail {
    pub value: String,
    pub confidence: f64,
    pub validation_status: ValidationStatus,
    pub validation_message: Option<String>,
}

/// A page fetched during field retrieval, kept for provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawledPageRecord {
    pub url: String,
    pub document_id: i64,
    pub field_name: String,
    pub title: String,
    pub content: String,
    pub status: String,
}
