use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

/// Append-only audit log categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    DocumentUploaded,
    DocumentShared,
    DocumentViewed,
    DocumentSigned,
    DocumentCompleted,
    DocumentDeclined,
    DocumentCancelled,
    DocumentExpired,
    DocumentDeleted,
    SignatureSaved,
}

impl ActivityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DocumentUploaded => "document_uploaded",
            Self::DocumentShared => "document_shared",
            Self::DocumentViewed => "document_viewed",
            Self::DocumentSigned => "document_signed",
            Self::DocumentCompleted => "document_completed",
            Self::DocumentDeclined => "document_declined",
            Self::DocumentCancelled => "document_cancelled",
            Self::DocumentExpired => "document_expired",
            Self::DocumentDeleted => "document_deleted",
            Self::SignatureSaved => "signature_saved",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "document_uploaded" => Ok(Self::DocumentUploaded),
            "document_shared" => Ok(Self::DocumentShared),
            "document_viewed" => Ok(Self::DocumentViewed),
            "document_signed" => Ok(Self::DocumentSigned),
            "document_completed" => Ok(Self::DocumentCompleted),
            "document_declined" => Ok(Self::DocumentDeclined),
            "document_cancelled" => Ok(Self::DocumentCancelled),
            "document_expired" => Ok(Self::DocumentExpired),
            "document_deleted" => Ok(Self::DocumentDeleted),
            "signature_saved" => Ok(Self::SignatureSaved),
            other => Err(ParseEnumError::new("activity kind", other)),
        }
    }
}

/// Audit trail entry. Written once, never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Activity {
    pub id: String,
    pub user_id: String,
    pub document_id: Option<String>,
    pub kind: ActivityKind,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}
