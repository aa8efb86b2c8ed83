use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecipientStatus {
    Pending,
    Viewed,
    Signed,
    Declined,
    Expired,
}

impl RecipientStatus {
    /// States from which a recipient can still submit signatures.
    pub fn can_sign(self) -> bool {
        matches!(self, Self::Pending | Self::Viewed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Viewed => "viewed",
            Self::Signed => "signed",
            Self::Declined => "declined",
            Self::Expired => "expired",
        }
    }
}

impl std::fmt::Display for RecipientStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "viewed" => Ok(Self::Viewed),
            "signed" => Ok(Self::Signed),
            "declined" => Ok(Self::Declined),
            "expired" => Ok(Self::Expired),
            other => Err(ParseEnumError::new("recipient status", other)),
        }
    }
}

/// One row per (document, recipient email), created at publish time and kept
/// forever as audit trail. The token is the recipient's only credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecipient {
    pub id: String,
    pub document_id: String,
    pub email: String,
    pub name: String,
    pub status: RecipientStatus,
    pub signing_order: i64,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub reminders_sent: i64,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
