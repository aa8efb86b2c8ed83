use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

/// Registered account. The password hash never leaves the API crate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureType {
    /// Rendered from a font the user picked.
    Premade,
    /// Captured stroke image.
    Drawn,
}

impl SignatureType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Premade => "premade",
            Self::Drawn => "drawn",
        }
    }
}

impl std::fmt::Display for SignatureType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "premade" => Ok(Self::Premade),
            "drawn" => Ok(Self::Drawn),
            other => Err(ParseEnumError::new("signature type", other)),
        }
    }
}

/// A user's saved signature. At most one per user; writes are upserts keyed
/// on the owning user id. Payloads are opaque: text for `premade`, a base64
/// data URL for `drawn`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: String,
    pub user_id: String,
    pub signature_type: SignatureType,
    pub signature_data: String,
    pub initials_data: String,
    pub updated_at: DateTime<Utc>,
}
