use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::ParseEnumError;

/// The eight placeable field kinds. `My*` fields belong to the document owner
/// and are filled from the owner's profile/signature records; `Recipient*`
/// fields must be assigned to at least one recipient before publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    MySignature,
    MyInitial,
    MyEmail,
    MyFullname,
    RecipientSignature,
    RecipientInitial,
    RecipientEmail,
    RecipientFullname,
}

impl ToolType {
    pub fn is_owner_field(self) -> bool {
        matches!(
            self,
            Self::MySignature | Self::MyInitial | Self::MyEmail | Self::MyFullname
        )
    }

    pub fn is_recipient_field(self) -> bool {
        !self.is_owner_field()
    }

    /// Whether a filled value for this field is a signature image rather
    /// than plain text.
    pub fn takes_signature_image(self) -> bool {
        matches!(
            self,
            Self::MySignature | Self::MyInitial | Self::RecipientSignature | Self::RecipientInitial
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::MySignature => "my_signature",
            Self::MyInitial => "my_initial",
            Self::MyEmail => "my_email",
            Self::MyFullname => "my_fullname",
            Self::RecipientSignature => "recipient_signature",
            Self::RecipientInitial => "recipient_initial",
            Self::RecipientEmail => "recipient_email",
            Self::RecipientFullname => "recipient_fullname",
        }
    }
}

impl std::fmt::Display for ToolType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "my_signature" => Ok(Self::MySignature),
            "my_initial" => Ok(Self::MyInitial),
            "my_email" => Ok(Self::MyEmail),
            "my_fullname" => Ok(Self::MyFullname),
            "recipient_signature" => Ok(Self::RecipientSignature),
            "recipient_initial" => Ok(Self::RecipientInitial),
            "recipient_email" => Ok(Self::RecipientEmail),
            "recipient_fullname" => Ok(Self::RecipientFullname),
            other => Err(ParseEnumError::new("tool type", other)),
        }
    }
}

/// A filled field value. The tag removes any need to sniff whether a string
/// "looks like" base64 image data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ToolValue {
    /// Plain text (names, emails, typed values).
    Text(String),
    /// A captured signature or initials image as a base64 data URL,
    /// exactly as the client produced it.
    SignatureImage(String),
}

/// Per-recipient state on a single field. A field may be assigned to several
/// recipients; each entry tracks its own completion independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolAssignment {
    /// Row id of the DocumentRecipient created at publish time. Absent while
    /// the document is still a draft.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    pub email: String,
    pub name: String,
    pub status: AssignmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<ToolValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signed_at: Option<DateTime<Utc>>,
}

impl ToolAssignment {
    pub fn pending(email: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            recipient_id: None,
            email: email.into(),
            name: name.into(),
            status: AssignmentStatus::Pending,
            signature: None,
            signed_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Pending,
    Signed,
}

/// Text rendering attributes for a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextStyle {
    pub font_family: String,
    pub font_size: f64,
    pub font_color: String,
    pub bold: bool,
    pub italic: bool,
    pub underline: bool,
}

impl Default for TextStyle {
    fn default() -> Self {
        Self {
            font_family: "Helvetica".to_string(),
            font_size: 14.0,
            font_color: "#000000".to_string(),
            bold: false,
            italic: false,
            underline: false,
        }
    }
}

/// A placed field on a document page. Coordinates and dimensions are stored
/// verbatim in client units; the server never converts them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTool {
    /// Client-assigned tool id, unique within the document.
    pub id: String,
    pub tool_type: ToolType,
    pub label: String,
    pub page: u32,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub style: TextStyle,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<ToolValue>,
    #[serde(default)]
    pub assigned_recipients: Vec<ToolAssignment>,
}

impl DocumentTool {
    /// True once any assignment on this field carries a captured signature.
    /// Such fields are frozen: no repositioning, restyling or unassignment.
    pub fn has_signed_assignment(&self) -> bool {
        self.assigned_recipients
            .iter()
            .any(|a| a.status == AssignmentStatus::Signed)
    }

    pub fn assignment_for(&self, email: &str) -> Option<&ToolAssignment> {
        self.assigned_recipients
            .iter()
            .find(|a| a.email.eq_ignore_ascii_case(email))
    }
}
