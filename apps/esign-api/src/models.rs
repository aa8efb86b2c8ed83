//! Database rows and API request/response bodies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use esign_core::FieldSubmission;
use esign_types::{
    Document, DocumentRecipient, DocumentStatus, DocumentTool, RecipientStatus, SignatureType,
    TextStyle, ToolAssignment, ToolValue,
};

use crate::error::ApiError;

// ============================================================
// Database rows
// ============================================================

#[derive(Debug, Clone, FromRow)]
pub struct DbUser {
    pub id: String,
    pub first_name: String,
    pub last_name: String,
    pub address: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl DbUser {
    /// Wire shape without the password hash.
    pub fn into_user(self) -> esign_types::User {
        esign_types::User {
            id: self.id,
            first_name: self.first_name,
            last_name: self.last_name,
            address: self.address,
            email: self.email,
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSignature {
    pub id: String,
    pub user_id: String,
    pub signature_type: String,
    pub signature_data: String,
    pub initials_data: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbDocument {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_data: Vec<u8>,
    pub status: String,
    pub published_status: String,
    pub publish_link: Option<String>,
    pub publish_link_expires_at: Option<DateTime<Utc>>,
    pub published_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_by: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbDocument {
    pub fn status(&self) -> Result<DocumentStatus, ApiError> {
        self.status
            .parse()
            .map_err(|e: esign_types::ParseEnumError| ApiError::Internal(e.into()))
    }

    pub fn into_document(self) -> Result<Document, ApiError> {
        Ok(Document {
            status: self.status()?,
            published_status: self
                .published_status
                .parse()
                .map_err(|e: esign_types::ParseEnumError| ApiError::Internal(e.into()))?,
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            original_filename: self.original_filename,
            file_type: self.file_type,
            publish_link: self.publish_link,
            publish_link_expires_at: self.publish_link_expires_at,
            published_at: self.published_at,
            completed_at: self.completed_at,
            cancelled_by: self.cancelled_by,
            cancelled_at: self.cancelled_at,
            cancellation_reason: self.cancellation_reason,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbRecipient {
    pub id: String,
    pub document_id: String,
    pub email: String,
    pub name: String,
    pub token: String,
    pub status: String,
    pub signing_order: i64,
    pub viewed_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub reminders_sent: i64,
    pub decline_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DbRecipient {
    pub fn status(&self) -> Result<RecipientStatus, ApiError> {
        self.status
            .parse()
            .map_err(|e: esign_types::ParseEnumError| ApiError::Internal(e.into()))
    }

    /// The token never appears in owner-facing recipient listings except at
    /// publish time, so the wire type omits it.
    pub fn into_recipient(self) -> Result<DocumentRecipient, ApiError> {
        Ok(DocumentRecipient {
            status: self.status()?,
            id: self.id,
            document_id: self.document_id,
            email: self.email,
            name: self.name,
            signing_order: self.signing_order,
            viewed_at: self.viewed_at,
            signed_at: self.signed_at,
            last_accessed_at: self.last_accessed_at,
            access_count: self.access_count,
            reminders_sent: self.reminders_sent,
            decline_reason: self.decline_reason,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbTool {
    pub id: String,
    pub document_id: String,
    pub tool_id: String,
    pub tool_type: String,
    pub label: String,
    pub page: i64,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub style_json: String,
    pub value_json: Option<String>,
    pub assigned_recipients_json: String,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DbTool {
    pub fn into_tool(self) -> Result<DocumentTool, ApiError> {
        let style: TextStyle = if self.style_json.is_empty() || self.style_json == "{}" {
            TextStyle::default()
        } else {
            serde_json::from_str(&self.style_json).map_err(|e| ApiError::Internal(e.into()))?
        };
        let value: Option<ToolValue> = match &self.value_json {
            Some(json) => {
                Some(serde_json::from_str(json).map_err(|e| ApiError::Internal(e.into()))?)
            }
            None => None,
        };
        let assigned_recipients: Vec<ToolAssignment> =
            serde_json::from_str(&self.assigned_recipients_json)
                .map_err(|e| ApiError::Internal(e.into()))?;

        Ok(DocumentTool {
            id: self.tool_id,
            tool_type: self
                .tool_type
                .parse()
                .map_err(|e: esign_types::ParseEnumError| ApiError::Internal(e.into()))?,
            label: self.label,
            page: self.page as u32,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            style,
            value,
            assigned_recipients,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct DbActivity {
    pub id: String,
    pub user_id: String,
    pub document_id: Option<String>,
    pub kind: String,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl DbActivity {
    pub fn into_activity(self) -> Result<esign_types::Activity, ApiError> {
        Ok(esign_types::Activity {
            kind: self
                .kind
                .parse()
                .map_err(|e: esign_types::ParseEnumError| ApiError::Internal(e.into()))?,
            id: self.id,
            user_id: self.user_id,
            document_id: self.document_id,
            title: self.title,
            description: self.description,
            created_at: self.created_at,
        })
    }
}

// ============================================================
// Auth bodies
// ============================================================

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterRequest {
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub address: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthResponse {
    pub user_id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub token: String,
}

// ============================================================
// Signature bodies
// ============================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UpsertSignatureRequest {
    pub signature_type: SignatureType,
    pub signature_data: String,
    pub initials_data: String,
}

// ============================================================
// Document bodies
// ============================================================

#[derive(Debug, Clone, Deserialize)]
pub struct UploadDocumentRequest {
    pub name: String,
    pub original_filename: String,
    pub file_type: String,
    pub file_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateDocumentRequest {
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CancelDocumentRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentDetailResponse {
    #[serde(flatten)]
    pub document: Document,
    pub recipients: Vec<DocumentRecipient>,
}

// ============================================================
// Tool bodies
// ============================================================

/// Partial per-tool update. Absent fields are left untouched; the update is
/// applied as one atomic row write guarded by `expected_version`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ToolPatchRequest {
    pub label: Option<String>,
    pub page: Option<u32>,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
    pub style: Option<TextStyle>,
    pub value: Option<ToolValue>,
    pub assigned_recipients: Option<Vec<ToolAssignment>>,
    pub expected_version: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<DocumentTool>,
}

// ============================================================
// Publish / sign bodies
// ============================================================

#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    #[serde(default)]
    pub expires_in_days: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishedRecipient {
    pub email: String,
    pub name: String,
    pub token: String,
    pub signing_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PublishResponse {
    pub publish_link: String,
    pub publish_url: String,
    pub expires_at: DateTime<Utc>,
    pub recipients: Vec<PublishedRecipient>,
}

/// Everything a recipient needs to render and sign: document bytes plus only
/// their own fields.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedDocumentResponse {
    pub document_id: String,
    pub name: String,
    pub file_type: String,
    pub file_base64: String,
    pub status: DocumentStatus,
    pub recipient_email: String,
    pub recipient_name: String,
    pub recipient_status: RecipientStatus,
    pub tools: Vec<DocumentTool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignRequest {
    /// Recipient signing token; optional when the caller authenticates with
    /// a bearer token and is a recipient by email.
    #[serde(default)]
    pub token: Option<String>,
    pub signatures: Vec<FieldSubmission>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignResponse {
    pub recorded: usize,
    pub recipient_status: RecipientStatus,
    pub document_status: DocumentStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeclineRequest {
    pub token: String,
    #[serde(default)]
    pub reason: Option<String>,
}

// ============================================================
// Aggregate views
// ============================================================

#[derive(Debug, Clone, Serialize)]
pub struct OverviewStats {
    pub total_documents: i64,
    pub draft: i64,
    pub pending_signatures: i64,
    pub completed: i64,
    pub expired: i64,
    pub cancelled: i64,
    pub shared_with_me: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenQuery {
    #[serde(default)]
    pub token: Option<String>,
}
