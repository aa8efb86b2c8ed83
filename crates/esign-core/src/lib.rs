//! Core document-signing logic: lifecycle state machine, field assignment,
//! token issuance and the recipient signing session.
//!
//! Everything in this crate is pure. Persistence and transport live in the
//! API crate; these functions operate on the shared types and are the single
//! source of truth for which transitions are legal.

pub mod assignment;
pub mod lifecycle;
pub mod session;
pub mod token;

pub use assignment::{
    assign_recipient, document_is_complete, recipient_is_complete, record_signature,
    unassign_recipient, SignOutcome,
};
pub use lifecycle::{
    ensure_can_cancel, ensure_can_publish, ensure_can_unpublish, ensure_tool_mutable,
    ensure_tools_editable, publish_recipient_emails,
};
pub use session::{
    CaptureSource, FieldSubmission, SessionError, SessionField, SessionPhase, SigningSession,
};
pub use token::{expiry_from_days, generate_publish_link, generate_token, is_expired};

use esign_types::DocumentStatus;
use thiserror::Error;

/// Domain-rule violations. The API crate maps these onto its HTTP error
/// taxonomy; nothing here knows about status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    #[error("operation not allowed while document is {status}")]
    InvalidState { status: DocumentStatus },

    #[error("no recipients are assigned to any signature field")]
    NoRecipients,

    #[error("{email} is not assigned to this field")]
    NotAssigned { email: String },

    #[error("assignment for {email} is already signed")]
    AssignmentSigned { email: String },

    #[error("a different signature is already recorded for {email}")]
    SignatureConflict { email: String },

    #[error("field {tool_id} has a captured signature and cannot be modified")]
    ToolFrozen { tool_id: String },
}
