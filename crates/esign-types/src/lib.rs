//! Shared entity and wire types for the e-signature service.
//!
//! Everything here is persistence-shape: the API crate maps database rows
//! into these types and serves them unchanged.

mod activity;
mod document;
mod recipient;
mod tool;
mod user;

pub use activity::{Activity, ActivityKind};
pub use document::{Document, DocumentStatus, PublishedStatus};
pub use recipient::{DocumentRecipient, RecipientStatus};
pub use tool::{
    AssignmentStatus, DocumentTool, TextStyle, ToolAssignment, ToolType, ToolValue,
};
pub use user::{SignatureRecord, SignatureType, User};

use thiserror::Error;

/// Failure to parse a persisted enum discriminant.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind} value: {value}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    pub(crate) fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}
