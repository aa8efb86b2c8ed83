//! Document lifecycle guards.
//!
//! Status transitions:
//! `draft` -> publish -> `pending_signatures` -> all recipients signed ->
//! `completed`; the owner may cancel (`cancelled`) and unpublish or expiry
//! moves the document to `expired`. Unpublish is one-way: there is no path
//! back to `draft`.

use esign_types::{DocumentStatus, DocumentTool};

use crate::CoreError;

/// Tools may be placed, restyled or removed while the document is a draft or
/// still collecting signatures. Terminal documents are immutable.
pub fn ensure_tools_editable(status: DocumentStatus) -> Result<(), CoreError> {
    match status {
        DocumentStatus::Draft | DocumentStatus::PendingSignatures => Ok(()),
        status => Err(CoreError::InvalidState { status }),
    }
}

/// A field with any captured signature is frozen, even while the document as
/// a whole is still editable. Repositioning it would silently invalidate a
/// completed signature.
pub fn ensure_tool_mutable(tool: &DocumentTool) -> Result<(), CoreError> {
    if tool.has_signed_assignment() {
        return Err(CoreError::ToolFrozen {
            tool_id: tool.id.clone(),
        });
    }
    Ok(())
}

/// Publish is only legal from `draft`. Re-running a publish that failed
/// part-way is handled by the caller re-entering with the document still in
/// `draft` (the status flips last).
pub fn ensure_can_publish(status: DocumentStatus) -> Result<(), CoreError> {
    match status {
        DocumentStatus::Draft => Ok(()),
        status => Err(CoreError::InvalidState { status }),
    }
}

/// Cancellation applies only to documents that are out for signatures.
pub fn ensure_can_cancel(status: DocumentStatus) -> Result<(), CoreError> {
    match status {
        DocumentStatus::PendingSignatures => Ok(()),
        status => Err(CoreError::InvalidState { status }),
    }
}

/// Unpublish moves `pending_signatures` to `expired`. Calling it on an
/// already-expired document is a no-op, not an error.
pub fn ensure_can_unpublish(status: DocumentStatus) -> Result<(), CoreError> {
    match status {
        DocumentStatus::PendingSignatures | DocumentStatus::Expired => Ok(()),
        status => Err(CoreError::InvalidState { status }),
    }
}

/// Distinct recipient emails referenced by any recipient-type field, in first
/// appearance order. Empty means the document cannot be published.
pub fn publish_recipient_emails(tools: &[DocumentTool]) -> Result<Vec<(String, String)>, CoreError> {
    let mut recipients: Vec<(String, String)> = Vec::new();
    for tool in tools.iter().filter(|t| t.tool_type.is_recipient_field()) {
        for assignment in &tool.assigned_recipients {
            let email = assignment.email.to_ascii_lowercase();
            if !recipients.iter().any(|(e, _)| *e == email) {
                recipients.push((email, assignment.name.clone()));
            }
        }
    }
    if recipients.is_empty() {
        return Err(CoreError::NoRecipients);
    }
    Ok(recipients)
}

#[cfg(test)]
mod tests {
    use super::*;
    use esign_types::{TextStyle, ToolAssignment, ToolType};

    fn tool(id: &str, tool_type: ToolType, assigned: Vec<ToolAssignment>) -> DocumentTool {
        DocumentTool {
            id: id.into(),
            tool_type,
            label: String::new(),
            page: 1,
            x: 0.0,
            y: 0.0,
            width: 150.0,
            height: 60.0,
            style: TextStyle::default(),
            value: None,
            assigned_recipients: assigned,
        }
    }

    #[test]
    fn terminal_documents_reject_tool_edits() {
        for status in [
            DocumentStatus::Completed,
            DocumentStatus::Expired,
            DocumentStatus::Cancelled,
        ] {
            assert_eq!(
                ensure_tools_editable(status),
                Err(CoreError::InvalidState { status })
            );
            assert_eq!(
                ensure_can_publish(status),
                Err(CoreError::InvalidState { status })
            );
        }
    }

    #[test]
    fn pending_documents_allow_tool_edits() {
        assert!(ensure_tools_editable(DocumentStatus::Draft).is_ok());
        assert!(ensure_tools_editable(DocumentStatus::PendingSignatures).is_ok());
    }

    #[test]
    fn unpublish_is_idempotent_on_expired() {
        assert!(ensure_can_unpublish(DocumentStatus::PendingSignatures).is_ok());
        assert!(ensure_can_unpublish(DocumentStatus::Expired).is_ok());
        assert!(ensure_can_unpublish(DocumentStatus::Draft).is_err());
        assert!(ensure_can_unpublish(DocumentStatus::Completed).is_err());
    }

    #[test]
    fn publish_requires_assigned_recipients() {
        // Owner fields alone do not satisfy the precondition.
        let tools = vec![tool("t1", ToolType::MySignature, vec![])];
        assert_eq!(publish_recipient_emails(&tools), Err(CoreError::NoRecipients));

        let tools = vec![tool("t1", ToolType::RecipientSignature, vec![])];
        assert_eq!(publish_recipient_emails(&tools), Err(CoreError::NoRecipients));
    }

    #[test]
    fn publish_deduplicates_recipients_case_insensitively() {
        let tools = vec![
            tool(
                "t1",
                ToolType::RecipientSignature,
                vec![ToolAssignment::pending("Ann@Example.com", "Ann")],
            ),
            tool(
                "t2",
                ToolType::RecipientInitial,
                vec![
                    ToolAssignment::pending("ann@example.com", "Ann"),
                    ToolAssignment::pending("bo@example.com", "Bo"),
                ],
            ),
        ];
        let recipients = publish_recipient_emails(&tools).unwrap();
        assert_eq!(
            recipients,
            vec![
                ("ann@example.com".to_string(), "Ann".to_string()),
                ("bo@example.com".to_string(), "Bo".to_string()),
            ]
        );
    }

    #[test]
    fn signed_fields_are_frozen() {
        let mut assignment = ToolAssignment::pending("ann@example.com", "Ann");
        assignment.status = esign_types::AssignmentStatus::Signed;
        let frozen = tool("t1", ToolType::RecipientSignature, vec![assignment]);
        assert!(matches!(
            ensure_tool_mutable(&frozen),
            Err(CoreError::ToolFrozen { .. })
        ));

        let open = tool(
            "t2",
            ToolType::RecipientSignature,
            vec![ToolAssignment::pending("bo@example.com", "Bo")],
        );
        assert!(ensure_tool_mutable(&open).is_ok());
    }
}
