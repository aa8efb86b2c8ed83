//! Field assignment model: the many-to-many relationship between
//! recipient-type fields and recipients, and the completion aggregates that
//! drive the `completed` transition.

use chrono::{DateTime, Utc};
use esign_types::{AssignmentStatus, DocumentTool, RecipientStatus, ToolAssignment, ToolValue};

use crate::CoreError;

/// Outcome of recording a signature on one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignOutcome {
    Recorded,
    /// The identical signature was already present. Re-submission is a no-op.
    AlreadySigned,
}

/// Add a recipient to a field. Keyed on email (case-insensitive); adding an
/// email that is already assigned is a no-op. Returns whether an entry was
/// appended.
pub fn assign_recipient(assignments: &mut Vec<ToolAssignment>, entry: ToolAssignment) -> bool {
    if assignments
        .iter()
        .any(|a| a.email.eq_ignore_ascii_case(&entry.email))
    {
        return false;
    }
    assignments.push(entry);
    true
}

/// Remove a recipient from a field. Signed entries cannot be removed; the
/// captured signature must be resolved explicitly first.
pub fn unassign_recipient(
    assignments: &mut Vec<ToolAssignment>,
    email: &str,
) -> Result<bool, CoreError> {
    let Some(idx) = assignments
        .iter()
        .position(|a| a.email.eq_ignore_ascii_case(email))
    else {
        return Ok(false);
    };
    if assignments[idx].status == AssignmentStatus::Signed {
        return Err(CoreError::AssignmentSigned {
            email: email.to_string(),
        });
    }
    assignments.remove(idx);
    Ok(true)
}

/// Record a captured signature for one recipient's entry on a field.
///
/// Re-submitting the exact payload already recorded is a no-op. Submitting a
/// different payload over a signed entry is a conflict: signed data is never
/// silently overwritten.
pub fn record_signature(
    assignments: &mut [ToolAssignment],
    email: &str,
    value: ToolValue,
    now: DateTime<Utc>,
) -> Result<SignOutcome, CoreError> {
    let entry = assignments
        .iter_mut()
        .find(|a| a.email.eq_ignore_ascii_case(email))
        .ok_or_else(|| CoreError::NotAssigned {
            email: email.to_string(),
        })?;

    if entry.status == AssignmentStatus::Signed {
        if entry.signature.as_ref() == Some(&value) {
            return Ok(SignOutcome::AlreadySigned);
        }
        return Err(CoreError::SignatureConflict {
            email: email.to_string(),
        });
    }

    entry.status = AssignmentStatus::Signed;
    entry.signature = Some(value);
    entry.signed_at = Some(now);
    Ok(SignOutcome::Recorded)
}

/// A recipient is done only when every field assigned to them across the
/// whole document is signed. A recipient with no assignments is never
/// complete.
pub fn recipient_is_complete(tools: &[DocumentTool], email: &str) -> bool {
    let mut found = false;
    for tool in tools.iter().filter(|t| t.tool_type.is_recipient_field()) {
        if let Some(assignment) = tool.assignment_for(email) {
            found = true;
            if assignment.status != AssignmentStatus::Signed {
                return false;
            }
        }
    }
    found
}

/// The document completes when every recipient has signed. A declined
/// recipient blocks completion until the owner cancels or reassigns.
pub fn document_is_complete(recipient_statuses: &[RecipientStatus]) -> bool {
    !recipient_statuses.is_empty()
        && recipient_statuses
            .iter()
            .all(|s| *s == RecipientStatus::Signed)
}


#[cfg(test)]
mod proptests {
    use super::*;
    use esign_types::{TextStyle, ToolType};
    use proptest::prelude::*;

    fn email() -> impl Strategy<Value = String> {
        "[a-z]{1,12}@[a-z]{2,8}\\.[a-z]{2,3}"
    }

    fn payload() -> impl Strategy<Value = ToolValue> {
        prop_oneof![
            "[A-Za-z0-9+/]{16,64}".prop_map(|d| ToolValue::SignatureImage(format!(
                "data:image/png;base64,{d}"
            ))),
            "[A-Za-z ]{1,32}".prop_map(ToolValue::Text),
        ]
    }

    fn tool_with(emails: Vec<String>) -> DocumentTool {
        DocumentTool {
            id: "t".into(),
            tool_type: ToolType::RecipientSignature,
            label: String::new(),
            page: 1,
            x: 0.0,
            y: 0.0,
            width: 150.0,
            height: 60.0,
            style: TextStyle::default(),
            value: None,
            assigned_recipients: emails
                .into_iter()
                .map(|e| ToolAssignment::pending(e, "R"))
                .collect(),
        }
    }

    proptest! {
        /// Assigning the same email any number of times leaves one entry.
        #[test]
        fn assign_never_duplicates(email in email(), repeats in 1usize..10) {
            let mut assignments = vec![];
            for _ in 0..repeats {
                assign_recipient(&mut assignments, ToolAssignment::pending(email.clone(), "R"));
            }
            prop_assert_eq!(assignments.len(), 1);
        }

        /// record_signature is idempotent for an identical payload and never
        /// mutates on conflict.
        #[test]
        fn record_signature_idempotent(email in email(), value in payload()) {
            let mut assignments = vec![ToolAssignment::pending(email.clone(), "R")];
            let now = chrono::Utc::now();

            prop_assert_eq!(
                record_signature(&mut assignments, &email, value.clone(), now),
                Ok(SignOutcome::Recorded)
            );
            let after_first = assignments.clone();

            prop_assert_eq!(
                record_signature(&mut assignments, &email, value, now),
                Ok(SignOutcome::AlreadySigned)
            );
            prop_assert_eq!(assignments, after_first);
        }

        /// A recipient is complete iff every one of their assignments is
        /// signed, regardless of how many fields they hold.
        #[test]
        fn completion_matches_signed_count(
            email in email(),
            field_count in 1usize..6,
            signed_count in 0usize..6,
        ) {
            let signed_count = signed_count.min(field_count);
            let mut tools: Vec<DocumentTool> = (0..field_count)
                .map(|i| {
                    let mut t = tool_with(vec![email.clone()]);
                    t.id = format!("t{i}");
                    t
                })
                .collect();

            for tool in tools.iter_mut().take(signed_count) {
                record_signature(
                    &mut tool.assigned_recipients,
                    &email,
                    ToolValue::SignatureImage("data:image/png;base64,AAAA".into()),
                    chrono::Utc::now(),
                )
                .unwrap();
            }

            prop_assert_eq!(
                recipient_is_complete(&tools, &email),
                signed_count == field_count
            );
        }

        /// Unassigning a pending entry always removes exactly that entry and
        /// never touches others.
        #[test]
        fn unassign_removes_only_target(mut emails in prop::collection::hash_set(email(), 2..6)) {
            let emails: Vec<String> = emails.drain().collect();
            let target = emails[0].clone();
            let mut assignments: Vec<ToolAssignment> = emails
                .iter()
                .map(|e| ToolAssignment::pending(e.clone(), "R"))
                .collect();

            prop_assert_eq!(unassign_recipient(&mut assignments, &target), Ok(true));
            prop_assert_eq!(assignments.len(), emails.len() - 1);
            prop_assert!(assignments.iter().all(|a| a.email != target));
        }
    }
}
