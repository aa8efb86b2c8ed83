//! Signature submission and decline.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use std::sync::Arc;

use esign_core::{assignment, lifecycle, SignOutcome};
use esign_types::{ActivityKind, DocumentStatus, RecipientStatus};

use crate::auth::decode_claims;
use crate::error::ApiError;
use crate::handlers::tools::encode_assignments;
use crate::handlers::{fetch_document, fetch_document_tools, record_activity};
use crate::models::{DbRecipient, DeclineRequest, SignRequest, SignResponse};
use crate::state::AppState;

/// Apply a recipient's batched field submissions.
///
/// Each field write is an atomic per-row update; the recipient status flip
/// is guarded by a precondition on the current status so that two racing
/// submissions cannot both redeem the token with different payloads. The
/// loser gets `Conflict`.
pub async fn sign_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<SignRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    if req.signatures.is_empty() {
        return Err(ApiError::Validation("no signatures submitted".into()));
    }

    let doc = fetch_document(&state.db, &id).await?;
    if esign_core::is_expired(Utc::now(), doc.publish_link_expires_at) {
        return Err(ApiError::Expired);
    }
    match doc.status()? {
        DocumentStatus::PendingSignatures => {}
        DocumentStatus::Expired => return Err(ApiError::Expired),
        status => return Err(ApiError::InvalidState(status.to_string())),
    }

    let recipient = resolve_recipient(&state, &id, &headers, req.token.as_deref()).await?;
    let entry_status = recipient.status()?;
    match entry_status {
        RecipientStatus::Pending | RecipientStatus::Viewed | RecipientStatus::Signed => {}
        RecipientStatus::Declined => {
            return Err(ApiError::Conflict(
                "recipient has declined this document".into(),
            ))
        }
        RecipientStatus::Expired => return Err(ApiError::Expired),
    }

    let now = Utc::now();
    let mut tools = Vec::new();
    for row in fetch_document_tools(&state.db, &id).await? {
        let version = row.version;
        let tool = row.into_tool()?;
        tools.push((version, tool));
    }

    // Record each field; remember which rows actually changed.
    let mut recorded = 0usize;
    for submission in &req.signatures {
        let (version, tool) = tools
            .iter_mut()
            .find(|(_, t)| t.id == submission.tool_id)
            .ok_or(ApiError::NotFound("tool"))?;

        let outcome = assignment::record_signature(
            &mut tool.assigned_recipients,
            &recipient.email,
            submission.value.clone(),
            now,
        )?;
        if outcome == SignOutcome::AlreadySigned {
            continue;
        }

        let updated = sqlx::query(
            r#"
            UPDATE document_tools
            SET assigned_recipients_json = ?, version = version + 1, updated_at = ?
            WHERE document_id = ? AND tool_id = ? AND version = ?
            "#,
        )
        .bind(encode_assignments(&tool.assigned_recipients)?)
        .bind(now.to_rfc3339())
        .bind(&id)
        .bind(&tool.id)
        .bind(*version)
        .execute(&state.db)
        .await?;
        if updated.rows_affected() == 0 {
            return Err(ApiError::Conflict(format!(
                "field {} was modified concurrently",
                tool.id
            )));
        }
        *version += 1;
        recorded += 1;
    }

    // Flip the recipient only when every one of their fields is now signed,
    // with a precondition so a concurrent submission fails instead of
    // silently overwriting.
    let all_tools: Vec<_> = tools.into_iter().map(|(_, t)| t).collect();
    let mut recipient_status = entry_status;
    if assignment::recipient_is_complete(&all_tools, &recipient.email)
        && entry_status != RecipientStatus::Signed
    {
        let flipped = sqlx::query(
            r#"
            UPDATE document_recipients
            SET status = 'signed', signed_at = ?
            WHERE id = ? AND status IN ('pending', 'viewed')
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(&recipient.id)
        .execute(&state.db)
        .await?;
        if flipped.rows_affected() == 0 {
            return Err(ApiError::Conflict(
                "recipient state changed concurrently".into(),
            ));
        }
        recipient_status = RecipientStatus::Signed;

        record_activity(
            &state.db,
            &doc.user_id,
            Some(&id),
            ActivityKind::DocumentSigned,
            "Document signed",
            &recipient.email,
        )
        .await?;
    }

    // Document completes once the last recipient signs. Retired (expired)
    // rows are audit trail only and do not count.
    let statuses: Vec<String> = sqlx::query_scalar(
        "SELECT status FROM document_recipients WHERE document_id = ? AND status != 'expired'",
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;
    let statuses = statuses
        .iter()
        .map(|s| s.parse())
        .collect::<Result<Vec<RecipientStatus>, _>>()
        .map_err(|e| ApiError::Internal(e.into()))?;

    let mut document_status = DocumentStatus::PendingSignatures;
    if assignment::document_is_complete(&statuses) {
        let completed = sqlx::query(
            r#"
            UPDATE documents SET status = 'completed', completed_at = ?, updated_at = ?
            WHERE id = ? AND status = 'pending_signatures'
            "#,
        )
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id)
        .execute(&state.db)
        .await?;
        if completed.rows_affected() > 0 {
            record_activity(
                &state.db,
                &doc.user_id,
                Some(&id),
                ActivityKind::DocumentCompleted,
                "Document completed",
                &doc.name,
            )
            .await?;
        }
        document_status = DocumentStatus::Completed;
    }

    tracing::info!(
        "Recorded {} signature(s) on document {} for {}",
        recorded,
        id,
        recipient.email
    );

    Ok(Json(SignResponse {
        recorded,
        recipient_status,
        document_status,
    }))
}

/// Recipient declines to sign. Terminal for the recipient and blocks
/// document completion until the owner cancels or reassigns.
pub async fn decline_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<DeclineRequest>,
) -> Result<Json<SignResponse>, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    if esign_core::is_expired(Utc::now(), doc.publish_link_expires_at) {
        return Err(ApiError::Expired);
    }
    lifecycle::ensure_can_cancel(doc.status()?).map_err(ApiError::from)?;

    let recipient = super::tools::recipient_by_token(&state, &id, &req.token).await?;
    match recipient.status()? {
        RecipientStatus::Pending | RecipientStatus::Viewed => {}
        RecipientStatus::Declined => {
            // Idempotent: declining twice is a no-op.
            return Ok(Json(SignResponse {
                recorded: 0,
                recipient_status: RecipientStatus::Declined,
                document_status: doc.status()?,
            }));
        }
        RecipientStatus::Signed => {
            return Err(ApiError::Conflict(
                "recipient has already signed and cannot decline".into(),
            ))
        }
        RecipientStatus::Expired => return Err(ApiError::Expired),
    }

    let flipped = sqlx::query(
        r#"
        UPDATE document_recipients SET status = 'declined', decline_reason = ?
        WHERE id = ? AND status IN ('pending', 'viewed')
        "#,
    )
    .bind(req.reason.as_deref().unwrap_or(""))
    .bind(&recipient.id)
    .execute(&state.db)
    .await?;
    if flipped.rows_affected() == 0 {
        return Err(ApiError::Conflict(
            "recipient state changed concurrently".into(),
        ));
    }

    record_activity(
        &state.db,
        &doc.user_id,
        Some(&id),
        ActivityKind::DocumentDeclined,
        "Document declined",
        &recipient.email,
    )
    .await?;

    Ok(Json(SignResponse {
        recorded: 0,
        recipient_status: RecipientStatus::Declined,
        document_status: doc.status()?,
    }))
}

/// A recipient is identified by their signing token, or by account email
/// when they are logged in with a bearer token.
async fn resolve_recipient(
    state: &AppState,
    document_id: &str,
    headers: &HeaderMap,
    token: Option<&str>,
) -> Result<DbRecipient, ApiError> {
    if let Some(token) = token {
        return super::tools::recipient_by_token(state, document_id, token).await;
    }

    let claims = decode_claims(headers, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
    let row: Option<DbRecipient> =
        sqlx::query_as("SELECT * FROM document_recipients WHERE document_id = ? AND email = ?")
            .bind(document_id)
            .bind(claims.email.to_ascii_lowercase())
            .fetch_optional(&state.db)
            .await?;
    row.ok_or(ApiError::Forbidden)
}
