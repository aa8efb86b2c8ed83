//! Publish, unpublish and recipient-facing published-document access.

use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use esign_core::{expiry_from_days, generate_publish_link, generate_token, lifecycle};
use esign_types::{
    ActivityKind, Document, DocumentStatus, PublishedStatus, RecipientStatus, SignatureType,
    ToolType, ToolValue,
};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::handlers::tools::{
    ensure_recipient_access, load_tools, recipient_by_token, scoped_tools_for_recipient,
    update_tool_row,
};
use crate::handlers::{ensure_owner, fetch_document, record_activity};
use crate::models::{
    DbRecipient, DbSignature, DbUser, PublishRequest, PublishResponse, PublishedDocumentResponse,
    PublishedRecipient, TokenQuery,
};
use crate::state::AppState;

const DEFAULT_EXPIRY_DAYS: i64 = 30;
const MAX_EXPIRY_DAYS: i64 = 365;

/// How many times to regenerate a random slug after a UNIQUE violation
/// before giving up. With 128+ bits of entropy one retry is already
/// unheard of.
const SLUG_RETRIES: usize = 5;

/// Turn a draft into a shareable, recipient-addressable artifact.
///
/// Recipient rows and tokens are created durably before the document row
/// flips to `pending_signatures`, so a failure part-way leaves a retryable
/// draft rather than a published document with no recipients. Re-running a
/// completed publish returns the existing link and tokens.
pub async fn publish_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<PublishRequest>,
) -> Result<Json<PublishResponse>, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;

    let status = doc.status()?;
    if status == DocumentStatus::PendingSignatures
        && doc.published_status == PublishedStatus::Published.as_str()
    {
        return already_published_response(&state, &doc).await;
    }
    lifecycle::ensure_can_publish(status)?;

    let expires_in_days = req.expires_in_days.unwrap_or(DEFAULT_EXPIRY_DAYS);
    if !(1..=MAX_EXPIRY_DAYS).contains(&expires_in_days) {
        return Err(ApiError::Validation(format!(
            "expires_in_days must be between 1 and {MAX_EXPIRY_DAYS}"
        )));
    }

    let mut tools = load_tools(&state, &id).await?;
    let recipients = lifecycle::publish_recipient_emails(&tools)?;

    // Rows left by an earlier attempt whose email is no longer assigned must
    // not survive with a live token or count toward completion.
    crate::handlers::tools::retire_unassigned_recipients(&state.db, &id, &tools).await?;

    fill_owner_fields(&state, &claims.sub, &mut tools).await?;

    let now = Utc::now();
    let expires_at = expiry_from_days(now, expires_in_days);

    // No enclosing transaction on purpose: recipient rows and tokens are
    // made durable first, the document status flips last. A failure in
    // between leaves a draft that publish can safely be re-run against.
    let mut published: Vec<PublishedRecipient> = Vec::with_capacity(recipients.len());

    for (order, (email, name)) in recipients.iter().enumerate() {
        let existing: Option<DbRecipient> = sqlx::query_as(
            "SELECT * FROM document_recipients WHERE document_id = ? AND email = ?",
        )
        .bind(&id)
        .bind(email)
        .fetch_optional(&state.db)
        .await?;

        let (recipient_id, token) = match existing {
            // Left over from a publish that failed before the status flip.
            // Always issue a fresh token. The UNIQUE constraint on the token
            // column is what closes the generate-then-insert race; on a
            // violation we simply roll again.
            Some(row) => {
                let mut token = generate_token();
                for attempt in 0.. {
                    let result = sqlx::query(
                        r#"
                        UPDATE document_recipients
                        SET token = ?, name = ?, status = 'pending', signing_order = ?
                        WHERE id = ?
                        "#,
                    )
                    .bind(&token)
                    .bind(name)
                    .bind(order as i64)
                    .bind(&row.id)
                    .execute(&state.db)
                    .await;

                    match result {
                        Ok(_) => break,
                        Err(e) if is_unique_violation(&e) && attempt + 1 < SLUG_RETRIES => {
                            token = generate_token();
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                (row.id, token)
            }
            None => {
                let recipient_id = Uuid::new_v4().to_string();
                let mut token = generate_token();
                for attempt in 0.. {
                    let result = sqlx::query(
                        r#"
                        INSERT INTO document_recipients
                            (id, document_id, email, name, token, status, signing_order, created_at)
                        VALUES (?, ?, ?, ?, ?, 'pending', ?, ?)
                        "#,
                    )
                    .bind(&recipient_id)
                    .bind(&id)
                    .bind(email)
                    .bind(name)
                    .bind(&token)
                    .bind(order as i64)
                    .bind(now.to_rfc3339())
                    .execute(&state.db)
                    .await;

                    match result {
                        Ok(_) => break,
                        Err(e) if is_unique_violation(&e) && attempt + 1 < SLUG_RETRIES => {
                            token = generate_token();
                        }
                        Err(e) => return Err(e.into()),
                    }
                }
                (recipient_id, token)
            }
        };

        published.push(PublishedRecipient {
            email: email.clone(),
            name: name.clone(),
            signing_url: String::new(), // filled in once the link exists
            token,
        });

        // Stamp the recipient row id into the tool assignments.
        for tool in &mut tools {
            for assignment in &mut tool.assigned_recipients {
                if assignment.email.eq_ignore_ascii_case(email) {
                    assignment.email = email.clone();
                    assignment.recipient_id = Some(recipient_id.clone());
                }
            }
        }
    }

    for tool in &tools {
        update_tool_row(&state.db, &id, tool, None, now).await?;
    }

    // The status flip comes last: everything above is inert until the
    // document leaves `draft`.
    let mut publish_link = generate_publish_link();
    for attempt in 0.. {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET publish_link = ?, publish_link_expires_at = ?, published_at = ?,
                published_status = 'published', status = 'pending_signatures', updated_at = ?
            WHERE id = ? AND status = 'draft'
            "#,
        )
        .bind(&publish_link)
        .bind(expires_at.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id)
        .execute(&state.db)
        .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => {
                return Err(ApiError::Conflict(
                    "document was published concurrently".into(),
                ));
            }
            Ok(_) => break,
            Err(e) if is_unique_violation(&e) && attempt + 1 < SLUG_RETRIES => {
                publish_link = generate_publish_link();
            }
            Err(e) => return Err(e.into()),
        }
    }

    for recipient in &mut published {
        recipient.signing_url = format!(
            "{}/sign/{}?token={}",
            state.public_url, publish_link, recipient.token
        );
        record_activity(
            &state.db,
            &claims.sub,
            Some(&id),
            ActivityKind::DocumentShared,
            "Document shared",
            &recipient.email,
        )
        .await?;
    }

    tracing::info!(
        "Published document {} to {} recipient(s)",
        id,
        published.len()
    );

    Ok(Json(PublishResponse {
        publish_url: format!("{}/sign/{}", state.public_url, publish_link),
        publish_link,
        expires_at,
        recipients: published,
    }))
}

/// One-way unpublish: the document moves to `expired` and every outstanding
/// token stops working. Captured signature data is left untouched. Calling
/// this twice is a no-op.
pub async fn unpublish_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<Document>, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;

    let status = doc.status()?;
    lifecycle::ensure_can_unpublish(status)?;

    if status == DocumentStatus::PendingSignatures {
        let now = Utc::now().to_rfc3339();
        let mut tx = state.db.begin().await?;
        sqlx::query(
            r#"
            UPDATE documents
            SET status = 'expired', published_status = 'expired', updated_at = ?
            WHERE id = ? AND status = 'pending_signatures'
            "#,
        )
        .bind(&now)
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        // Outstanding invitations lapse; signed rows keep their record.
        sqlx::query(
            r#"
            UPDATE document_recipients SET status = 'expired'
            WHERE document_id = ? AND status IN ('pending', 'viewed')
            "#,
        )
        .bind(&id)
        .execute(&mut *tx)
        .await?;
        record_activity(
            &mut *tx,
            &claims.sub,
            Some(&id),
            ActivityKind::DocumentExpired,
            "Document unpublished",
            &doc.name,
        )
        .await?;
        tx.commit().await?;
    }

    let doc = fetch_document(&state.db, &id).await?;
    Ok(Json(doc.into_document()?))
}

/// Recipient entry point: fetch the published document by link + signing
/// token. First successful access flips the recipient to `viewed`; every
/// access bumps the counters.
pub async fn published_document(
    State(state): State<Arc<AppState>>,
    Path(publish_link): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<PublishedDocumentResponse>, ApiError> {
    let token = query
        .token
        .ok_or_else(|| ApiError::Validation("signing token is required".into()))?;

    let doc: Option<crate::models::DbDocument> =
        sqlx::query_as("SELECT * FROM documents WHERE publish_link = ?")
            .bind(&publish_link)
            .fetch_optional(&state.db)
            .await?;
    let doc = doc.ok_or(ApiError::NotFound("document"))?;

    let recipient = recipient_by_token(&state, &doc.id, &token).await?;
    ensure_recipient_access(&doc, &recipient)?;

    let now = Utc::now();
    let first_view = recipient.status()? == RecipientStatus::Pending;
    sqlx::query(
        r#"
        UPDATE document_recipients
        SET status = CASE WHEN status = 'pending' THEN 'viewed' ELSE status END,
            viewed_at = COALESCE(viewed_at, ?),
            last_accessed_at = ?, access_count = access_count + 1
        WHERE id = ?
        "#,
    )
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .bind(&recipient.id)
    .execute(&state.db)
    .await?;

    if first_view {
        record_activity(
            &state.db,
            &doc.user_id,
            Some(&doc.id),
            ActivityKind::DocumentViewed,
            "Document viewed",
            &recipient.email,
        )
        .await?;
    }

    let tools = load_tools(&state, &doc.id).await?;
    let scoped = scoped_tools_for_recipient(tools, &recipient.email);

    let recipient_status = if first_view {
        RecipientStatus::Viewed
    } else {
        recipient.status()?
    };

    Ok(Json(PublishedDocumentResponse {
        document_id: doc.id,
        name: doc.name,
        file_type: doc.file_type,
        file_base64: BASE64.encode(&doc.file_data),
        status: doc.status.parse().map_err(
            |e: esign_types::ParseEnumError| ApiError::Internal(e.into()),
        )?,
        recipient_email: recipient.email,
        recipient_name: recipient.name,
        recipient_status,
        tools: scoped,
    }))
}

// ============================================================
// Helpers
// ============================================================

async fn already_published_response(
    state: &AppState,
    doc: &crate::models::DbDocument,
) -> Result<Json<PublishResponse>, ApiError> {
    let publish_link = doc
        .publish_link
        .clone()
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("published document has no link")))?;
    let expires_at = doc
        .publish_link_expires_at
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("published document has no expiry")))?;

    let rows: Vec<DbRecipient> = sqlx::query_as(
        r#"
        SELECT * FROM document_recipients
        WHERE document_id = ? AND status != 'expired'
        ORDER BY signing_order
        "#,
    )
    .bind(&doc.id)
    .fetch_all(&state.db)
    .await?;

    let recipients = rows
        .into_iter()
        .map(|r| PublishedRecipient {
            signing_url: format!(
                "{}/sign/{}?token={}",
                state.public_url, publish_link, r.token
            ),
            email: r.email,
            name: r.name,
            token: r.token,
        })
        .collect();

    Ok(Json(PublishResponse {
        publish_url: format!("{}/sign/{}", state.public_url, publish_link),
        publish_link,
        expires_at,
        recipients,
    }))
}

/// Owner fields are filled from the owner's profile and saved signature at
/// publish time; recipients never interact with them.
async fn fill_owner_fields(
    state: &AppState,
    user_id: &str,
    tools: &mut [esign_types::DocumentTool],
) -> Result<(), ApiError> {
    let needs_fill = tools
        .iter()
        .any(|t| t.tool_type.is_owner_field() && t.value.is_none());
    if !needs_fill {
        return Ok(());
    }

    let owner: Option<DbUser> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;
    let owner = owner.ok_or(ApiError::NotFound("user"))?.into_user();

    let signature: Option<DbSignature> =
        sqlx::query_as("SELECT * FROM signatures WHERE user_id = ?")
            .bind(user_id)
            .fetch_optional(&state.db)
            .await?;

    for tool in tools.iter_mut() {
        if !tool.tool_type.is_owner_field() || tool.value.is_some() {
            continue;
        }
        tool.value = Some(match tool.tool_type {
            ToolType::MyEmail => ToolValue::Text(owner.email.clone()),
            ToolType::MyFullname => ToolValue::Text(owner.full_name()),
            ToolType::MySignature | ToolType::MyInitial => {
                let sig = signature.as_ref().ok_or_else(|| {
                    ApiError::Validation(
                        "save a signature before publishing a document with owner signature fields"
                            .into(),
                    )
                })?;
                let data = if tool.tool_type == ToolType::MySignature {
                    sig.signature_data.clone()
                } else {
                    sig.initials_data.clone()
                };
                match sig.signature_type.parse().map_err(
                    |e: esign_types::ParseEnumError| ApiError::Internal(e.into()),
                )? {
                    SignatureType::Premade => ToolValue::Text(data),
                    SignatureType::Drawn => ToolValue::SignatureImage(data),
                }
            }
            _ => unreachable!("guarded by is_owner_field"),
        });
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}
