//! Field (tool) CRUD.
//!
//! Tools are stored one row per field so that concurrent edits to different
//! fields of the same document never clobber each other; every row update is
//! guarded by an optimistic version check.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use sqlx::sqlite::Sqlite;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use esign_core::{assignment, lifecycle};
use esign_types::{DocumentStatus, DocumentTool, ToolAssignment};

use crate::auth::decode_claims;
use crate::error::ApiError;
use crate::handlers::{ensure_owner, fetch_document, fetch_document_tools};
use crate::models::{DbRecipient, DbTool, TokenQuery, ToolListResponse, ToolPatchRequest};
use crate::state::AppState;

/// List tools. Owners (bearer) see everything; recipients (signing token)
/// see only their own fields with other parties' signature payloads
/// redacted.
pub async fn list_tools(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<TokenQuery>,
    headers: HeaderMap,
) -> Result<Json<ToolListResponse>, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;

    if let Some(token) = &query.token {
        let recipient = recipient_by_token(&state, &id, token).await?;
        ensure_recipient_access(&doc, &recipient)?;
        let tools = load_tools(&state, &id).await?;
        return Ok(Json(ToolListResponse {
            tools: scoped_tools_for_recipient(tools, &recipient.email),
        }));
    }

    let claims = decode_claims(&headers, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
    ensure_owner(&doc, &claims)?;
    let tools = load_tools(&state, &id).await?;
    Ok(Json(ToolListResponse { tools }))
}

/// Bulk replace the document's tool set. Each incoming tool is upserted as
/// its own row; rows absent from the payload are removed. Fields holding a
/// captured signature cannot be changed or dropped.
pub async fn replace_tools(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(incoming): Json<Vec<DocumentTool>>,
) -> Result<Json<ToolListResponse>, ApiError> {
    let claims = decode_claims(&headers, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;
    lifecycle::ensure_tools_editable(doc.status()?)?;

    let existing: HashMap<String, DocumentTool> = fetch_document_tools(&state.db, &id)
        .await?
        .into_iter()
        .map(|row| row.into_tool().map(|t| (t.id.clone(), t)))
        .collect::<Result<_, _>>()?;

    // The payload is authoritative for which emails are assigned, but the
    // stored entries are authoritative for their state: client-supplied
    // status and signature payloads are ignored, and signed entries cannot
    // be dropped by omission.
    let mut incoming = incoming;
    for tool in &mut incoming {
        let mut merged = existing
            .get(&tool.id)
            .map(|t| t.assigned_recipients.clone())
            .unwrap_or_default();
        merge_assignments(&mut merged, &tool.assigned_recipients)?;
        tool.assigned_recipients = merged;
    }

    for tool in &incoming {
        validate_tool(tool)?;
    }

    let mut tx = state.db.begin().await?;
    let now = Utc::now();

    for tool in &incoming {
        match existing.get(&tool.id) {
            Some(current) if current == tool => {}
            Some(current) => {
                lifecycle::ensure_tool_mutable(current)?;
                update_tool_row(&mut *tx, &id, tool, None, now).await?;
            }
            None => insert_tool_row(&mut *tx, &id, tool, now).await?,
        }
    }

    for (tool_id, current) in &existing {
        if !incoming.iter().any(|t| &t.id == tool_id) {
            lifecycle::ensure_tool_mutable(current)?;
            sqlx::query("DELETE FROM document_tools WHERE document_id = ? AND tool_id = ?")
                .bind(&id)
                .bind(tool_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    let tools = load_tools(&state, &id).await?;
    if doc.status()? == DocumentStatus::PendingSignatures {
        retire_unassigned_recipients(&state.db, &id, &tools).await?;
    }
    Ok(Json(ToolListResponse { tools }))
}

/// Atomic partial update of one tool, keyed by `(document_id, tool_id)`.
pub async fn patch_tool(
    State(state): State<Arc<AppState>>,
    Path((id, tool_id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(patch): Json<ToolPatchRequest>,
) -> Result<Json<DocumentTool>, ApiError> {
    let claims = decode_claims(&headers, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;
    lifecycle::ensure_tools_editable(doc.status()?)?;

    let row = fetch_tool_row(&state, &id, &tool_id).await?;
    let read_version = row.version;
    let mut tool = row.into_tool()?;
    lifecycle::ensure_tool_mutable(&tool)?;

    apply_patch(&mut tool, &patch)?;
    validate_tool(&tool)?;

    let expected = patch.expected_version.unwrap_or(read_version);
    let updated =
        update_tool_row(&state.db, &id, &tool, Some(expected), Utc::now()).await?;
    if !updated {
        return Err(ApiError::Conflict(format!(
            "tool {tool_id} was modified concurrently"
        )));
    }

    if doc.status()? == DocumentStatus::PendingSignatures {
        let tools = load_tools(&state, &id).await?;
        retire_unassigned_recipients(&state.db, &id, &tools).await?;
    }

    let row = fetch_tool_row(&state, &id, &tool_id).await?;
    Ok(Json(row.into_tool()?))
}

pub async fn delete_tool(
    State(state): State<Arc<AppState>>,
    Path((id, tool_id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Result<StatusCode, ApiError> {
    let claims = decode_claims(&headers, &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;
    lifecycle::ensure_tools_editable(doc.status()?)?;

    let tool = fetch_tool_row(&state, &id, &tool_id).await?.into_tool()?;
    lifecycle::ensure_tool_mutable(&tool)?;

    sqlx::query("DELETE FROM document_tools WHERE document_id = ? AND tool_id = ?")
        .bind(&id)
        .bind(&tool_id)
        .execute(&state.db)
        .await?;

    if doc.status()? == DocumentStatus::PendingSignatures {
        let tools = load_tools(&state, &id).await?;
        retire_unassigned_recipients(&state.db, &id, &tools).await?;
    }

    Ok(StatusCode::NO_CONTENT)
}

// ============================================================
// Shared helpers (also used by the publish/sign handlers)
// ============================================================

pub(crate) async fn load_tools(
    state: &AppState,
    document_id: &str,
) -> Result<Vec<DocumentTool>, ApiError> {
    fetch_document_tools(&state.db, document_id)
        .await?
        .into_iter()
        .map(DbTool::into_tool)
        .collect()
}

pub(crate) async fn fetch_tool_row(
    state: &AppState,
    document_id: &str,
    tool_id: &str,
) -> Result<DbTool, ApiError> {
    let row: Option<DbTool> =
        sqlx::query_as("SELECT * FROM document_tools WHERE document_id = ? AND tool_id = ?")
            .bind(document_id)
            .bind(tool_id)
            .fetch_optional(&state.db)
            .await?;
    row.ok_or(ApiError::NotFound("tool"))
}

pub(crate) async fn recipient_by_token(
    state: &AppState,
    document_id: &str,
    token: &str,
) -> Result<DbRecipient, ApiError> {
    let row: Option<DbRecipient> =
        sqlx::query_as("SELECT * FROM document_recipients WHERE document_id = ? AND token = ?")
            .bind(document_id)
            .bind(token)
            .fetch_optional(&state.db)
            .await?;
    row.ok_or(ApiError::Forbidden)
}

/// Expire recipient rows that no longer hold any field assignment, so their
/// tokens stop working and they stop counting toward completion. Rows left
/// by a publish attempt that failed before the status flip, or orphaned by
/// unassigning a recipient's last field, are caught here. Signed and
/// declined rows are left alone.
pub(crate) async fn retire_unassigned_recipients(
    db: &sqlx::SqlitePool,
    document_id: &str,
    tools: &[DocumentTool],
) -> Result<(), ApiError> {
    let rows: Vec<DbRecipient> = sqlx::query_as(
        r#"
        SELECT * FROM document_recipients
        WHERE document_id = ? AND status IN ('pending', 'viewed')
        "#,
    )
    .bind(document_id)
    .fetch_all(db)
    .await?;

    for row in rows {
        let assigned = tools
            .iter()
            .any(|t| t.assignment_for(&row.email).is_some());
        if !assigned {
            sqlx::query(
                r#"
                UPDATE document_recipients SET status = 'expired'
                WHERE id = ? AND status IN ('pending', 'viewed')
                "#,
            )
            .bind(&row.id)
            .execute(db)
            .await?;
            tracing::info!(
                "Retired unassigned recipient {} on document {}",
                row.email,
                document_id
            );
        }
    }
    Ok(())
}

/// Reject recipient access once the link or token has lapsed. Completed
/// documents stay viewable.
pub(crate) fn ensure_recipient_access(
    doc: &crate::models::DbDocument,
    recipient: &DbRecipient,
) -> Result<(), ApiError> {
    use esign_types::{DocumentStatus, RecipientStatus};

    if esign_core::is_expired(Utc::now(), doc.publish_link_expires_at) {
        return Err(ApiError::Expired);
    }
    match doc.status()? {
        DocumentStatus::PendingSignatures | DocumentStatus::Completed => {}
        _ => return Err(ApiError::Expired),
    }
    if recipient.status()? == RecipientStatus::Expired {
        return Err(ApiError::Expired);
    }
    Ok(())
}

/// Only the recipient's own fields, with everyone else's in-progress
/// signature data stripped from shared fields.
pub(crate) fn scoped_tools_for_recipient(
    tools: Vec<DocumentTool>,
    email: &str,
) -> Vec<DocumentTool> {
    tools
        .into_iter()
        .filter(|t| t.assignment_for(email).is_some())
        .map(|mut t| {
            for assignment in &mut t.assigned_recipients {
                if !assignment.email.eq_ignore_ascii_case(email) {
                    assignment.signature = None;
                }
            }
            t
        })
        .collect()
}

pub(crate) fn validate_tool(tool: &DocumentTool) -> Result<(), ApiError> {
    if tool.id.trim().is_empty() {
        return Err(ApiError::Validation("tool id must not be empty".into()));
    }
    if tool.page == 0 {
        return Err(ApiError::Validation("page numbers start at 1".into()));
    }
    if tool.width <= 0.0 || tool.height <= 0.0 {
        return Err(ApiError::Validation(
            "tool dimensions must be positive".into(),
        ));
    }
    if tool.x < 0.0 || tool.y < 0.0 {
        return Err(ApiError::Validation(
            "tool position must be non-negative".into(),
        ));
    }
    if tool.tool_type.is_owner_field() && !tool.assigned_recipients.is_empty() {
        return Err(ApiError::Validation(
            "owner fields cannot have assigned recipients".into(),
        ));
    }
    Ok(())
}

pub(crate) async fn insert_tool_row<'e, E>(
    exec: E,
    document_id: &str,
    tool: &DocumentTool,
    now: chrono::DateTime<Utc>,
) -> Result<(), ApiError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO document_tools (id, document_id, tool_id, tool_type, label, page,
                                    x, y, width, height, style_json, value_json,
                                    assigned_recipients_json, version, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(document_id)
    .bind(&tool.id)
    .bind(tool.tool_type.as_str())
    .bind(&tool.label)
    .bind(tool.page as i64)
    .bind(tool.x)
    .bind(tool.y)
    .bind(tool.width)
    .bind(tool.height)
    .bind(serde_json::to_string(&tool.style).map_err(|e| ApiError::Internal(e.into()))?)
    .bind(encode_value(tool)?)
    .bind(encode_assignments(&tool.assigned_recipients)?)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(exec)
    .await?;
    Ok(())
}

/// Single-row update with optimistic concurrency. Returns false when the
/// version precondition failed.
pub(crate) async fn update_tool_row<'e, E>(
    exec: E,
    document_id: &str,
    tool: &DocumentTool,
    expected_version: Option<i64>,
    now: chrono::DateTime<Utc>,
) -> Result<bool, ApiError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let result = match expected_version {
        Some(version) => {
            sqlx::query(
                r#"
                UPDATE document_tools
                SET tool_type = ?, label = ?, page = ?, x = ?, y = ?, width = ?, height = ?,
                    style_json = ?, value_json = ?, assigned_recipients_json = ?,
                    version = version + 1, updated_at = ?
                WHERE document_id = ? AND tool_id = ? AND version = ?
                "#,
            )
            .bind(tool.tool_type.as_str())
            .bind(&tool.label)
            .bind(tool.page as i64)
            .bind(tool.x)
            .bind(tool.y)
            .bind(tool.width)
            .bind(tool.height)
            .bind(serde_json::to_string(&tool.style).map_err(|e| ApiError::Internal(e.into()))?)
            .bind(encode_value(tool)?)
            .bind(encode_assignments(&tool.assigned_recipients)?)
            .bind(now.to_rfc3339())
            .bind(document_id)
            .bind(&tool.id)
            .bind(version)
            .execute(exec)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                UPDATE document_tools
                SET tool_type = ?, label = ?, page = ?, x = ?, y = ?, width = ?, height = ?,
                    style_json = ?, value_json = ?, assigned_recipients_json = ?,
                    version = version + 1, updated_at = ?
                WHERE document_id = ? AND tool_id = ?
                "#,
            )
            .bind(tool.tool_type.as_str())
            .bind(&tool.label)
            .bind(tool.page as i64)
            .bind(tool.x)
            .bind(tool.y)
            .bind(tool.width)
            .bind(tool.height)
            .bind(serde_json::to_string(&tool.style).map_err(|e| ApiError::Internal(e.into()))?)
            .bind(encode_value(tool)?)
            .bind(encode_assignments(&tool.assigned_recipients)?)
            .bind(now.to_rfc3339())
            .bind(document_id)
            .bind(&tool.id)
            .execute(exec)
            .await?
        }
    };
    Ok(result.rows_affected() > 0)
}

fn encode_value(tool: &DocumentTool) -> Result<Option<String>, ApiError> {
    tool.value
        .as_ref()
        .map(|v| serde_json::to_string(v).map_err(|e| ApiError::Internal(e.into())))
        .transpose()
}

pub(crate) fn encode_assignments(assignments: &[ToolAssignment]) -> Result<String, ApiError> {
    serde_json::to_string(assignments).map_err(|e| ApiError::Internal(e.into()))
}

/// Reconcile the stored assignment list with a requested one. Emails absent
/// from the request are unassigned (signed entries refuse and surface as a
/// conflict); new emails are added pending. Entries that stay keep their
/// stored state, including the recipient-row stamp from publish.
fn merge_assignments(
    current: &mut Vec<ToolAssignment>,
    requested: &[ToolAssignment],
) -> Result<(), ApiError> {
    let stored_emails: Vec<String> = current.iter().map(|a| a.email.clone()).collect();
    for email in &stored_emails {
        if !requested.iter().any(|a| a.email.eq_ignore_ascii_case(email)) {
            assignment::unassign_recipient(current, email)?;
        }
    }
    for entry in requested {
        assignment::assign_recipient(
            current,
            ToolAssignment::pending(entry.email.clone(), entry.name.clone()),
        );
    }
    Ok(())
}

fn apply_patch(tool: &mut DocumentTool, patch: &ToolPatchRequest) -> Result<(), ApiError> {
    if let Some(label) = &patch.label {
        tool.label = label.clone();
    }
    if let Some(page) = patch.page {
        tool.page = page;
    }
    if let Some(x) = patch.x {
        tool.x = x;
    }
    if let Some(y) = patch.y {
        tool.y = y;
    }
    if let Some(width) = patch.width {
        tool.width = width;
    }
    if let Some(height) = patch.height {
        tool.height = height;
    }
    if let Some(style) = &patch.style {
        tool.style = style.clone();
    }
    if let Some(value) = &patch.value {
        tool.value = Some(value.clone());
    }
    if let Some(assignments) = &patch.assigned_recipients {
        let mut merged = tool.assigned_recipients.clone();
        merge_assignments(&mut merged, assignments)?;
        tool.assigned_recipients = merged;
    }
    Ok(())
}
