//! Document CRUD, cancellation and export.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use esign_core::lifecycle;
use esign_types::{ActivityKind, Document, DocumentStatus};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::handlers::{ensure_owner, fetch_document, record_activity};
use crate::models::{
    CancelDocumentRequest, DbDocument, DbRecipient, DocumentDetailResponse, UpdateDocumentRequest,
    UploadDocumentRequest,
};
use crate::state::AppState;

/// List the caller's documents, newest first.
pub async fn list_documents(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let rows: Vec<DbDocument> =
        sqlx::query_as("SELECT * FROM documents WHERE user_id = ? ORDER BY updated_at DESC")
            .bind(&claims.sub)
            .fetch_all(&state.db)
            .await?;
    rows.into_iter()
        .map(DbDocument::into_document)
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}

/// Create a document from an uploaded file. Bytes arrive base64-encoded and
/// are stored verbatim; nothing beyond presence is validated.
pub async fn upload_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UploadDocumentRequest>,
) -> Result<(StatusCode, Json<Document>), ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::Validation("document name must not be empty".into()));
    }
    let file_data = BASE64
        .decode(&req.file_base64)
        .map_err(|e| ApiError::Validation(format!("invalid file base64: {e}")))?;
    if file_data.is_empty() {
        return Err(ApiError::Validation("file must not be empty".into()));
    }

    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    sqlx::query(
        r#"
        INSERT INTO documents (id, user_id, name, original_filename, file_type, file_data,
                               status, published_status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, 'draft', 'draft', ?, ?)
        "#,
    )
    .bind(&id)
    .bind(&claims.sub)
    .bind(&req.name)
    .bind(&req.original_filename)
    .bind(&req.file_type)
    .bind(&file_data)
    .bind(now.to_rfc3339())
    .bind(now.to_rfc3339())
    .execute(&state.db)
    .await?;

    record_activity(
        &state.db,
        &claims.sub,
        Some(&id),
        ActivityKind::DocumentUploaded,
        "Document uploaded",
        &req.name,
    )
    .await?;

    tracing::info!("Created document {} for user {}", id, claims.sub);

    let doc = fetch_document(&state.db, &id).await?;
    Ok((StatusCode::CREATED, Json(doc.into_document()?)))
}

/// Document metadata plus its recipient rows (owner view).
pub async fn get_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<Json<DocumentDetailResponse>, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;

    let recipients: Vec<DbRecipient> = sqlx::query_as(
        "SELECT * FROM document_recipients WHERE document_id = ? ORDER BY signing_order, created_at",
    )
    .bind(&id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(DocumentDetailResponse {
        document: doc.into_document()?,
        recipients: recipients
            .into_iter()
            .map(DbRecipient::into_recipient)
            .collect::<Result<Vec<_>, _>>()?,
    }))
}

pub async fn update_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<UpdateDocumentRequest>,
) -> Result<Json<Document>, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;
    let status = doc.status()?;
    if status.is_terminal() {
        return Err(ApiError::InvalidState(status.to_string()));
    }

    if let Some(name) = &req.name {
        if name.trim().is_empty() {
            return Err(ApiError::Validation("document name must not be empty".into()));
        }
        sqlx::query("UPDATE documents SET name = ?, updated_at = ? WHERE id = ?")
            .bind(name)
            .bind(Utc::now().to_rfc3339())
            .bind(&id)
            .execute(&state.db)
            .await?;
    }

    let doc = fetch_document(&state.db, &id).await?;
    Ok(Json(doc.into_document()?))
}

/// Delete a document and everything it owns. Recipient and tool rows go with
/// it; the activity log stays.
pub async fn delete_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;

    let mut tx = state.db.begin().await?;
    sqlx::query("DELETE FROM document_tools WHERE document_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM document_recipients WHERE document_id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM documents WHERE id = ?")
        .bind(&id)
        .execute(&mut *tx)
        .await?;
    record_activity(
        &mut *tx,
        &claims.sub,
        None,
        ActivityKind::DocumentDeleted,
        "Document deleted",
        &doc.name,
    )
    .await?;
    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Owner cancels an in-flight document. Records who, when and why; captured
/// signature data stays in place.
pub async fn cancel_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    Json(req): Json<CancelDocumentRequest>,
) -> Result<Json<Document>, ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;
    lifecycle::ensure_can_cancel(doc.status()?)?;

    let now = Utc::now();
    sqlx::query(
        r#"
        UPDATE documents
        SET status = 'cancelled', cancelled_by = ?, cancelled_at = ?,
            cancellation_reason = ?, updated_at = ?
        WHERE id = ? AND status = 'pending_signatures'
        "#,
    )
    .bind(&claims.sub)
    .bind(now.to_rfc3339())
    .bind(req.reason.as_deref().unwrap_or(""))
    .bind(now.to_rfc3339())
    .bind(&id)
    .execute(&state.db)
    .await?;

    record_activity(
        &state.db,
        &claims.sub,
        Some(&id),
        ActivityKind::DocumentCancelled,
        "Document cancelled",
        req.reason.as_deref().unwrap_or(""),
    )
    .await?;

    let doc = fetch_document(&state.db, &id).await?;
    Ok(Json(doc.into_document()?))
}

/// Download the stored document bytes. Flattening signed fields into the PDF
/// itself is delegated to the rendering pipeline.
pub async fn export_document(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Result<(StatusCode, [(String, String); 2], Vec<u8>), ApiError> {
    let doc = fetch_document(&state.db, &id).await?;
    ensure_owner(&doc, &claims)?;

    Ok((
        StatusCode::OK,
        [
            ("Content-Type".to_string(), doc.file_type.clone()),
            (
                "Content-Disposition".to_string(),
                format!("attachment; filename=\"{}\"", doc.original_filename),
            ),
        ],
        doc.file_data,
    ))
}

/// Documents where the caller appears as a recipient (matched by account
/// email), regardless of which owner sent them.
pub async fn shared_with_me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Document>>, ApiError> {
    let rows: Vec<DbDocument> = sqlx::query_as(
        r#"
        SELECT d.* FROM documents d
        JOIN document_recipients r ON r.document_id = d.id
        WHERE r.email = ? AND d.status != ?
        ORDER BY d.updated_at DESC
        "#,
    )
    .bind(claims.email.to_ascii_lowercase())
    .bind(DocumentStatus::Draft.as_str())
    .fetch_all(&state.db)
    .await?;

    rows.into_iter()
        .map(DbDocument::into_document)
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}
