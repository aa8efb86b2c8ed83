//! HTTP handlers, grouped by resource.

pub mod documents;
pub mod overview;
pub mod publish;
pub mod signing;
pub mod tools;
pub mod users;

use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use esign_types::ActivityKind;

use crate::auth::Claims;
use crate::error::ApiError;
use crate::models::{DbDocument, DbTool};

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

pub(crate) async fn fetch_document(db: &SqlitePool, id: &str) -> Result<DbDocument, ApiError> {
    let doc: Option<DbDocument> = sqlx::query_as("SELECT * FROM documents WHERE id = ?")
        .bind(id)
        .fetch_optional(db)
        .await?;
    doc.ok_or(ApiError::NotFound("document"))
}

/// Every owner-scoped operation goes through this check.
pub(crate) fn ensure_owner(doc: &DbDocument, claims: &Claims) -> Result<(), ApiError> {
    if doc.user_id != claims.sub {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

pub(crate) async fn fetch_document_tools(
    db: &SqlitePool,
    document_id: &str,
) -> Result<Vec<DbTool>, ApiError> {
    let rows: Vec<DbTool> =
        sqlx::query_as("SELECT * FROM document_tools WHERE document_id = ? ORDER BY page, y, x")
            .bind(document_id)
            .fetch_all(db)
            .await?;
    Ok(rows)
}

/// Append one audit-trail entry. Works inside and outside transactions.
pub(crate) async fn record_activity<'e, E>(
    exec: E,
    user_id: &str,
    document_id: Option<&str>,
    kind: ActivityKind,
    title: &str,
    description: &str,
) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO activity (id, user_id, document_id, kind, title, description, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id)
    .bind(document_id)
    .bind(kind.as_str())
    .bind(title)
    .bind(description)
    .bind(Utc::now().to_rfc3339())
    .execute(exec)
    .await?;
    Ok(())
}
