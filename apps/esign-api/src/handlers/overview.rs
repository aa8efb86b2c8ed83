//! Dashboard counts and the activity feed.

use axum::{extract::State, Extension, Json};
use sqlx::Row;
use std::sync::Arc;

use esign_types::{Activity, DocumentStatus};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::state::AppState;

/// Per-status document counts for the caller, plus how many documents other
/// people have shared with them.
pub async fn stats(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<crate::models::OverviewStats>, ApiError> {
    let rows = sqlx::query(
        "SELECT status, COUNT(*) AS n FROM documents WHERE user_id = ? GROUP BY status",
    )
    .bind(&claims.sub)
    .fetch_all(&state.db)
    .await?;

    let mut out = crate::models::OverviewStats {
        total_documents: 0,
        draft: 0,
        pending_signatures: 0,
        completed: 0,
        expired: 0,
        cancelled: 0,
        shared_with_me: 0,
    };
    for row in rows {
        let status: String = row.try_get("status")?;
        let n: i64 = row.try_get("n")?;
        out.total_documents += n;
        match status.parse() {
            Ok(DocumentStatus::Draft) => out.draft = n,
            Ok(DocumentStatus::PendingSignatures) => out.pending_signatures = n,
            Ok(DocumentStatus::Completed) => out.completed = n,
            Ok(DocumentStatus::Expired) => out.expired = n,
            Ok(DocumentStatus::Cancelled) => out.cancelled = n,
            Err(_) => {
                tracing::warn!("Skipping unknown document status {:?} in stats", status);
            }
        }
    }

    out.shared_with_me = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM documents d
        JOIN document_recipients r ON r.document_id = d.id
        WHERE r.email = ? AND d.status != 'draft'
        "#,
    )
    .bind(claims.email.to_ascii_lowercase())
    .fetch_one(&state.db)
    .await?;

    Ok(Json(out))
}

/// Most recent activity entries for the caller, newest first.
pub async fn recent_activity(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<Activity>>, ApiError> {
    let rows: Vec<crate::models::DbActivity> = sqlx::query_as(
        "SELECT * FROM activity WHERE user_id = ? ORDER BY created_at DESC LIMIT 50",
    )
    .bind(&claims.sub)
    .fetch_all(&state.db)
    .await?;

    rows.into_iter()
        .map(crate::models::DbActivity::into_activity)
        .collect::<Result<Vec<_>, _>>()
        .map(Json)
}
