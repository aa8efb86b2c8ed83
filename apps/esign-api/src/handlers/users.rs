//! Saved-signature upsert and fetch.

use axum::{extract::State, Extension, Json};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use esign_types::{ActivityKind, SignatureRecord, User};

use crate::auth::Claims;
use crate::error::ApiError;
use crate::handlers::record_activity;
use crate::models::{DbSignature, DbUser, UpsertSignatureRequest};
use crate::state::AppState;

/// The caller's own profile.
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<User>, ApiError> {
    let row: Option<DbUser> = sqlx::query_as("SELECT * FROM users WHERE id = ?")
        .bind(&claims.sub)
        .fetch_optional(&state.db)
        .await?;
    let row = row.ok_or(ApiError::NotFound("user"))?;
    Ok(Json(row.into_user()))
}

/// Create or replace the caller's saved signature. One row per user,
/// enforced by the unique constraint on `user_id`.
pub async fn upsert_signature(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<UpsertSignatureRequest>,
) -> Result<Json<SignatureRecord>, ApiError> {
    if req.signature_data.trim().is_empty() {
        return Err(ApiError::Validation("signature data must not be empty".into()));
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO signatures (id, user_id, signature_type, signature_data, initials_data, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (user_id) DO UPDATE SET
            signature_type = excluded.signature_type,
            signature_data = excluded.signature_data,
            initials_data = excluded.initials_data,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&claims.sub)
    .bind(req.signature_type.as_str())
    .bind(&req.signature_data)
    .bind(&req.initials_data)
    .bind(now.to_rfc3339())
    .execute(&state.db)
    .await?;

    record_activity(
        &state.db,
        &claims.sub,
        None,
        ActivityKind::SignatureSaved,
        "Signature saved",
        req.signature_type.as_str(),
    )
    .await?;

    fetch_signature_record(&state, &claims.sub).await
}

pub async fn get_signature(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<SignatureRecord>, ApiError> {
    fetch_signature_record(&state, &claims.sub).await
}

async fn fetch_signature_record(
    state: &AppState,
    user_id: &str,
) -> Result<Json<SignatureRecord>, ApiError> {
    let row: Option<DbSignature> = sqlx::query_as("SELECT * FROM signatures WHERE user_id = ?")
        .bind(user_id)
        .fetch_optional(&state.db)
        .await?;
    let row = row.ok_or(ApiError::NotFound("signature"))?;

    Ok(Json(SignatureRecord {
        signature_type: row
            .signature_type
            .parse()
            .map_err(|e: esign_types::ParseEnumError| ApiError::Internal(e.into()))?,
        id: row.id,
        user_id: row.user_id,
        signature_data: row.signature_data,
        initials_data: row.initials_data,
        updated_at: row.updated_at,
    }))
}
