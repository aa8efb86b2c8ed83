//! Registration, login and bearer-token validation.
//!
//! Passwords are hashed with Argon2id; sessions are stateless HS256 JWTs.
//! Recipient signing tokens are a separate credential entirely and never go
//! through this module.

use argon2::{
    password_hash::{rand_core::OsRng, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
    Json,
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{AuthResponse, DbUser, LoginRequest, RegisterRequest};
use crate::state::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub exp: usize,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    if !req.email.contains('@') {
        return Err(ApiError::Validation("invalid email address".into()));
    }
    if req.password.len() < 8 {
        return Err(ApiError::Validation(
            "password must be at least 8 characters".into(),
        ));
    }
    if req.first_name.trim().is_empty() || req.last_name.trim().is_empty() {
        return Err(ApiError::Validation("name must not be empty".into()));
    }

    let email = req.email.to_ascii_lowercase();
    let existing: Option<DbUser> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(&email)
        .fetch_optional(&state.db)
        .await?;
    if existing.is_some() {
        return Err(ApiError::Conflict("email is already registered".into()));
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(req.password.as_bytes(), &salt)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("password hashing failed: {e}")))?
        .to_string();

    let user_id = Uuid::new_v4().to_string();
    sqlx::query(
        r#"
        INSERT INTO users (id, first_name, last_name, address, email, password_hash, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&user_id)
    .bind(&req.first_name)
    .bind(&req.last_name)
    .bind(&req.address)
    .bind(&email)
    .bind(&password_hash)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await?;

    let token = create_token(&state.jwt_secret, &user_id, &email)?;
    tracing::info!("Registered user {}", user_id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user_id,
            email,
            first_name: req.first_name,
            last_name: req.last_name,
            token,
        }),
    ))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user: Option<DbUser> = sqlx::query_as("SELECT * FROM users WHERE email = ?")
        .bind(req.email.to_ascii_lowercase())
        .fetch_optional(&state.db)
        .await?;
    let user = user.ok_or(ApiError::Unauthorized)?;

    let parsed_hash = PasswordHash::new(&user.password_hash)
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("stored hash unreadable: {e}")))?;
    Argon2::default()
        .verify_password(req.password.as_bytes(), &parsed_hash)
        .map_err(|_| ApiError::Unauthorized)?;

    let token = create_token(&state.jwt_secret, &user.id, &user.email)?;

    Ok(Json(AuthResponse {
        user_id: user.id,
        email: user.email,
        first_name: user.first_name,
        last_name: user.last_name,
        token,
    }))
}

/// Middleware for bearer-only routes: validates the JWT and injects `Claims`
/// into request extensions.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let claims =
        decode_claims(req.headers(), &state.jwt_secret).ok_or(ApiError::Unauthorized)?;
    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Best-effort claims extraction for routes that accept either a bearer
/// token or a recipient signing token.
pub fn decode_claims(headers: &HeaderMap, secret: &str) -> Option<Claims> {
    let auth_header = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let token = auth_header.strip_prefix("Bearer ")?;
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .ok()
    .map(|data| data.claims)
}

fn create_token(secret: &str, user_id: &str, email: &str) -> Result<String, ApiError> {
    let claims = Claims {
        sub: user_id.to_string(),
        email: email.to_string(),
        exp: (Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.into()))
}
