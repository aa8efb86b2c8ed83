//! End-to-end handler walks over an in-memory database.
//!
//! Each test builds a fresh pool, registers an owner and drives the real
//! handlers with constructed extractors, so the whole stack from request
//! body to SQL runs exactly as it does in production.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap};
use axum::{Extension, Json};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use sqlx::sqlite::SqlitePoolOptions;
use uuid::Uuid;

use esign_core::FieldSubmission;
use esign_types::{
    AssignmentStatus, DocumentStatus, DocumentTool, RecipientStatus, TextStyle, ToolAssignment,
    ToolType, ToolValue,
};

use crate::auth::{self, Claims};
use crate::error::ApiError;
use crate::handlers::{self, documents, publish, signing, tools as tool_handlers};
use crate::models::{
    PublishRequest, PublishResponse, RegisterRequest, SignRequest, SignResponse, TokenQuery,
    ToolPatchRequest, UploadDocumentRequest,
};
use crate::state::AppState;

// A single connection keeps every query on the same in-memory database.
async fn test_state() -> Arc<AppState> {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    AppState::run_migrations(&db).await.expect("migrations");
    Arc::new(AppState {
        db,
        jwt_secret: "test-secret".into(),
        public_url: "http://localhost:3001".into(),
    })
}

async fn register_owner(state: &Arc<AppState>) -> (Claims, HeaderMap) {
    let (_, Json(auth)) = auth::register(
        State(state.clone()),
        Json(RegisterRequest {
            first_name: "Olive".into(),
            last_name: "Owner".into(),
            address: String::new(),
            email: "owner@example.com".into(),
            password: "correct-horse-battery".into(),
        }),
    )
    .await
    .expect("register");

    let claims = Claims {
        sub: auth.user_id,
        email: auth.email,
        exp: usize::MAX,
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        header::AUTHORIZATION,
        format!("Bearer {}", auth.token).parse().unwrap(),
    );
    (claims, headers)
}

async fn upload_draft(state: &Arc<AppState>, claims: &Claims) -> String {
    let (_, Json(doc)) = documents::upload_document(
        State(state.clone()),
        Extension(claims.clone()),
        Json(UploadDocumentRequest {
            name: "Lease agreement".into(),
            original_filename: "lease.pdf".into(),
            file_type: "application/pdf".into(),
            file_base64: BASE64.encode(b"%PDF-1.4 test bytes"),
        }),
    )
    .await
    .expect("upload");
    assert_eq!(doc.status, DocumentStatus::Draft);
    doc.id
}

fn signature_field(tool_id: &str, y: f64, email: &str, name: &str) -> DocumentTool {
    DocumentTool {
        id: tool_id.into(),
        tool_type: ToolType::RecipientSignature,
        label: "Sign here".into(),
        page: 1,
        x: 100.0,
        y,
        width: 150.0,
        height: 50.0,
        style: TextStyle::default(),
        value: None,
        assigned_recipients: vec![ToolAssignment::pending(email, name)],
    }
}

async fn set_tools(
    state: &Arc<AppState>,
    headers: &HeaderMap,
    doc_id: &str,
    tools: Vec<DocumentTool>,
) {
    tool_handlers::replace_tools(
        State(state.clone()),
        Path(doc_id.to_string()),
        headers.clone(),
        Json(tools),
    )
    .await
    .expect("replace tools");
}

async fn publish_doc(state: &Arc<AppState>, claims: &Claims, doc_id: &str) -> PublishResponse {
    let Json(resp) = publish::publish_document(
        State(state.clone()),
        Extension(claims.clone()),
        Path(doc_id.to_string()),
        Json(PublishRequest {
            expires_in_days: Some(30),
        }),
    )
    .await
    .expect("publish");
    resp
}

fn token_for(resp: &PublishResponse, email: &str) -> String {
    resp.recipients
        .iter()
        .find(|r| r.email == email)
        .expect("recipient in publish response")
        .token
        .clone()
}

async fn submit_signature(
    state: &Arc<AppState>,
    doc_id: &str,
    token: &str,
    tool_id: &str,
) -> SignResponse {
    let Json(resp) = signing::sign_document(
        State(state.clone()),
        Path(doc_id.to_string()),
        HeaderMap::new(),
        Json(SignRequest {
            token: Some(token.to_string()),
            signatures: vec![FieldSubmission {
                tool_id: tool_id.into(),
                value: ToolValue::SignatureImage("data:image/png;base64,iVBORw0KGgo=".into()),
            }],
        }),
    )
    .await
    .expect("sign");
    resp
}

async fn recipient_row_status(state: &AppState, doc_id: &str, email: &str) -> String {
    sqlx::query_scalar(
        "SELECT status FROM document_recipients WHERE document_id = ? AND email = ?",
    )
    .bind(doc_id)
    .bind(email)
    .fetch_one(&state.db)
    .await
    .expect("recipient row")
}

async fn document_status(state: &AppState, doc_id: &str) -> DocumentStatus {
    handlers::fetch_document(&state.db, doc_id)
        .await
        .expect("document")
        .status()
        .expect("status")
}

#[tokio::test]
async fn publish_view_sign_completes_single_recipient_document() {
    let state = test_state().await;
    let (claims, headers) = register_owner(&state).await;
    let doc_id = upload_draft(&state, &claims).await;
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![signature_field("t1", 100.0, "ann@example.com", "Ann")],
    )
    .await;

    let resp = publish_doc(&state, &claims, &doc_id).await;
    assert_eq!(resp.recipients.len(), 1);
    assert!(resp.expires_at > Utc::now());
    let token = token_for(&resp, "ann@example.com");

    let Json(view) = publish::published_document(
        State(state.clone()),
        Path(resp.publish_link.clone()),
        Query(TokenQuery {
            token: Some(token.clone()),
        }),
    )
    .await
    .expect("recipient view");
    assert_eq!(view.recipient_status, RecipientStatus::Viewed);
    assert_eq!(view.recipient_email, "ann@example.com");
    assert_eq!(view.tools.len(), 1);

    let signed = submit_signature(&state, &doc_id, &token, "t1").await;
    assert_eq!(signed.recorded, 1);
    assert_eq!(signed.recipient_status, RecipientStatus::Signed);
    assert_eq!(signed.document_status, DocumentStatus::Completed);

    // Completed documents are closed to republish and layout edits.
    let err = publish::publish_document(
        State(state.clone()),
        Extension(claims.clone()),
        Path(doc_id.clone()),
        Json(PublishRequest {
            expires_in_days: None,
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)));

    let err = tool_handlers::replace_tools(
        State(state.clone()),
        Path(doc_id.clone()),
        headers.clone(),
        Json(vec![]),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::InvalidState(_)));
}

#[tokio::test]
async fn document_stays_pending_until_every_recipient_signs() {
    let state = test_state().await;
    let (claims, headers) = register_owner(&state).await;
    let doc_id = upload_draft(&state, &claims).await;
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![
            signature_field("t1", 100.0, "ann@example.com", "Ann"),
            signature_field("t2", 200.0, "bob@example.com", "Bob"),
        ],
    )
    .await;

    let resp = publish_doc(&state, &claims, &doc_id).await;
    assert_eq!(resp.recipients.len(), 2);

    let signed =
        submit_signature(&state, &doc_id, &token_for(&resp, "ann@example.com"), "t1").await;
    assert_eq!(signed.recipient_status, RecipientStatus::Signed);
    assert_eq!(signed.document_status, DocumentStatus::PendingSignatures);
    assert_eq!(
        document_status(&state, &doc_id).await,
        DocumentStatus::PendingSignatures
    );
}

#[tokio::test]
async fn leftover_recipient_rows_are_retired_at_publish() {
    let state = test_state().await;
    let (claims, headers) = register_owner(&state).await;
    let doc_id = upload_draft(&state, &claims).await;
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![signature_field("t1", 100.0, "ann@example.com", "Ann")],
    )
    .await;

    // A recipient row from an earlier attempt that failed before the status
    // flip, for an email no longer assigned to any field.
    sqlx::query(
        r#"
        INSERT INTO document_recipients
            (id, document_id, email, name, token, status, signing_order, created_at)
        VALUES (?, ?, 'bob@example.com', 'Bob', 'stale-token-bob', 'pending', 0, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&doc_id)
    .bind(Utc::now().to_rfc3339())
    .execute(&state.db)
    .await
    .expect("insert leftover row");

    let resp = publish_doc(&state, &claims, &doc_id).await;
    assert_eq!(resp.recipients.len(), 1);
    assert_eq!(resp.recipients[0].email, "ann@example.com");
    assert_eq!(
        recipient_row_status(&state, &doc_id, "bob@example.com").await,
        "expired"
    );

    // The leftover token no longer opens the document.
    let err = publish::published_document(
        State(state.clone()),
        Path(resp.publish_link.clone()),
        Query(TokenQuery {
            token: Some("stale-token-bob".into()),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Expired));

    // And the retired row does not hold the document open.
    let signed =
        submit_signature(&state, &doc_id, &token_for(&resp, "ann@example.com"), "t1").await;
    assert_eq!(signed.document_status, DocumentStatus::Completed);
}

#[tokio::test]
async fn unassigning_a_recipients_last_field_retires_their_row() {
    let state = test_state().await;
    let (claims, headers) = register_owner(&state).await;
    let doc_id = upload_draft(&state, &claims).await;
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![
            signature_field("t1", 100.0, "ann@example.com", "Ann"),
            signature_field("t2", 200.0, "bob@example.com", "Bob"),
        ],
    )
    .await;

    let resp = publish_doc(&state, &claims, &doc_id).await;
    let bob_token = token_for(&resp, "bob@example.com");

    // Drop Bob's only field while signatures are pending.
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![signature_field("t1", 100.0, "ann@example.com", "Ann")],
    )
    .await;
    assert_eq!(
        recipient_row_status(&state, &doc_id, "bob@example.com").await,
        "expired"
    );

    let err = publish::published_document(
        State(state.clone()),
        Path(resp.publish_link.clone()),
        Query(TokenQuery {
            token: Some(bob_token),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Expired));

    let signed =
        submit_signature(&state, &doc_id, &token_for(&resp, "ann@example.com"), "t1").await;
    assert_eq!(signed.document_status, DocumentStatus::Completed);
}

#[tokio::test]
async fn expired_link_rejects_view_and_sign() {
    let state = test_state().await;
    let (claims, headers) = register_owner(&state).await;
    let doc_id = upload_draft(&state, &claims).await;
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![signature_field("t1", 100.0, "ann@example.com", "Ann")],
    )
    .await;

    let resp = publish_doc(&state, &claims, &doc_id).await;
    let token = token_for(&resp, "ann@example.com");

    sqlx::query("UPDATE documents SET publish_link_expires_at = ? WHERE id = ?")
        .bind((Utc::now() - Duration::days(2)).to_rfc3339())
        .bind(&doc_id)
        .execute(&state.db)
        .await
        .expect("expire link");

    let err = publish::published_document(
        State(state.clone()),
        Path(resp.publish_link.clone()),
        Query(TokenQuery {
            token: Some(token.clone()),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Expired));

    let err = signing::sign_document(
        State(state.clone()),
        Path(doc_id.clone()),
        HeaderMap::new(),
        Json(SignRequest {
            token: Some(token),
            signatures: vec![FieldSubmission {
                tool_id: "t1".into(),
                value: ToolValue::SignatureImage("data:image/png;base64,iVBORw0KGgo=".into()),
            }],
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Expired));
}

#[tokio::test]
async fn unpublish_invalidates_tokens_but_keeps_signed_data() {
    let state = test_state().await;
    let (claims, headers) = register_owner(&state).await;
    let doc_id = upload_draft(&state, &claims).await;
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![
            signature_field("t1", 100.0, "ann@example.com", "Ann"),
            signature_field("t2", 200.0, "bob@example.com", "Bob"),
        ],
    )
    .await;

    let resp = publish_doc(&state, &claims, &doc_id).await;
    let bob_token = token_for(&resp, "bob@example.com");
    submit_signature(&state, &doc_id, &token_for(&resp, "ann@example.com"), "t1").await;

    let Json(doc) = publish::unpublish_document(
        State(state.clone()),
        Extension(claims.clone()),
        Path(doc_id.clone()),
    )
    .await
    .expect("unpublish");
    assert_eq!(doc.status, DocumentStatus::Expired);
    assert_eq!(
        recipient_row_status(&state, &doc_id, "bob@example.com").await,
        "expired"
    );
    assert_eq!(
        recipient_row_status(&state, &doc_id, "ann@example.com").await,
        "signed"
    );

    let err = publish::published_document(
        State(state.clone()),
        Path(resp.publish_link.clone()),
        Query(TokenQuery {
            token: Some(bob_token),
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Expired));

    // Ann's captured signature survives the unpublish untouched.
    let rows = handlers::fetch_document_tools(&state.db, &doc_id)
        .await
        .expect("tools");
    let t1 = rows
        .into_iter()
        .find(|r| r.tool_id == "t1")
        .expect("t1 row")
        .into_tool()
        .expect("decode");
    let entry = t1.assignment_for("ann@example.com").expect("assignment");
    assert_eq!(entry.status, AssignmentStatus::Signed);
    assert!(entry.signature.is_some());
}

#[tokio::test]
async fn updates_to_different_tools_both_persist() {
    let state = test_state().await;
    let (claims, headers) = register_owner(&state).await;
    let doc_id = upload_draft(&state, &claims).await;
    set_tools(
        &state,
        &headers,
        &doc_id,
        vec![
            signature_field("t1", 100.0, "ann@example.com", "Ann"),
            signature_field("t2", 200.0, "ann@example.com", "Ann"),
        ],
    )
    .await;

    // Two editors read both fields at version 0 and update different ones.
    let Json(updated) = tool_handlers::patch_tool(
        State(state.clone()),
        Path((doc_id.clone(), "t1".into())),
        headers.clone(),
        Json(ToolPatchRequest {
            x: Some(250.0),
            expected_version: Some(0),
            ..Default::default()
        }),
    )
    .await
    .expect("patch t1");
    assert_eq!(updated.x, 250.0);

    let Json(updated) = tool_handlers::patch_tool(
        State(state.clone()),
        Path((doc_id.clone(), "t2".into())),
        headers.clone(),
        Json(ToolPatchRequest {
            y: Some(400.0),
            expected_version: Some(0),
            ..Default::default()
        }),
    )
    .await
    .expect("patch t2");
    assert_eq!(updated.y, 400.0);

    // A stale read of t1 loses to the earlier write.
    let err = tool_handlers::patch_tool(
        State(state.clone()),
        Path((doc_id.clone(), "t1".into())),
        headers.clone(),
        Json(ToolPatchRequest {
            x: Some(999.0),
            expected_version: Some(0),
            ..Default::default()
        }),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, ApiError::Conflict(_)));

    let Json(listing) = tool_handlers::list_tools(
        State(state.clone()),
        Path(doc_id.clone()),
        Query(TokenQuery { token: None }),
        headers.clone(),
    )
    .await
    .expect("list tools");
    let t1 = listing.tools.iter().find(|t| t.id == "t1").expect("t1");
    let t2 = listing.tools.iter().find(|t| t.id == "t2").expect("t2");
    assert_eq!(t1.x, 250.0);
    assert_eq!(t2.y, 400.0);
}
