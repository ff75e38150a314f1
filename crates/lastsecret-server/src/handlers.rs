use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info};

use crate::{error::VaultError, store::crypto::log_tag, AppState};

// ── Health ────────────────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

// ── Create ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateRequest {
    pub secret: String,
    pub ttl_seconds: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    pub id: String,
    pub url: String,
    pub ttl_seconds: u64,
    pub expires_at: i64,
}

pub async fn create_secret(
    State(state): State<AppState>,
    body: Result<Json<CreateRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return bad_body(rejection),
    };
    match state.vault.submit(&body.secret, body.ttl_seconds) {
        Ok(sub) => {
            info!(id = sub.id.log_tag(), ttl_seconds = sub.ttl_seconds, "secret.create");
            let url = share_url(state.public_url.as_deref(), sub.id.as_str());
            (
                StatusCode::CREATED,
                Json(CreateResponse {
                    id: sub.id.to_string(),
                    url,
                    ttl_seconds: sub.ttl_seconds,
                    expires_at: sub.expires_at,
                }),
            )
                .into_response()
        }
        Err(e) => vault_error(e),
    }
}

// ── Reveal ────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct RevealResponse {
    pub secret: String,
}

pub async fn reveal_secret(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.vault.reveal(&id) {
        Ok(secret) => {
            info!(id = log_tag(&id), "secret.reveal");
            Json(RevealResponse { secret }).into_response()
        }
        Err(e) => vault_error(e),
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// Path (or absolute URL when `public_url` is set) of the page that reveals `id`.
pub fn share_url(public_url: Option<&str>, id: &str) -> String {
    match public_url {
        Some(base) => format!("{}/s/{id}", base.trim_end_matches('/')),
        None => format!("/s/{id}"),
    }
}

/// Body extraction failures keep axum's status but use the JSON error shape.
fn bad_body(rejection: JsonRejection) -> Response {
    (
        rejection.status(),
        Json(json!({ "error": rejection.body_text() })),
    )
        .into_response()
}

fn vault_error(e: VaultError) -> Response {
    let status = match &e {
        VaultError::InvalidPayload { .. } | VaultError::InvalidTtl { .. } => {
            StatusCode::BAD_REQUEST
        }
        VaultError::NotFoundOrExpired => StatusCode::NOT_FOUND,
        VaultError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        VaultError::EncryptionFailed
        | VaultError::DecryptionFailed
        | VaultError::GenerationExhaustion => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let message = match &e {
        VaultError::StoreUnavailable(detail) => {
            error!(error = %detail, "store unavailable");
            "store unavailable".to_owned()
        }
        VaultError::EncryptionFailed
        | VaultError::DecryptionFailed
        | VaultError::GenerationExhaustion => {
            error!(error = %e, "internal error");
            e.to_string()
        }
        _ => e.to_string(),
    };

    (status, Json(json!({ "error": message }))).into_response()
}
