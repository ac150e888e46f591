//! Prompt-manifest webhook
//!
//! `POST /webhook/commit` commits the payload's manifest straight to the
//! configured branch; `GET /health` answers a liveness check.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::github::{GithubClient, GithubError, Stage};

/// Body sent by the prompt hub when a prompt is committed
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    pub prompt_id: uuid::Uuid,
    pub prompt_name: String,
    pub commit_hash: String,
    pub created_at: String,
    pub created_by: String,
    pub manifest: serde_json::Map<String, Value>,
}

#[derive(Debug, Serialize)]
pub struct CommitResponse {
    pub message: &'static str,
    pub github_commit_details: Value,
    pub github_content_details: Value,
}

#[derive(Clone)]
pub struct AppState {
    pub github: Arc<GithubClient>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook/commit", post(commit_manifest))
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({"status": "ok", "message": "Service is running."}))
}

async fn commit_manifest(
    State(state): State<AppState>,
    Json(payload): Json<WebhookPayload>,
) -> Result<(StatusCode, Json<CommitResponse>), AppError> {
    tracing::info!(
        prompt_id = %payload.prompt_id,
        prompt_name = %payload.prompt_name,
        commit_hash = %payload.commit_hash,
        created_by = %payload.created_by,
        created_at = %payload.created_at,
        "Webhook received"
    );

    let manifest = Value::Object(payload.manifest);
    let response = state
        .github
        .commit_manifest(&manifest, &payload.commit_hash)
        .await
        .map_err(|e| AppError::from_github(e, &state.github.config().branch))?;

    Ok((
        StatusCode::CREATED,
        Json(CommitResponse {
            message: "Webhook received and manifest committed directly to GitHub successfully.",
            github_commit_details: response.get("commit").cloned().unwrap_or_else(|| json!({})),
            github_content_details: response.get("content").cloned().unwrap_or_else(|| json!({})),
        }),
    ))
}

// ============================================================
// Error Handling
// ============================================================

#[derive(Debug)]
pub enum AppError {
    /// GitHub answered with an error status; passed through
    Upstream(StatusCode, String),
    Unavailable(String),
    Internal(String),
}

impl AppError {
    fn from_github(error: GithubError, branch: &str) -> Self {
        let detail = error.to_string();
        let app_error = match error {
            GithubError::Status {
                stage: Stage::PutContent,
                status,
                body,
            } if status == StatusCode::CONFLICT => AppError::Upstream(
                status,
                format!(
                    "GitHub API conflict (PUT content): {}. This might be due to an outdated SHA or branch protection rules.",
                    body
                ),
            ),
            GithubError::Status {
                stage: Stage::PutContent,
                status,
                body,
            } if status == StatusCode::UNPROCESSABLE_ENTITY => AppError::Upstream(
                status,
                format!(
                    "GitHub API Unprocessable Entity (PUT content): {}. Ensure the branch '{}' exists and the payload is correctly formatted.",
                    body, branch
                ),
            ),
            GithubError::Status { status, .. } => AppError::Upstream(status, detail),
            GithubError::Network { .. } => AppError::Unavailable(detail),
            GithubError::Config(_) => AppError::Internal(detail),
        };
        if !matches!(app_error, AppError::Internal(_)) {
            tracing::error!("{:?}", app_error);
        }
        app_error
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            AppError::Upstream(status, msg) => (status, msg),
            AppError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            AppError::Internal(cause) => {
                tracing::error!(%cause, "Internal error while handling webhook");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred.".to_string(),
                )
            }
        };
        (status, Json(json!({"detail": detail}))).into_response()
    }
}

/// Bind and serve until the process is stopped
pub async fn serve(addr: std::net::SocketAddr, state: AppState) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Webhook listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}
