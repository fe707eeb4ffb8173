//! HTTP API.
//!
//! Routes:
//!
//! | Method | Path                         | Purpose                          |
//! |--------|------------------------------|----------------------------------|
//! | GET    | `/health`                    | liveness + version               |
//! | POST   | `/api/analyze`               | run the agent pipeline on text   |
//! | POST   | `/api/save-scan`             | OCR + dedup + persist an image   |
//! | POST   | `/api/create-stripe-checkout`| start a subscription checkout    |
//! | POST   | `/api/stripe-webhooks`       | signed billing event ingestion   |
//! | POST   | `/api/save-onboarding-data`  | persist goals/diets/preferences  |
//! | POST   | `/api/save-plan`             | persist the chosen plan          |
//!
//! Failures all use the same envelope:
//! `{ "error": { "code": "...", "message": "..." } }`.

use axum::body::Bytes;
use axum::extract::{Multipart, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::billing::{self, StripeClient};
use crate::config::BillingConfig;
use crate::dedup::ScanPipeline;
use crate::models::UserProfile;
use crate::orchestrator::Orchestrator;
use crate::store::{MenuStore, OnboardingData};

pub struct AppState {
    pub orchestrator: Orchestrator,
    pub pipeline: ScanPipeline,
    pub store: Arc<dyn MenuStore>,
    pub stripe: Option<StripeClient>,
    pub billing: BillingConfig,
    /// Endpoint secret for webhook verification, from `STRIPE_WEBHOOK_SECRET`.
    pub webhook_secret: Option<String>,
}

// ─── Error envelope ─────────────────────────────────────────────────

pub enum AppError {
    BadRequest(String),
    InvalidSignature(String),
    NotFound(String),
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match self {
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, "bad_request", m),
            AppError::InvalidSignature(m) => (StatusCode::BAD_REQUEST, "invalid_signature", m),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, "not_found", m),
            AppError::Internal(err) => {
                tracing::error!(error = %format!("{:#}", err), "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal",
                    "Internal server error".to_string(),
                )
            }
        };
        let body = json!({ "error": { "code": code, "message": message } });
        (status, Json(body)).into_response()
    }
}

// ─── Router ─────────────────────────────────────────────────────────

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/analyze", post(analyze))
        .route("/api/save-scan", post(save_scan))
        .route("/api/create-stripe-checkout", post(create_checkout))
        .route("/api/stripe-webhooks", post(stripe_webhooks))
        .route("/api/save-onboarding-data", post(save_onboarding))
        .route("/api/save-plan", post(save_plan))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: Arc<AppState>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    tracing::info!(%bind, "Listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

// ─── Handlers ───────────────────────────────────────────────────────

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
struct AnalyzeRequest {
    menu_text: String,
    #[serde(default)]
    goals: Vec<String>,
    #[serde(default)]
    restrictions: Vec<String>,
    #[serde(default)]
    recent_patterns: Vec<String>,
}

async fn analyze(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.menu_text.trim().is_empty() {
        return Err(AppError::BadRequest("menu_text must not be empty".to_string()));
    }
    let profile = UserProfile {
        goals: request.goals,
        restrictions: request.restrictions,
        recent_patterns: request.recent_patterns,
    };
    let analysis = state.orchestrator.analyze(&request.menu_text, &profile).await;
    Ok(Json(analysis))
}

async fn save_scan(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut image: Option<Bytes> = None;
    let mut user_id: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        match field.name() {
            Some("image") => {
                image = Some(field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read image field: {}", e))
                })?);
            }
            Some("user_id") => {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read user_id field: {}", e))
                })?;
                user_id = Some(
                    text.trim()
                        .parse()
                        .map_err(|_| AppError::BadRequest("user_id is not a UUID".to_string()))?,
                );
            }
            _ => {}
        }
    }

    let image = image.ok_or_else(|| AppError::BadRequest("Missing image field".to_string()))?;
    let user_id =
        user_id.ok_or_else(|| AppError::BadRequest("Missing user_id field".to_string()))?;
    if image.is_empty() {
        return Err(AppError::BadRequest("Image field is empty".to_string()));
    }

    let outcome = state.pipeline.save_scan(user_id, &image).await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct CheckoutRequest {
    user_id: Uuid,
    plan: String,
}

async fn create_checkout(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CheckoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let stripe = state
        .stripe
        .as_ref()
        .ok_or_else(|| AppError::BadRequest("Billing is not configured".to_string()))?;
    state.store.ensure_user(request.user_id).await?;
    let url = stripe
        .create_checkout_session(&state.billing, request.user_id, &request.plan)
        .await?;
    Ok(Json(json!({ "url": url })))
}

async fn stripe_webhooks(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("Webhooks are not configured".to_string()))?;
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::InvalidSignature("Missing signature header".to_string()))?;

    billing::verify_signature(
        &body,
        signature,
        secret,
        state.billing.signature_tolerance_secs,
        chrono::Utc::now().timestamp(),
    )
    .map_err(|e| AppError::InvalidSignature(format!("{:#}", e)))?;

    let event: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|_| AppError::BadRequest("Webhook body is not JSON".to_string()))?;
    billing::handle_event(state.store.as_ref(), &event).await?;
    Ok(Json(json!({ "received": true })))
}

#[derive(Deserialize)]
struct OnboardingRequest {
    user_id: Uuid,
    #[serde(default)]
    goals: Vec<String>,
    #[serde(default)]
    diets: Vec<String>,
    #[serde(default)]
    preferences: serde_json::Value,
}

async fn save_onboarding(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OnboardingRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.store.ensure_user(request.user_id).await?;
    state
        .store
        .save_onboarding(
            request.user_id,
            OnboardingData {
                goals: request.goals,
                diets: request.diets,
                preferences: request.preferences,
            },
        )
        .await?;
    Ok(Json(json!({ "saved": true })))
}

#[derive(Deserialize)]
struct SavePlanRequest {
    user_id: Uuid,
    plan: String,
}

async fn save_plan(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SavePlanRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.plan.trim().is_empty() {
        return Err(AppError::BadRequest("plan must not be empty".to_string()));
    }
    state.store.ensure_user(request.user_id).await?;
    state.store.save_plan(request.user_id, &request.plan).await?;
    Ok(Json(json!({ "saved": true })))
}
