use crate::config::Settings;
use crate::database::Database;
use crate::error::AppResult;
use crate::models::{ChallengeResponse, HealthResponse, InboundWebhook, WebhookResponse};
use crate::service::WebhookService;
use crate::webhook;
use axum::{
    body::Bytes,
    extract::{FromRef, State},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub db: Database,
    pub service: WebhookService,
}

impl FromRef<AppState> for Database {
    fn from_ref(state: &AppState) -> Self {
        state.db.clone()
    }
}

impl FromRef<AppState> for Arc<Settings> {
    fn from_ref(state: &AppState) -> Self {
        state.settings.clone()
    }
}

pub async fn health_check(State(settings): State<Arc<Settings>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        app_name: settings.app_name.clone(),
        version: settings.app_version.clone(),
    })
}

/// `POST /webhook/feishu`
///
/// The body is read as raw bytes so that empty and malformed bodies get the
/// 400 envelope instead of the extractor's rejection.
pub async fn feishu_webhook(State(state): State<AppState>, body: Bytes) -> AppResult<Response> {
    let inbound = webhook::parse_body(&body).inspect_err(|e| {
        warn!("Rejected webhook body ({}): {}", e.code(), e);
    })?;

    match inbound {
        InboundWebhook::UrlVerification(request) => {
            info!("URL verification challenge received");
            Ok(Json(ChallengeResponse {
                challenge: request.challenge,
            })
            .into_response())
        }
        InboundWebhook::Event(event) => {
            info!(
                "Event callback received: type={}, id={}",
                event.header.event_type, event.header.event_id
            );

            let outcome = state.service.handle_message_event(&event).await?;

            Ok(Json(WebhookResponse {
                success: outcome.success,
                message: outcome.message,
            })
            .into_response())
        }
    }
}
