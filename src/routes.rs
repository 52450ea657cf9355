use crate::config::Settings;
use crate::error::UnhandledError;
use crate::handlers::{feishu_webhook, health_check, AppState};
use axum::{
    extract::{Request, State},
    http::{HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::any::Any;
use std::sync::Arc;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowHeaders, AllowMethods, AllowOrigin, Any as CorsAny, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, warn};

const GENERIC_ERROR: &str = "服务器内部错误";

pub fn create_router(state: AppState) -> Router {
    let settings = state.settings.clone();

    let router = Router::new()
        // Health check
        .route("/health", get(health_check))
        // Webhooks
        .route("/webhook/feishu", post(feishu_webhook))
        .with_state(state);

    with_error_handling(router, settings.clone())
        .layer(cors_layer(&settings))
        .layer(TraceLayer::new_for_http())
}

/// Wraps `router` so that unhandled errors and panics become the generic
/// `{"success": false, "error": ..., "path": ...}` envelope.
pub fn with_error_handling(router: Router, settings: Arc<Settings>) -> Router {
    router
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn_with_state(settings, error_envelope))
}

pub async fn error_envelope(
    State(settings): State<Arc<Settings>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    let response = next.run(request).await;

    let Some(UnhandledError(detail)) = response.extensions().get::<UnhandledError>().cloned()
    else {
        return response;
    };

    error!(path = %path, error = %detail, "Unhandled error while processing request");

    let error = if settings.debug {
        detail
    } else {
        GENERIC_ERROR.to_string()
    };

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "success": false,
            "error": error,
            "path": path,
        })),
    )
        .into_response()
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else {
        "panic: unknown payload".to_string()
    };

    let mut response = (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": GENERIC_ERROR })),
    )
        .into_response();
    response.extensions_mut().insert(UnhandledError(detail));
    response
}

pub fn cors_layer(settings: &Settings) -> CorsLayer {
    let wildcard = |items: &[String]| items.iter().any(|item| item == "*");
    let credentials = settings.cors_allow_credentials;

    // `*` cannot be combined with credentials, so mirror the request instead.
    let origins = if wildcard(&settings.cors_origins) {
        if credentials {
            AllowOrigin::mirror_request()
        } else {
            AllowOrigin::from(CorsAny)
        }
    } else {
        AllowOrigin::list(parse_values::<HeaderValue>("CORS_ORIGINS", &settings.cors_origins))
    };

    let methods = if wildcard(&settings.cors_allow_methods) {
        if credentials {
            AllowMethods::mirror_request()
        } else {
            AllowMethods::from(CorsAny)
        }
    } else {
        AllowMethods::list(parse_values::<Method>(
            "CORS_ALLOW_METHODS",
            &settings.cors_allow_methods,
        ))
    };

    let headers = if wildcard(&settings.cors_allow_headers) {
        if credentials {
            AllowHeaders::mirror_request()
        } else {
            AllowHeaders::from(CorsAny)
        }
    } else {
        AllowHeaders::list(parse_values::<HeaderName>(
            "CORS_ALLOW_HEADERS",
            &settings.cors_allow_headers,
        ))
    };

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(methods)
        .allow_headers(headers)
        .allow_credentials(credentials)
}

fn parse_values<T>(key: &str, items: &[String]) -> Vec<T>
where
    T: std::str::FromStr,
{
    items
        .iter()
        .filter_map(|item| match item.parse::<T>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid {} entry: {}", key, item);
                None
            }
        })
        .collect()
}
