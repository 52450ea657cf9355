/*!
 * Webhook 请求分类模块
 *
 * 将原始请求体解码为 `InboundWebhook` 的某一个变体。
 * 候选结构按固定优先级依次尝试：
 * 1. `url_verification`：URL 验证挑战
 * 2. `event_callback`：消息事件信封
 *
 * 全部失败时返回 `AppError::SchemaMismatch`，列出每个尝试过的变体及其失败字段。
 */

use crate::error::{AppError, AppResult, FieldError, VariantMismatch};
use crate::models::{InboundWebhook, MessageEvent, VerificationRequest, URL_VERIFICATION};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub const VARIANT_URL_VERIFICATION: &str = "url_verification";
pub const VARIANT_EVENT_CALLBACK: &str = "event_callback";

const HEADER_FIELDS: [&str; 6] = [
    "event_id",
    "event_type",
    "create_time",
    "token",
    "app_id",
    "tenant_key",
];

/// 解析原始请求体
///
/// - 空请求体 → `AppError::EmptyBody`
/// - 非法 JSON → `AppError::InvalidJson`
/// - 结构不匹配 → `AppError::SchemaMismatch`
pub fn parse_body(body: &[u8]) -> AppResult<InboundWebhook> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(AppError::EmptyBody);
    }

    let value: Value =
        serde_json::from_slice(body).map_err(|e| AppError::InvalidJson(e.to_string()))?;

    classify(&value)
}

/// 按优先级将 JSON 值解码为已知的 Webhook 结构
pub fn classify(value: &Value) -> AppResult<InboundWebhook> {
    let mut attempts = Vec::with_capacity(2);

    match decode_verification(value) {
        Ok(request) => return Ok(InboundWebhook::UrlVerification(request)),
        Err(errors) => attempts.push(VariantMismatch {
            variant: VARIANT_URL_VERIFICATION,
            errors,
        }),
    }

    // An explicit discriminator settles the variant.
    if value.get("type").and_then(Value::as_str) == Some(URL_VERIFICATION) {
        return Err(AppError::SchemaMismatch(attempts));
    }

    match decode_message_event(value) {
        Ok(event) => Ok(InboundWebhook::Event(event)),
        Err(errors) => {
            attempts.push(VariantMismatch {
                variant: VARIANT_EVENT_CALLBACK,
                errors,
            });
            Err(AppError::SchemaMismatch(attempts))
        }
    }
}

fn decode_verification(value: &Value) -> Result<VerificationRequest, Vec<FieldError>> {
    let object = as_object(value)?;
    let mut errors = Vec::new();

    require_string(object, "", "challenge", &mut errors);

    match object.get("type") {
        // With the literal discriminator the token is optional.
        Some(Value::String(kind)) if kind == URL_VERIFICATION => {
            optional_string(object, "", "token", &mut errors);
        }
        Some(_) => errors.push(FieldError::new(
            "type",
            format!("expected \"{}\"", URL_VERIFICATION),
        )),
        None => {
            if object.contains_key("event") {
                errors.push(FieldError::new(
                    "event",
                    "unexpected event body in a verification request",
                ));
            }
            require_string(object, "", "token", &mut errors);
        }
    }

    finish(value, errors)
}

fn decode_message_event(value: &Value) -> Result<MessageEvent, Vec<FieldError>> {
    let object = as_object(value)?;
    let mut errors = Vec::new();

    require_string(object, "", "schema", &mut errors);

    if let Some(header) = require_object(object, "", "header", &mut errors) {
        for field in HEADER_FIELDS {
            require_string(header, "header", field, &mut errors);
        }
    }

    if let Some(event) = require_object(object, "", "event", &mut errors) {
        require_object(event, "event", "sender", &mut errors);
        require_object(event, "event", "message", &mut errors);
    }

    finish(value, errors)
}

fn as_object(value: &Value) -> Result<&Map<String, Value>, Vec<FieldError>> {
    value
        .as_object()
        .ok_or_else(|| vec![FieldError::new("body", "expected a JSON object")])
}

fn finish<T>(value: &Value, errors: Vec<FieldError>) -> Result<T, Vec<FieldError>>
where
    T: DeserializeOwned,
{
    if !errors.is_empty() {
        return Err(errors);
    }
    serde_json::from_value(value.clone())
        .map_err(|e| vec![FieldError::new("body", e.to_string())])
}

fn path(parent: &str, field: &str) -> String {
    if parent.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", parent, field)
    }
}

fn require_string(
    object: &Map<String, Value>,
    parent: &str,
    field: &str,
    errors: &mut Vec<FieldError>,
) {
    match object.get(field) {
        Some(Value::String(_)) => {}
        Some(_) => errors.push(FieldError::new(path(parent, field), "expected a string")),
        None => errors.push(FieldError::new(path(parent, field), "field required")),
    }
}

fn optional_string(
    object: &Map<String, Value>,
    parent: &str,
    field: &str,
    errors: &mut Vec<FieldError>,
) {
    match object.get(field) {
        None | Some(Value::Null) | Some(Value::String(_)) => {}
        Some(_) => errors.push(FieldError::new(path(parent, field), "expected a string")),
    }
}

fn require_object<'a>(
    object: &'a Map<String, Value>,
    parent: &str,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<&'a Map<String, Value>> {
    match object.get(field) {
        Some(Value::Object(inner)) => Some(inner),
        Some(_) => {
            errors.push(FieldError::new(path(parent, field), "expected an object"));
            None
        }
        None => {
            errors.push(FieldError::new(path(parent, field), "field required"));
            None
        }
    }
}
