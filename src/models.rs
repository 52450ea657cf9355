use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const URL_VERIFICATION: &str = "url_verification";

/// URL-verification handshake sent by Feishu when the callback URL is registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationRequest {
    pub challenge: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(rename = "type", default = "url_verification_type")]
    pub kind: String,
}

fn url_verification_type() -> String {
    URL_VERIFICATION.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventHeader {
    pub event_id: String,
    pub event_type: String,
    pub create_time: String,
    pub token: String,
    pub app_id: String,
    pub tenant_key: String,
}

impl EventHeader {
    /// `create_time` is a millisecond Unix timestamp carried as a string.
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        let millis: i64 = self.create_time.parse().ok()?;
        Utc.timestamp_millis_opt(millis).single()
    }
}

/// Event payload. `sender` and `message` are passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventBody {
    pub sender: Value,
    pub message: Value,
}

/// Schema 2.0 event callback envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    pub schema: String,
    pub header: EventHeader,
    pub event: EventBody,
}

/// The closed set of bodies accepted on the webhook endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundWebhook {
    UrlVerification(VerificationRequest),
    Event(MessageEvent),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChallengeResponse {
    pub challenge: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventOutcome {
    pub success: bool,
    pub event_id: String,
    pub event_type: String,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub app_name: String,
    pub version: String,
}
