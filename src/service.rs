use crate::error::AppResult;
use crate::models::{EventOutcome, MessageEvent};
use tracing::info;

pub const MESSAGE_EVENT_PROCESSED: &str = "消息事件处理成功";

/// Business logic behind the webhook endpoint.
///
/// Event handling is a placeholder: every validated event is acknowledged.
#[derive(Clone, Debug, Default)]
pub struct WebhookService;

impl WebhookService {
    pub fn new() -> Self {
        Self
    }

    pub async fn handle_message_event(&self, event: &MessageEvent) -> AppResult<EventOutcome> {
        let header = &event.header;

        info!(
            event_id = %header.event_id,
            event_type = %header.event_type,
            created_at = ?header.created_at(),
            "Processing Feishu event"
        );

        Ok(EventOutcome {
            success: true,
            event_id: header.event_id.clone(),
            event_type: header.event_type.clone(),
            message: MESSAGE_EVENT_PROCESSED.to_string(),
        })
    }
}
