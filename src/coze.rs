use crate::config::CozeSettings;
use crate::error::{AppError, AppResult};
use futures::stream::{self, Stream, StreamExt};
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::pin::Pin;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Question,
    Answer,
    FunctionCall,
    ToolOutput,
    FollowUp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CozeMessage {
    pub content: String,
    pub content_type: ContentType,
    pub role: Role,
    #[serde(rename = "type")]
    pub kind: MessageType,
}

impl CozeMessage {
    pub fn question(content: &str) -> Self {
        Self {
            content: content.to_string(),
            content_type: ContentType::Text,
            role: Role::User,
            kind: MessageType::Question,
        }
    }
}

#[derive(Debug, Serialize)]
struct WorkflowChatRequest {
    workflow_id: String,
    app_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    parameters: HashMap<String, String>,
    additional_messages: Vec<CozeMessage>,
}

#[derive(Debug, Deserialize)]
struct CozeErrorBody {
    code: i64,
    msg: String,
}

#[derive(Debug, Deserialize)]
struct CreateConversationResponse {
    data: Option<ConversationData>,
}

#[derive(Debug, Deserialize)]
struct ConversationData {
    id: Option<String>,
}

/// One server-sent event from a workflow chat stream.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowEvent {
    pub event: String,
    pub data: Value,
}

/// Result of a workflow chat.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CozeAnswer {
    pub content: Option<String>,
    pub debug_url: Option<String>,
    pub conversation_id: Option<String>,
    pub events: Vec<WorkflowEvent>,
}

#[derive(Clone)]
pub struct CozeClient {
    client: Client,
    settings: CozeSettings,
}

impl CozeClient {
    pub fn new(settings: CozeSettings) -> AppResult<Self> {
        let client = Client::builder().timeout(settings.timeout()).build()?;
        Ok(Self { client, settings })
    }

    fn auth_header(&self) -> String {
        format!("Bearer {}", self.settings.access_token)
    }

    pub async fn create_conversation(&self) -> AppResult<String> {
        let url = format!("{}/v1/conversation/create", self.settings.api_base_url);

        info!("Creating Coze conversation: {}", url);

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(&json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("Failed to create conversation: HTTP {} - {}", status, body);
            return Err(AppError::Coze(format!("HTTP {}: {}", status, body)));
        }

        let created: CreateConversationResponse = response.json().await?;
        let conversation_id = created
            .data
            .and_then(|data| data.id)
            .ok_or_else(|| AppError::Coze("No conversation id in response".to_string()))?;

        info!("Created Coze conversation: {}", conversation_id);
        Ok(conversation_id)
    }

    /// Runs the configured workflow for `user_input` in a fresh conversation.
    ///
    /// Without `additional_messages` the input is sent as a single user question.
    pub async fn chat_with_workflow(
        &self,
        user_input: &str,
        conversation_name: &str,
        additional_messages: Option<Vec<CozeMessage>>,
    ) -> AppResult<CozeAnswer> {
        self.ensure_configured()?;

        let conversation_id = self.create_conversation().await?;
        let request_body = self.workflow_request(
            user_input,
            conversation_name,
            Some(conversation_id),
            additional_messages,
        );

        let response = self.send_workflow_chat(&request_body).await?;
        let body = response.text().await?;

        parse_workflow_stream(&body)
    }

    /// Runs the configured workflow and yields each event as it arrives.
    ///
    /// Configuration and HTTP status failures are returned before any event;
    /// API errors inside the stream end it with an `Err` item.
    pub async fn chat_stream(
        &self,
        user_input: &str,
        conversation_name: &str,
        additional_messages: Option<Vec<CozeMessage>>,
    ) -> AppResult<impl Stream<Item = AppResult<WorkflowEvent>>> {
        self.ensure_configured()?;

        let request_body =
            self.workflow_request(user_input, conversation_name, None, additional_messages);
        let response = self.send_workflow_chat(&request_body).await?;

        Ok(parse_sse_events(response.bytes_stream()))
    }

    fn ensure_configured(&self) -> AppResult<()> {
        if self.settings.access_token.is_empty() {
            return Err(AppError::Coze("Coze access token is not configured".to_string()));
        }
        if self.settings.workflow_id.is_empty() || self.settings.app_id.is_empty() {
            return Err(AppError::Coze(
                "Coze workflow_id or app_id is not configured".to_string(),
            ));
        }
        Ok(())
    }

    fn workflow_request(
        &self,
        user_input: &str,
        conversation_name: &str,
        conversation_id: Option<String>,
        additional_messages: Option<Vec<CozeMessage>>,
    ) -> WorkflowChatRequest {
        WorkflowChatRequest {
            workflow_id: self.settings.workflow_id.clone(),
            app_id: self.settings.app_id.clone(),
            conversation_id,
            parameters: HashMap::from([
                ("CONVERSATION_NAME".to_string(), conversation_name.to_string()),
                ("USER_INPUT".to_string(), user_input.to_string()),
            ]),
            additional_messages: additional_messages
                .unwrap_or_else(|| vec![CozeMessage::question(user_input)]),
        }
    }

    async fn send_workflow_chat(&self, request_body: &WorkflowChatRequest) -> AppResult<Response> {
        let url = format!("{}/v1/workflows/chat", self.settings.api_base_url);

        info!("Sending Coze workflow chat request: {}", url);
        debug!(
            "Workflow chat input length: {} characters",
            request_body
                .parameters
                .get("USER_INPUT")
                .map_or(0, String::len)
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", self.auth_header())
            .json(request_body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(match serde_json::from_str::<CozeErrorBody>(&body) {
            Ok(api_error) => {
                error!("Coze API error: {} - {}", api_error.code, api_error.msg);
                AppError::Coze(format!("API error {}: {}", api_error.code, api_error.msg))
            }
            Err(_) => {
                error!("Coze API request failed: HTTP {}", status);
                AppError::Coze(format!("HTTP {}: {}", status, body))
            }
        })
    }
}

enum SseLine {
    Event(WorkflowEvent),
    Done,
    Skip,
}

/// Interprets one trimmed line of a workflow-chat event stream.
///
/// `event:` lines update `current_event`; `data:` lines become events tagged
/// with it.
fn read_sse_line(line: &str, current_event: &mut Option<String>) -> AppResult<SseLine> {
    if line.is_empty() {
        return Ok(SseLine::Skip);
    }

    if let Some(event) = line.strip_prefix("event:") {
        *current_event = Some(event.trim().to_string());
        return Ok(SseLine::Skip);
    }

    if let Some(data) = line.strip_prefix("data:") {
        let data = data.trim();
        if data == "[DONE]" {
            return Ok(SseLine::Done);
        }

        let payload: Value = match serde_json::from_str(data) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Skipping malformed event data: {} ({})", data, e);
                return Ok(SseLine::Skip);
            }
        };

        let event = current_event.as_deref().unwrap_or("unknown");
        if event == "error" || is_error_payload(&payload) {
            return Err(api_error(&payload));
        }

        return Ok(SseLine::Event(WorkflowEvent {
            event: event.to_string(),
            data: payload,
        }));
    }

    // Plain JSON error bodies can arrive outside the SSE framing.
    if line.starts_with('{') && line.ends_with('}') {
        if let Ok(payload) = serde_json::from_str::<Value>(line) {
            if is_error_payload(&payload) {
                return Err(api_error(&payload));
            }
        }
    }

    Ok(SseLine::Skip)
}

/// Parses a buffered workflow-chat reply in server-sent-event format.
pub fn parse_workflow_stream(body: &str) -> AppResult<CozeAnswer> {
    let mut answer = CozeAnswer::default();
    let mut content_parts: Vec<String> = Vec::new();
    let mut current_event: Option<String> = None;

    for line in body.lines().map(str::trim) {
        let event = match read_sse_line(line, &mut current_event)? {
            SseLine::Event(event) => event,
            SseLine::Skip => continue,
            SseLine::Done => break,
        };

        match event.event.as_str() {
            "conversation.message.completed" => {
                if let Some(content) = event.data.get("content") {
                    content_parts.push(extract_content(content));
                }
            }
            "done" => {
                if let Some(url) = event.data.get("debug_url").and_then(Value::as_str) {
                    answer.debug_url = Some(url.to_string());
                }
                if let Some(id) = event.data.get("conversation_id").and_then(Value::as_str) {
                    answer.conversation_id = Some(id.to_string());
                }
            }
            _ => {}
        }

        answer.events.push(event);
    }

    if content_parts.is_empty() && answer.events.is_empty() {
        return Err(AppError::Coze(
            "No valid AI response received, check the Coze configuration".to_string(),
        ));
    }

    if !content_parts.is_empty() {
        answer.content = Some(content_parts.concat());
    }
    Ok(answer)
}

struct SseState<S> {
    chunks: Pin<Box<S>>,
    buffer: Vec<u8>,
    current_event: Option<String>,
    exhausted: bool,
    finished: bool,
}

/// Turns a stream of body chunks into workflow events.
///
/// Lines may be split across chunks. The stream ends after `[DONE]`, after the
/// first error, or when the chunks run out.
pub fn parse_sse_events<S, B, E>(chunks: S) -> impl Stream<Item = AppResult<WorkflowEvent>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    AppError: From<E>,
{
    let state = SseState {
        chunks: Box::pin(chunks),
        buffer: Vec::new(),
        current_event: None,
        exhausted: false,
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if state.finished {
                return None;
            }

            let line = match state.buffer.iter().position(|byte| *byte == b'\n') {
                Some(end) => {
                    let raw: Vec<u8> = state.buffer.drain(..=end).collect();
                    String::from_utf8_lossy(&raw).into_owned()
                }
                None if state.exhausted => {
                    if state.buffer.is_empty() {
                        return None;
                    }
                    String::from_utf8_lossy(&std::mem::take(&mut state.buffer)).into_owned()
                }
                None => {
                    match state.chunks.next().await {
                        Some(Ok(chunk)) => state.buffer.extend_from_slice(chunk.as_ref()),
                        Some(Err(e)) => {
                            state.finished = true;
                            return Some((Err(AppError::from(e)), state));
                        }
                        None => state.exhausted = true,
                    }
                    continue;
                }
            };

            match read_sse_line(line.trim(), &mut state.current_event) {
                Ok(SseLine::Event(event)) => return Some((Ok(event), state)),
                Ok(SseLine::Skip) => continue,
                Ok(SseLine::Done) => return None,
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}

fn is_error_payload(payload: &Value) -> bool {
    payload.get("code").is_some() && payload.get("msg").is_some()
}

fn api_error(payload: &Value) -> AppError {
    match serde_json::from_value::<CozeErrorBody>(payload.clone()) {
        Ok(body) => {
            error!("Coze API error: {} - {}", body.code, body.msg);
            AppError::Coze(format!("API error {}: {}", body.code, body.msg))
        }
        Err(_) => AppError::Coze(format!("API error: {}", payload)),
    }
}

// Workflow output nodes wrap their text as `{"output": "..."}` inside a string.
fn extract_content(content: &Value) -> String {
    match content {
        Value::String(text) if text.starts_with('{') => {
            match serde_json::from_str::<Value>(text) {
                Ok(inner) => match inner.get("output") {
                    Some(Value::String(output)) => output.clone(),
                    Some(other) => other.to_string(),
                    None => text.clone(),
                },
                Err(_) => text.clone(),
            }
        }
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
