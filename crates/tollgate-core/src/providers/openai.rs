//! OpenAI-compatible Chat Completions client.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;

use anyhow::Result;
use eventsource_stream::{EventStream, Eventsource};
use futures_util::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::Serialize;
use serde_json::Value;

use crate::providers::shared::USER_AGENT;
use crate::providers::{
    ChatContentBlock, ChatMessage, ContentBlockType, MessageContent, ProviderError,
    ProviderErrorKind, ProviderResult, ProviderStream, StreamEvent, Usage,
};
use crate::tools::{ToolDefinition, ToolResult};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

#[derive(Debug, Clone)]
pub struct OpenAIChatCompletionsConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub max_tokens: Option<u32>,
    pub include_usage: bool,
}

pub struct OpenAIChatCompletionsClient {
    config: OpenAIChatCompletionsConfig,
    http: reqwest::Client,
}

impl OpenAIChatCompletionsClient {
    pub fn new(config: OpenAIChatCompletionsConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Starts a streaming completion.
    ///
    /// # Errors
    /// Returns a `ProviderError` (wrapped in anyhow) for transport failures
    /// and non-2xx responses.
    pub async fn send_messages_stream(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system: Option<&str>,
    ) -> Result<ProviderStream> {
        let request = ChatCompletionRequest::new(&self.config, messages, tools, system);

        let url = format!("{}{}", self.config.base_url, CHAT_COMPLETIONS_PATH);
        let headers = build_headers(&self.config.api_key);

        let response = self
            .http
            .post(&url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(ProviderError::http_status(status.as_u16(), &error_body).into());
        }

        let byte_stream = response.bytes_stream();
        Ok(ChatCompletionsSseParser::new(byte_stream).boxed())
    }
}

fn build_headers(api_key: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        "Authorization",
        HeaderValue::from_str(&format!("Bearer {api_key}"))
            .unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    headers.insert("accept", HeaderValue::from_static("text/event-stream"));
    headers.insert("content-type", HeaderValue::from_static("application/json"));
    headers.insert("user-agent", HeaderValue::from_static(USER_AGENT));
    headers
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    stream: bool,
    messages: Vec<ChatCompletionMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ChatToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct ChatCompletionMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ChatToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

impl ChatCompletionMessage {
    fn text(role: &'static str, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(text.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    fn tool(result: &ToolResult) -> Self {
        Self {
            role: "tool",
            content: Some(result.content.clone()),
            tool_calls: None,
            tool_call_id: Some(result.tool_use_id.clone()),
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatToolCall {
    id: String,
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatToolCallFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolCallFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct ChatToolDefinition {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ChatToolFunction,
}

#[derive(Debug, Serialize)]
struct ChatToolFunction {
    name: String,
    description: String,
    parameters: Value,
}

impl From<&ToolDefinition> for ChatToolDefinition {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function",
            function: ChatToolFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.input_schema.clone(),
            },
        }
    }
}

impl ChatCompletionRequest {
    fn new(
        config: &OpenAIChatCompletionsConfig,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        system: Option<&str>,
    ) -> Self {
        let mut out_messages = Vec::new();

        if let Some(prompt) = system.filter(|p| !p.trim().is_empty()) {
            out_messages.push(ChatCompletionMessage::text("system", prompt));
        }

        for msg in messages {
            match (msg.role.as_str(), &msg.content) {
                ("user", MessageContent::Text(text)) => {
                    out_messages.push(ChatCompletionMessage::text("user", text.clone()));
                }
                ("assistant", MessageContent::Text(text)) => {
                    out_messages.push(ChatCompletionMessage::text("assistant", text.clone()));
                }
                ("assistant", MessageContent::Blocks(blocks)) => {
                    let mut text = String::new();
                    let mut tool_calls = Vec::new();

                    for block in blocks {
                        match block {
                            ChatContentBlock::Text { text: value } => text.push_str(value),
                            ChatContentBlock::ToolUse { id, name, input } => {
                                let arguments = serde_json::to_string(input)
                                    .unwrap_or_else(|_| "{}".to_string());
                                tool_calls.push(ChatToolCall {
                                    id: id.clone(),
                                    tool_type: "function",
                                    function: ChatToolCallFunction {
                                        name: name.clone(),
                                        arguments,
                                    },
                                });
                            }
                            ChatContentBlock::ToolResult(_) => {}
                        }
                    }

                    if text.is_empty() && tool_calls.is_empty() {
                        continue;
                    }

                    out_messages.push(ChatCompletionMessage {
                        role: "assistant",
                        content: (!text.is_empty()).then_some(text),
                        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                        tool_call_id: None,
                    });
                }
                ("user", MessageContent::Blocks(blocks)) => {
                    let mut text = String::new();
                    let mut tool_results = Vec::new();
                    for block in blocks {
                        match block {
                            ChatContentBlock::Text { text: value } => text.push_str(value),
                            ChatContentBlock::ToolResult(result) => tool_results.push(result),
                            ChatContentBlock::ToolUse { .. } => {}
                        }
                    }
                    if !text.is_empty() {
                        out_messages.push(ChatCompletionMessage::text("user", text));
                    }
                    // Each result becomes its own `tool` message, in call order.
                    for result in tool_results {
                        out_messages.push(ChatCompletionMessage::tool(result));
                    }
                }
                _ => {}
            }
        }

        let tool_defs =
            (!tools.is_empty()).then(|| tools.iter().map(ChatToolDefinition::from).collect());

        Self {
            model: config.model.clone(),
            stream: true,
            messages: out_messages,
            tools: tool_defs,
            max_tokens: config.max_tokens,
            stream_options: config.include_usage.then_some(StreamOptions {
                include_usage: true,
            }),
        }
    }
}

/// Appends a blank line when the body ends so a final unterminated event
/// still gets dispatched.
struct SseTerminatedStream<S> {
    inner: S,
    emitted_terminator: bool,
}

impl<S> SseTerminatedStream<S> {
    fn new(inner: S) -> Self {
        Self {
            inner,
            emitted_terminator: false,
        }
    }
}

impl<S, E> Stream for SseTerminatedStream<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
{
    type Item = std::result::Result<bytes::Bytes, E>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        if self.emitted_terminator {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(None) => {
                self.emitted_terminator = true;
                Poll::Ready(Some(Ok(bytes::Bytes::from_static(b"\n\n"))))
            }
            other => other,
        }
    }
}

/// Translates chat-completions chunks into [`StreamEvent`]s.
struct ChatCompletionsSseParser<S> {
    inner: EventStream<SseTerminatedStream<S>>,
    pending: VecDeque<StreamEvent>,
    next_index: usize,
    text_index: Option<usize>,
    saw_tool: bool,
    /// Provider tool-call index -> stream block index.
    tool_calls: HashMap<u64, usize>,
    final_usage: Option<Usage>,
    final_finish_reason: Option<String>,
    emitted_done: bool,
}

impl<S> ChatCompletionsSseParser<S> {
    fn new<E>(stream: S) -> Self
    where
        S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    {
        Self {
            inner: SseTerminatedStream::new(stream).eventsource(),
            pending: VecDeque::new(),
            next_index: 0,
            text_index: None,
            saw_tool: false,
            tool_calls: HashMap::new(),
            final_usage: None,
            final_finish_reason: None,
            emitted_done: false,
        }
    }

    /// Emits completion events once a finish reason and usage are known, or
    /// unconditionally when the body ends (`force`).
    fn emit_completion_if_pending(&mut self, force: bool) {
        if self.emitted_done {
            return;
        }

        let reason = match &self.final_finish_reason {
            Some(r) => r.clone(),
            None if force => "stop".to_string(),
            None => return,
        };

        self.emitted_done = true;

        if let Some(index) = self.text_index.take() {
            self.pending
                .push_back(StreamEvent::ContentBlockCompleted { index });
        }

        let mut tool_indices: Vec<usize> = self.tool_calls.values().copied().collect();
        tool_indices.sort_unstable();
        for index in tool_indices {
            self.pending
                .push_back(StreamEvent::ContentBlockCompleted { index });
        }

        let stop_reason = if self.saw_tool || reason == "tool_calls" {
            "tool_use".to_string()
        } else {
            map_finish_reason(&reason)
        };

        self.pending.push_back(StreamEvent::MessageDelta {
            stop_reason: Some(stop_reason),
            usage: self.final_usage.clone(),
        });
        self.pending.push_back(StreamEvent::MessageCompleted);
    }

    fn handle_event_data(&mut self, data: &str) -> ProviderResult<()> {
        let trimmed = data.trim();
        if trimmed.is_empty() || trimmed == "[DONE]" {
            return Ok(());
        }

        let value = serde_json::from_str::<Value>(trimmed).map_err(|err| {
            ProviderError::new(
                ProviderErrorKind::Parse,
                format!("Failed to parse SSE JSON: {err}"),
            )
        })?;
        self.handle_chunk(&value);
        Ok(())
    }

    fn handle_chunk(&mut self, value: &Value) {
        // Errors are terminal: no completion follows them.
        if let Some(error) = value.get("error") {
            let error_type = error
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or("error")
                .to_string();
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("Unknown error")
                .to_string();
            self.pending.push_back(StreamEvent::Error {
                error_type,
                message,
            });
            self.emitted_done = true;
            return;
        }

        let first_choice = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first());

        if let Some(choice) = first_choice {
            if let Some(finish_reason) = choice.get("finish_reason").and_then(Value::as_str) {
                self.final_finish_reason = Some(finish_reason.to_string());
            }
            if let Some(delta) = choice.get("delta") {
                self.process_delta(delta);
            }
        }

        // Usage often arrives in its own chunk after finish_reason.
        if let Some(usage) = value.get("usage").filter(|u| !u.is_null()) {
            self.final_usage = Some(parse_usage(usage));
        }

        if self.final_finish_reason.is_some() && self.final_usage.is_some() {
            self.emit_completion_if_pending(false);
        }
    }

    fn process_delta(&mut self, delta: &Value) {
        if let Some(text) = delta.get("content").and_then(Value::as_str) {
            let index = match self.text_index {
                Some(index) => index,
                None => {
                    let index = self.next_index;
                    self.next_index += 1;
                    self.text_index = Some(index);
                    self.pending.push_back(StreamEvent::ContentBlockStart {
                        index,
                        block_type: ContentBlockType::Text,
                        id: None,
                        name: None,
                    });
                    index
                }
            };
            if !text.is_empty() {
                self.pending.push_back(StreamEvent::TextDelta {
                    index,
                    text: text.to_string(),
                });
            }
        }

        let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) else {
            return;
        };
        for tool_call in tool_calls {
            let idx = tool_call.get("index").and_then(Value::as_u64).unwrap_or(0);
            let function = tool_call.get("function").unwrap_or(&Value::Null);
            let args = function
                .get("arguments")
                .and_then(Value::as_str)
                .unwrap_or("");

            let stream_index = match self.tool_calls.get(&idx) {
                Some(&index) => index,
                None => {
                    let index = self.next_index;
                    self.next_index += 1;
                    let id = tool_call
                        .get("id")
                        .and_then(Value::as_str)
                        .filter(|id| !id.is_empty())
                        .map_or_else(|| format!("toolcall-{idx}"), str::to_string);
                    let name = function
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    self.saw_tool = true;
                    self.tool_calls.insert(idx, index);
                    self.pending.push_back(StreamEvent::ContentBlockStart {
                        index,
                        block_type: ContentBlockType::ToolUse,
                        id: Some(id),
                        name: Some(name),
                    });
                    index
                }
            };

            if !args.is_empty() {
                self.pending.push_back(StreamEvent::InputJsonDelta {
                    index: stream_index,
                    partial_json: args.to_string(),
                });
            }
        }
    }
}

impl<S, E> Stream for ChatCompletionsSseParser<S>
where
    S: Stream<Item = std::result::Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = ProviderResult<StreamEvent>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;

        loop {
            if let Some(event) = self.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if let Err(err) = self.handle_event_data(&event.data) {
                        return Poll::Ready(Some(Err(err)));
                    }
                }
                Poll::Ready(Some(Err(e))) => {
                    return Poll::Ready(Some(Err(ProviderError::new(
                        ProviderErrorKind::Parse,
                        format!("SSE stream error: {e}"),
                    ))));
                }
                Poll::Ready(None) => {
                    self.emit_completion_if_pending(true);
                    return Poll::Ready(self.pending.pop_front().map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

fn map_finish_reason(reason: &str) -> String {
    match reason {
        "length" => "max_tokens".to_string(),
        "content_filter" => "error".to_string(),
        other => other.to_string(),
    }
}

fn parse_usage(usage: &Value) -> Usage {
    Usage {
        input_tokens: usage
            .get("prompt_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
        output_tokens: usage
            .get("completion_tokens")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    }
}
