//! OpenAI-compatible chat completion client
//!
//! Works against api.openai.com and any server speaking the same wire
//! format. HTTP failures are classified into the error taxonomy here so
//! the loop's retry policy never sees a status code.

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::orchestrator::domain::{Message, Role, ToolCall};
use crate::orchestrator::error::{LlmError, LlmResult};

use super::{
    ChatRequest, ChatResponse, LlmClient, LlmStream, LlmStreamSender, StreamChunk, TokenUsage,
    ToolCallDelta,
};

/// OpenAI-compatible LLM client
pub struct OpenAiClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiClient {
    /// Create a client for the given model
    pub fn new(
        api_key: impl Into<String>,
        base_url: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            base_url: base_url.unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: model.into(),
        }
    }

    /// Create a client reading the API key from `OPENAI_API_KEY`
    pub fn from_env(model: impl Into<String>, base_url: Option<String>) -> LlmResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| LlmError::Auth("OPENAI_API_KEY environment variable not set".into()))?;
        Ok(Self::new(api_key, base_url, model))
    }

    fn build_body(&self, request: &ChatRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": convert_messages(&request.messages),
        });

        if let Some(temp) = request.temperature {
            body["temperature"] = json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }
        if !request.tools.is_empty() {
            body["tools"] = json!(request
                .tools
                .iter()
                .map(|t| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": t.name,
                            "description": t.description,
                            "parameters": normalize_parameters(&t.parameters),
                        }
                    })
                })
                .collect::<Vec<_>>());
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }

        body
    }
}

/// Map an HTTP failure onto the error taxonomy
fn classify_status(status: u16, body: &str) -> LlmError {
    match status {
        429 => LlmError::RateLimit,
        401 | 403 => LlmError::Auth(body.to_string()),
        408 => LlmError::Timeout,
        400 | 413 if looks_like_overflow(body) => LlmError::ContextOverflow,
        s if s >= 500 => LlmError::Transient(format!("HTTP {}: {}", s, body)),
        s => LlmError::Fatal(format!("HTTP {}: {}", s, body)),
    }
}

fn looks_like_overflow(body: &str) -> bool {
    let lower = body.to_ascii_lowercase();
    lower.contains("context_length_exceeded")
        || lower.contains("maximum context length")
        || lower.contains("context window")
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut msg = json!({
                "role": match m.role {
                    Role::System => "system",
                    Role::User => "user",
                    Role::Assistant => "assistant",
                    Role::Tool => "tool",
                },
                "content": m.content,
            });

            if let Some(tool_calls) = &m.tool_calls {
                msg["tool_calls"] = json!(tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.name,
                                "arguments": serde_json::to_string(&tc.arguments)
                                    .unwrap_or_default(),
                            }
                        })
                    })
                    .collect::<Vec<_>>());
            }
            if let Some(tool_call_id) = &m.tool_call_id {
                msg["tool_call_id"] = json!(tool_call_id);
            }

            msg
        })
        .collect()
}

fn normalize_parameters(parameters: &Value) -> Value {
    // The API requires at minimum {"type": "object"} for function parameters
    if parameters.is_null() || parameters.as_object().is_none_or(|o| o.is_empty()) {
        return json!({ "type": "object", "properties": {}, "required": [] });
    }
    if parameters.get("type").is_none() {
        let mut p = parameters.clone();
        if let Some(obj) = p.as_object_mut() {
            obj.insert("type".to_string(), json!("object"));
        }
        return p;
    }
    parameters.clone()
}

#[async_trait]
impl LlmClient for OpenAiClient {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, request: ChatRequest) -> LlmResult<ChatResponse> {
        let body = self.build_body(&request, false);

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status.as_u16(), &error_text));
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Fatal(format!("Failed to parse response: {}", e)))?;

        parse_response(wire)
    }

    fn stream(&self, request: ChatRequest) -> LlmStream {
        let (sender, stream) = LlmStream::channel(64);

        let client = self.client.clone();
        let api_key = self.api_key.clone();
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(&request, true);

        tokio::spawn(async move {
            if let Err(e) = stream_completion(client, api_key, url, body, sender.clone()).await {
                sender.send_error(e).await;
            }
        });

        stream
    }
}

fn parse_response(wire: WireResponse) -> LlmResult<ChatResponse> {
    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::Fatal("No choices in response".into()))?;

    let tool_calls: Vec<ToolCall> = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            arguments: serde_json::from_str(&tc.function.arguments)
                .unwrap_or(Value::Object(Default::default())),
        })
        .collect();

    let content = choice.message.content.unwrap_or_default();
    let message = if tool_calls.is_empty() {
        Message::assistant(content)
    } else {
        Message::assistant_with_tools(content, tool_calls)
    };

    Ok(ChatResponse {
        message,
        usage: wire.usage.map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens)),
    })
}

async fn stream_completion(
    client: reqwest::Client,
    api_key: String,
    url: String,
    body: Value,
    sender: LlmStreamSender,
) -> LlmResult<()> {
    let response = client
        .post(&url)
        .header("Authorization", format!("Bearer {}", api_key))
        .json(&body)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(classify_status(status.as_u16(), &error_text));
    }

    let mut byte_stream = response.bytes_stream();
    let mut buffer = String::new();

    while let Some(chunk_result) = byte_stream.next().await {
        let bytes = chunk_result.map_err(|e| LlmError::Transient(e.to_string()))?;
        buffer.push_str(&String::from_utf8_lossy(&bytes));

        while let Some(pos) = buffer.find('\n') {
            let line = buffer[..pos].trim().to_string();
            buffer = buffer[pos + 1..].to_string();

            let Some(data) = line.strip_prefix("data: ") else {
                continue;
            };
            if data == "[DONE]" {
                return Ok(());
            }

            let Ok(wire) = serde_json::from_str::<WireStreamResponse>(data) else {
                continue;
            };

            let mut chunk = StreamChunk::default();
            if let Some(choice) = wire.choices.first() {
                chunk.content = choice.delta.content.clone().unwrap_or_default();
                for tc in choice.delta.tool_calls.as_deref().unwrap_or_default() {
                    let mut delta = ToolCallDelta::new(tc.index);
                    delta.id = tc.id.clone();
                    if let Some(func) = &tc.function {
                        delta.name = func.name.clone();
                        delta.arguments = func.arguments.clone();
                    }
                    chunk.tool_calls.push(delta);
                }
            }
            if let Some(usage) = &wire.usage {
                chunk.usage = Some(TokenUsage::new(usage.prompt_tokens, usage.completion_tokens));
            }

            if !sender.send(chunk).await {
                return Ok(()); // receiver dropped
            }
        }
    }

    Ok(())
}

// Wire format types

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireStreamResponse {
    choices: Vec<WireStreamChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireStreamChoice {
    delta: WireDelta,
}

#[derive(Debug, Deserialize)]
struct WireDelta {
    content: Option<String>,
    tool_calls: Option<Vec<WireStreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireStreamToolCall {
    index: usize,
    id: Option<String>,
    function: Option<WireStreamFunction>,
}

#[derive(Debug, Deserialize)]
struct WireStreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}
