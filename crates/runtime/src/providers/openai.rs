//! OpenAI-compatible chat completions backend (OpenAI and Azure OpenAI).

use std::collections::BTreeMap;

use futures::StreamExt;
use reqwest::RequestBuilder;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::model::{
    Backend, FragmentSink, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall,
    ToolSpec, Usage,
};

const OPENAI_API_URL: &str = "https://api.openai.com/v1";
const DEFAULT_AZURE_API_VERSION: &str = "2024-10-21";

/// Which flavor of the chat completions API to talk to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flavor {
    /// `{base}/chat/completions` with Bearer auth.
    OpenAi,
    /// `{base}/openai/deployments/{model}/chat/completions` with an `api-key`
    /// header.
    Azure { api_version: String },
}

impl std::fmt::Display for Flavor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenAi => write!(f, "openai"),
            Self::Azure { .. } => write!(f, "azure"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API Wire Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ApiRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<String>,
    messages: Vec<ApiMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<ApiTool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<ApiStreamOptions>,
}

#[derive(Debug, Serialize)]
struct ApiStreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize, PartialEq)]
struct ApiMessage {
    role: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<ApiToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ApiToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    call_type: String,
    function: ApiFunctionCall,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct ApiFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Serialize)]
struct ApiTool {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: ApiFunction,
}

#[derive(Debug, Serialize)]
struct ApiFunction {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ApiResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCall>>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl From<ApiUsage> for Usage {
    fn from(usage: ApiUsage) -> Self {
        Self {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiChunk {
    #[serde(default)]
    choices: Vec<ApiChunkChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChunkChoice {
    #[serde(default)]
    index: u32,
    #[serde(default)]
    delta: ApiDelta,
}

#[derive(Debug, Default, Deserialize)]
struct ApiDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ApiToolCallDelta>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiToolCallDelta {
    index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function: Option<ApiFunctionDelta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiFunctionDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Streaming
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug)]
enum SseEvent {
    Chunk(ApiChunk),
    Done,
    Ignore,
}

fn parse_sse_line(line: &str) -> Result<SseEvent, ModelError> {
    let Some(data) = line.trim_end_matches('\r').strip_prefix("data:") else {
        return Ok(SseEvent::Ignore);
    };
    let data = data.trim();
    if data.is_empty() {
        return Ok(SseEvent::Ignore);
    }
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    serde_json::from_str(data)
        .map(SseEvent::Chunk)
        .map_err(|e| ModelError::InvalidResponse(format!("stream chunk: {e}")))
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Rebuilds the final message from stream deltas.
#[derive(Debug, Default)]
struct StreamAssembler {
    text: String,
    calls: BTreeMap<u32, PartialCall>,
    usage: Usage,
}

impl StreamAssembler {
    /// Fold one chunk in, returning the fragments to report.
    fn apply(&mut self, chunk: ApiChunk) -> Result<Vec<String>, ModelError> {
        if let Some(usage) = chunk.usage {
            self.usage = usage.into();
        }

        let mut fragments = Vec::new();
        for choice in chunk.choices.into_iter().filter(|c| c.index == 0) {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.text.push_str(&content);
                fragments.push(content);
            }

            let deltas = choice.delta.tool_calls.unwrap_or_default();
            if deltas.is_empty() {
                continue;
            }
            fragments.push(
                serde_json::to_string(&deltas)
                    .map_err(|e| ModelError::InvalidResponse(e.to_string()))?,
            );
            for delta in deltas {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
        }
        Ok(fragments)
    }

    fn finish(self) -> ModelResponse {
        let mut parts = Vec::new();
        if !self.text.is_empty() {
            parts.push(Part::Text(self.text));
        }
        parts.extend(self.calls.into_values().map(|call| {
            Part::ToolCall(ToolCall {
                id: call.id,
                name: call.name,
                arguments: call.arguments,
            })
        }));
        ModelResponse {
            message: Message {
                role: Role::Ai,
                parts,
            },
            usage: self.usage,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend Implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating an OpenAI-compatible backend.
#[derive(Debug, Clone)]
pub struct OpenAiBackendBuilder {
    flavor: Flavor,
    api_key: String,
    model: String,
    base_url: Option<String>,
}

impl OpenAiBackendBuilder {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            flavor: Flavor::OpenAi,
            api_key: api_key.into(),
            model: model.into(),
            base_url: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Talk to Azure OpenAI. `model` is the deployment name.
    pub fn azure(mut self, api_version: Option<String>) -> Self {
        self.flavor = Flavor::Azure {
            api_version: api_version.unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
        };
        self
    }

    pub fn build(self) -> OpenAiBackend {
        let base = self.base_url.unwrap_or_else(|| OPENAI_API_URL.to_string());
        let base = base.trim_end_matches('/');
        let endpoint = match &self.flavor {
            Flavor::OpenAi => format!("{base}/chat/completions"),
            Flavor::Azure { api_version } => format!(
                "{base}/openai/deployments/{}/chat/completions?api-version={api_version}",
                self.model
            ),
        };
        OpenAiBackend {
            client: reqwest::Client::new(),
            flavor: self.flavor,
            api_key: self.api_key,
            model: self.model,
            endpoint,
        }
    }
}

/// OpenAI-compatible chat completions backend.
pub struct OpenAiBackend {
    client: reqwest::Client,
    flavor: Flavor,
    api_key: String,
    model: String,
    endpoint: String,
}

impl OpenAiBackend {
    pub fn builder(api_key: impl Into<String>, model: impl Into<String>) -> OpenAiBackendBuilder {
        OpenAiBackendBuilder::new(api_key, model)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn role_to_api(role: Role) -> &'static str {
        match role {
            Role::System => "system",
            Role::Human => "user",
            Role::Ai => "assistant",
            Role::Tool => "tool",
        }
    }

    /// One message may expand into several: each tool result is its own
    /// `tool` message.
    fn message_to_api(msg: &Message) -> Vec<ApiMessage> {
        let role = Self::role_to_api(msg.role);

        if msg.role == Role::Tool {
            return msg
                .parts
                .iter()
                .filter_map(|part| match part {
                    Part::ToolResult(result) => Some(ApiMessage {
                        role,
                        content: Some(result.content.clone()),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(result.tool_call_id.clone()),
                    }),
                    _ => None,
                })
                .collect();
        }

        let text = msg.text();
        let tool_calls: Vec<ApiToolCall> = msg
            .tool_calls()
            .into_iter()
            .map(|call| ApiToolCall {
                id: call.id,
                call_type: function_type(),
                function: ApiFunctionCall {
                    name: call.name,
                    arguments: call.arguments,
                },
            })
            .collect();

        let content = if text.is_empty() && !tool_calls.is_empty() {
            None
        } else {
            Some(text)
        };

        vec![ApiMessage {
            role,
            content,
            tool_calls,
            tool_call_id: None,
        }]
    }

    fn tool_to_api(spec: &ToolSpec) -> ApiTool {
        ApiTool {
            tool_type: "function",
            function: ApiFunction {
                name: spec.name.clone(),
                description: spec.description.clone(),
                parameters: spec.schema.clone(),
            },
        }
    }

    fn response_to_message(message: ApiResponseMessage) -> Message {
        let mut parts = Vec::new();
        if let Some(text) = message.content.filter(|t| !t.is_empty()) {
            parts.push(Part::Text(text));
        }
        parts.extend(message.tool_calls.into_iter().flatten().map(|call| {
            Part::ToolCall(ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
        }));
        Message {
            role: Role::Ai,
            parts,
        }
    }

    fn build_request(&self, request: ModelRequest<'_>, stream: bool) -> ApiRequest {
        ApiRequest {
            // Azure takes the model from the deployment path.
            model: match self.flavor {
                Flavor::OpenAi => Some(self.model.clone()),
                Flavor::Azure { .. } => None,
            },
            messages: request
                .messages
                .iter()
                .flat_map(Self::message_to_api)
                .collect(),
            tools: request.tools.iter().map(Self::tool_to_api).collect(),
            stream,
            stream_options: stream.then_some(ApiStreamOptions {
                include_usage: true,
            }),
        }
    }

    fn apply_headers(&self, req: RequestBuilder) -> RequestBuilder {
        match self.flavor {
            Flavor::OpenAi => req.bearer_auth(&self.api_key),
            Flavor::Azure { .. } => req.header("api-key", &self.api_key),
        }
    }

    async fn send(&self, body: &ApiRequest) -> Result<reqwest::Response, ModelError> {
        debug!(
            endpoint = %self.endpoint,
            messages = body.messages.len(),
            tools = body.tools.len(),
            stream = body.stream,
            "sending chat completion request"
        );

        let req = self
            .client
            .post(&self.endpoint)
            .header("content-type", "application/json");
        let response = self
            .apply_headers(req)
            .json(body)
            .send()
            .await
            .map_err(|e| ModelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Api(format!("{status}: {body}")));
        }
        Ok(response)
    }
}

impl std::fmt::Display for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.flavor, self.model)
    }
}

impl Backend for OpenAiBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let body = self.build_request(request, false);
        let response = self.send(&body).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;

        let usage = api_response.usage.map(Usage::from).unwrap_or_default();
        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ModelError::InvalidResponse("no choices in response".into()))?;

        Ok(ModelResponse {
            message: Self::response_to_message(choice.message),
            usage,
        })
    }

    async fn stream<S: FragmentSink>(
        &self,
        request: ModelRequest<'_>,
        sink: &mut S,
    ) -> Result<ModelResponse, ModelError> {
        let body = self.build_request(request, true);
        let response = self.send(&body).await?;

        let mut bytes = std::pin::pin!(response.bytes_stream());
        let mut buffer: Vec<u8> = Vec::new();
        let mut assembler = StreamAssembler::default();

        'read: while let Some(chunk) = bytes.next().await {
            let chunk = chunk.map_err(|e| ModelError::Network(e.to_string()))?;
            buffer.extend_from_slice(&chunk);

            while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=newline).collect();
                let line = String::from_utf8_lossy(&line);
                match parse_sse_line(line.trim_end_matches('\n'))? {
                    SseEvent::Chunk(chunk) => {
                        for fragment in assembler.apply(chunk)? {
                            trace!(len = fragment.len(), "stream fragment");
                            sink.push(&fragment).await?;
                        }
                    }
                    SseEvent::Done => break 'read,
                    SseEvent::Ignore => {}
                }
            }
        }

        Ok(assembler.finish())
    }
}
