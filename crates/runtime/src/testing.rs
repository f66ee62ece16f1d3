//! Test doubles for backends and tool providers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::sync::Notify;

use crate::model::{
    Backend, FragmentSink, Message, ModelError, ModelRequest, ModelResponse, Part, Role, ToolCall,
    ToolSpec, Usage,
};
use crate::tools::{ToolError, ToolProvider};

/// In-memory tool provider that records every call.
pub struct FakeProvider {
    name: String,
    tools: Vec<ToolSpec>,
    results: HashMap<String, Value>,
    fail_list: bool,
    fail_calls: bool,
    hang: bool,
    calls: Mutex<Vec<(String, Option<Value>)>>,
    shut_down: AtomicBool,
    pub started: Notify,
}

impl FakeProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tools: Vec::new(),
            results: HashMap::new(),
            fail_list: false,
            fail_calls: false,
            hang: false,
            calls: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            started: Notify::new(),
        }
    }

    pub fn tool(mut self, name: &str) -> Self {
        self.tools.push(ToolSpec {
            name: name.to_string(),
            description: format!("{name} tool"),
            schema: json!({"type": "object", "properties": {}}),
        });
        self
    }

    pub fn returns(mut self, tool: &str, result: Value) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    pub fn failing_list(mut self) -> Self {
        self.fail_list = true;
        self
    }

    pub fn failing_calls(mut self) -> Self {
        self.fail_calls = true;
        self
    }

    /// Calls never complete; `started` is notified when one begins.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn calls(&self) -> Vec<(String, Option<Value>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolProvider for FakeProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_tools(&self) -> Result<Vec<ToolSpec>, ToolError> {
        if self.fail_list {
            return Err(ToolError::Transport("connection refused".into()));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<Value, ToolError> {
        self.calls
            .lock()
            .unwrap()
            .push((name.to_string(), arguments));
        self.started.notify_one();
        if self.hang {
            std::future::pending::<()>().await;
        }
        if self.fail_calls {
            return Err(ToolError::Transport("broken pipe".into()));
        }
        Ok(self.results.get(name).cloned().unwrap_or_else(
            || json!({"content": [{"type": "text", "text": "ok"}], "isError": false}),
        ))
    }

    async fn shutdown(&self) {
        self.shut_down.store(true, Ordering::SeqCst);
    }
}

enum Step {
    Reply {
        fragments: Vec<String>,
        message: Message,
    },
    Fail(String),
}

/// Backend that replays a fixed script of responses and records requests.
///
/// Each response reports one input token per message sent and one output
/// token.
#[derive(Default)]
pub struct ScriptedBackend {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<(Vec<Message>, Vec<String>)>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply with plain text, streamed as the given fragments.
    pub fn text(self, fragments: &[&str]) -> Self {
        let message = Message::ai(fragments.concat());
        self.push(Step::Reply {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            message,
        })
    }

    /// Reply with tool calls `(id, name, arguments)`, streamed as one raw
    /// tool-call delta array.
    pub fn tool_calls(self, calls: &[(&str, &str, &str)]) -> Self {
        let calls: Vec<ToolCall> = calls
            .iter()
            .map(|(id, name, arguments)| ToolCall {
                id: id.to_string(),
                name: name.to_string(),
                arguments: arguments.to_string(),
            })
            .collect();
        let delta = json!(
            calls
                .iter()
                .map(|c| json!({"id": c.id, "type": "function", "function": {"name": c.name, "arguments": c.arguments}}))
                .collect::<Vec<_>>()
        )
        .to_string();
        self.push(Step::Reply {
            fragments: vec![delta],
            message: Message {
                role: Role::Ai,
                parts: calls.into_iter().map(Part::ToolCall).collect(),
            },
        })
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Step::Fail(message.to_string()))
    }

    fn push(self, step: Step) -> Self {
        self.steps.lock().unwrap().push_back(step);
        self
    }

    /// Number of model calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Conversation sent with the `index`th call.
    pub fn messages(&self, index: usize) -> Vec<Message> {
        self.requests.lock().unwrap()[index].0.clone()
    }

    /// Tool names advertised with the `index`th call.
    pub fn tools(&self, index: usize) -> Vec<String> {
        self.requests.lock().unwrap()[index].1.clone()
    }

    fn next(&self, request: ModelRequest<'_>) -> Result<(Vec<String>, ModelResponse), ModelError> {
        let usage = Usage {
            input_tokens: request.messages.len() as u32,
            output_tokens: 1,
        };
        self.requests.lock().unwrap().push((
            request.messages.to_vec(),
            request.tools.iter().map(|t| t.name.clone()).collect(),
        ));
        match self.steps.lock().unwrap().pop_front() {
            Some(Step::Reply { fragments, message }) => {
                Ok((fragments, ModelResponse { message, usage }))
            }
            Some(Step::Fail(message)) => Err(ModelError::Api(message)),
            None => Err(ModelError::Api("script exhausted".into())),
        }
    }
}

impl Backend for ScriptedBackend {
    async fn call(&self, request: ModelRequest<'_>) -> Result<ModelResponse, ModelError> {
        let (_, response) = self.next(request)?;
        Ok(response)
    }

    async fn stream<S: FragmentSink>(
        &self,
        request: ModelRequest<'_>,
        sink: &mut S,
    ) -> Result<ModelResponse, ModelError> {
        let (fragments, response) = self.next(request)?;
        for fragment in &fragments {
            sink.push(fragment).await?;
        }
        Ok(response)
    }
}
