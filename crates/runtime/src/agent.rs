//! Tool-augmented response orchestration.
//!
//! An [`Agent`] answers one turn at a time. A turn calls the model with the
//! agent's tools attached; if the model asks for tools, they run in the order
//! requested, each request/result pair is appended to the conversation, and
//! the model is called again for the final answer.
//!
//! ```text
//! AwaitFirstResponse ──(no tool calls)──────────────────────────────► Done
//!         │
//!         └──(tool calls)──► ExecutingTools ──► AwaitFinalResponse ──► Done
//! ```
//!
//! By default a turn runs at most one round of tool calls; tool calls in the
//! final response are not executed. [`AgentOptions::max_tool_rounds`] raises
//! that bound.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, instrument, trace, warn};

use crate::classify::{FragmentClassifier, ToolDeltaClassifier, Verdict};
use crate::model::{
    Backend, FragmentSink, Message, ModelError, ModelRequest, ModelResponse, ToolCall, Usage,
};
use crate::tools::invoker::{DISPLAY_CAP, truncate_for_display};
use crate::tools::{ToolCatalog, ToolInvoker};
use crate::{Error, Result};

/// Per-agent turn settings.
#[derive(Debug, Clone)]
pub struct AgentOptions {
    /// System prompt sent ahead of the conversation. It is not part of the
    /// returned conversation.
    pub system: Option<String>,
    /// Emit `[tool_usage]` / `[tool_response]` markers into the output.
    pub progress: bool,
    /// Rounds of tool calls allowed per turn.
    pub max_tool_rounds: usize,
    /// Characters of a tool result shown in a `[tool_response]` marker.
    pub display_cap: usize,
}

impl Default for AgentOptions {
    fn default() -> Self {
        Self {
            system: None,
            progress: false,
            max_tool_rounds: 1,
            display_cap: DISPLAY_CAP,
        }
    }
}

/// Result of a blocking turn.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Progress markers (if enabled) followed by the final answer.
    pub text: String,
    /// The caller's conversation plus every message the turn appended.
    pub conversation: Vec<Message>,
    /// Tokens used across every model call of the turn.
    pub usage: Usage,
}

/// Outputs of a streaming turn.
///
/// `text` has capacity 1: a slow reader stalls generation. Both channels
/// close when the turn ends, successfully or not.
#[derive(Debug)]
pub struct TurnStream {
    /// Visible fragments, progress markers, and at most one trailing
    /// `[error] ...` fragment.
    pub text: mpsc::Receiver<String>,
    /// Messages appended to the conversation, as they are appended.
    pub messages: mpsc::UnboundedReceiver<Message>,
}

/// One agent: a model backend plus the tools it may call.
pub struct Agent<B> {
    name: String,
    backend: Arc<B>,
    catalog: Arc<ToolCatalog>,
    invoker: ToolInvoker,
    classifier: Arc<dyn FragmentClassifier>,
    options: AgentOptions,
}

impl<B> Clone for Agent<B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            backend: Arc::clone(&self.backend),
            catalog: Arc::clone(&self.catalog),
            invoker: self.invoker.clone(),
            classifier: Arc::clone(&self.classifier),
            options: self.options.clone(),
        }
    }
}

impl<B: Backend> Agent<B> {
    pub fn new(name: impl Into<String>, backend: Arc<B>, catalog: ToolCatalog) -> Self {
        let catalog = Arc::new(catalog);
        Self {
            name: name.into(),
            backend,
            invoker: ToolInvoker::new(Arc::clone(&catalog)),
            catalog,
            classifier: Arc::new(ToolDeltaClassifier),
            options: AgentOptions::default(),
        }
    }

    pub fn with_options(mut self, options: AgentOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the streaming fragment classifier.
    pub fn with_classifier(mut self, classifier: Arc<dyn FragmentClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn options(&self) -> &AgentOptions {
        &self.options
    }

    /// Run one turn to completion.
    ///
    /// The first error of any kind aborts the turn.
    #[instrument(skip_all, fields(agent = %self.name))]
    pub async fn respond(
        &self,
        conversation: &[Message],
        cancel: &CancellationToken,
    ) -> Result<Reply> {
        let mut turn = Turn::new(self, conversation.to_vec(), cancel, Output::Collect);
        let answer = turn.run().await?;

        let mut text = std::mem::take(&mut turn.transcript);
        text.push_str(&answer);
        Ok(Reply {
            text,
            usage: turn.usage,
            conversation: turn.into_conversation(),
        })
    }
}

impl<B: Backend + 'static> Agent<B> {
    /// Run one turn in a background task, streaming its output.
    ///
    /// Errors other than cancellation are reported as a final `[error]`
    /// fragment. A cancelled turn closes the channels without a final answer.
    pub fn respond_streaming(
        &self,
        conversation: Vec<Message>,
        cancel: CancellationToken,
    ) -> TurnStream {
        let (text_tx, text_rx) = mpsc::channel(1);
        let (message_tx, message_rx) = mpsc::unbounded_channel();
        let agent = self.clone();
        let span = info_span!("respond_streaming", agent = %self.name);

        tokio::spawn(
            async move {
                let output = Output::Stream {
                    sink: StreamSink {
                        tx: text_tx.clone(),
                        classifier: Arc::clone(&agent.classifier),
                    },
                    messages: message_tx,
                };
                let mut turn = Turn::new(&agent, conversation, &cancel, output);
                match turn.run().await {
                    Ok(_) => debug!("streaming turn finished"),
                    Err(Error::Cancelled) => debug!("streaming turn cancelled"),
                    Err(e) => {
                        warn!(error = %e, "streaming turn failed");
                        // An unread text channel must not outlive cancellation.
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => {}
                            _ = text_tx.send(format!("[error] {e}")) => {}
                        }
                    }
                }
            }
            .instrument(span),
        );

        TurnStream {
            text: text_rx,
            messages: message_rx,
        }
    }
}

/// Forwards visible fragments to the caller's text channel.
struct StreamSink {
    tx: mpsc::Sender<String>,
    classifier: Arc<dyn FragmentClassifier>,
}

impl StreamSink {
    async fn send(&self, text: String) -> std::result::Result<(), ModelError> {
        self.tx
            .send(text)
            .await
            .map_err(|_| ModelError::Aborted("output channel closed".into()))
    }
}

impl FragmentSink for StreamSink {
    async fn push(&mut self, fragment: &str) -> std::result::Result<(), ModelError> {
        if self.classifier.classify(fragment) == Verdict::Suppress {
            trace!(fragment, "suppressed tool-call fragment");
            return Ok(());
        }
        self.send(fragment.to_string()).await
    }
}

enum Output {
    Collect,
    Stream {
        sink: StreamSink,
        messages: mpsc::UnboundedSender<Message>,
    },
}

/// State of one turn in progress.
struct Turn<'a, B> {
    agent: &'a Agent<B>,
    cancel: &'a CancellationToken,
    /// System prompt (if any), then the conversation.
    context: Vec<Message>,
    start: usize,
    output: Output,
    /// Progress markers collected in blocking mode.
    transcript: String,
    usage: Usage,
}

impl<'a, B: Backend> Turn<'a, B> {
    fn new(
        agent: &'a Agent<B>,
        conversation: Vec<Message>,
        cancel: &'a CancellationToken,
        output: Output,
    ) -> Self {
        let mut context = Vec::with_capacity(conversation.len() + 4);
        if let Some(system) = &agent.options.system {
            context.push(Message::system(system.clone()));
        }
        let start = context.len();
        context.extend(conversation);
        Self {
            agent,
            cancel,
            context,
            start,
            output,
            transcript: String::new(),
            usage: Usage::default(),
        }
    }

    async fn run(&mut self) -> Result<String> {
        let mut response = self.generate().await?;
        let mut rounds = 0;

        loop {
            let calls = response.message.tool_calls();
            if calls.is_empty() {
                break;
            }
            if rounds == self.agent.options.max_tool_rounds {
                debug!(ignored = calls.len(), "tool round limit reached");
                break;
            }
            rounds += 1;
            info!(round = rounds, calls = calls.len(), "model requested tools");

            for call in calls {
                self.run_tool(call).await?;
            }
            response = self.generate().await?;
        }

        let answer = response.message.text();
        self.append(Message::ai(answer.clone()));
        Ok(answer)
    }

    async fn run_tool(&mut self, call: ToolCall) -> Result<()> {
        self.progress(format!("[tool_usage] {}\n", call.name))
            .await?;

        let invoker = &self.agent.invoker;
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            result = invoker.execute(&call.name, &call.arguments) => result?,
        };

        let shown = truncate_for_display(&result, self.agent.options.display_cap);
        self.progress(format!("[tool_response] {}: {shown}\n", call.name))
            .await?;

        let id = call.id.clone();
        self.append(Message::tool_request(call));
        self.append(Message::tool_result(id, result));
        Ok(())
    }

    async fn generate(&mut self) -> Result<ModelResponse> {
        let Turn {
            agent,
            cancel,
            context,
            output,
            usage,
            ..
        } = self;
        let request = ModelRequest {
            messages: context.as_slice(),
            tools: agent.catalog.definitions(),
        };
        debug!(
            messages = request.messages.len(),
            tools = request.tools.len(),
            "calling model"
        );

        let generation = async {
            match output {
                Output::Collect => agent.backend.call(request).await,
                Output::Stream { sink, .. } => agent.backend.stream(request, sink).await,
            }
        };

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            response = generation => response?,
        };
        usage.input_tokens += response.usage.input_tokens;
        usage.output_tokens += response.usage.output_tokens;
        debug!(
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model responded"
        );
        Ok(response)
    }

    async fn progress(&mut self, marker: String) -> Result<()> {
        if !self.agent.options.progress {
            return Ok(());
        }
        match &self.output {
            Output::Collect => {
                self.transcript.push_str(&marker);
                Ok(())
            }
            Output::Stream { sink, .. } => tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Err(Error::Cancelled),
                sent = sink.send(marker) => sent.map_err(|_| Error::Cancelled),
            },
        }
    }

    fn append(&mut self, message: Message) {
        if let Output::Stream { messages, .. } = &self.output {
            // The caller may not want the messages; that is not an error.
            let _ = messages.send(message.clone());
        }
        self.context.push(message);
    }

    fn into_conversation(mut self) -> Vec<Message> {
        self.context.split_off(self.start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Part, Role};
    use crate::testing::{FakeProvider, ScriptedBackend};
    use crate::tools::{ProviderRef, ProviderRegistry};
    use serde_json::json;
    use std::time::Duration;

    async fn agent_with(
        backend: ScriptedBackend,
        provider: FakeProvider,
        options: AgentOptions,
    ) -> (Agent<ScriptedBackend>, Arc<ScriptedBackend>, Arc<FakeProvider>) {
        let backend = Arc::new(backend);
        let provider = Arc::new(provider);
        let mut registry = ProviderRegistry::new();
        registry.register(provider.clone()).unwrap();
        let catalog = ToolCatalog::build(&[ProviderRef::all("calc")], &registry).await;
        let agent = Agent::new("test", backend.clone(), catalog).with_options(options);
        (agent, backend, provider)
    }

    fn calc() -> FakeProvider {
        FakeProvider::new("calc").tool("add").returns("add", json!(4))
    }

    async fn drain(stream: TurnStream) -> (Vec<String>, Vec<Message>) {
        let TurnStream {
            mut text,
            mut messages,
        } = stream;
        let mut fragments = Vec::new();
        while let Some(fragment) = text.recv().await {
            fragments.push(fragment);
        }
        let mut appended = Vec::new();
        while let Some(message) = messages.recv().await {
            appended.push(message);
        }
        (fragments, appended)
    }

    #[tokio::test]
    async fn answers_directly_without_tool_calls() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new().text(&["Hello", " there"]),
            calc(),
            AgentOptions::default(),
        )
        .await;

        let input = vec![Message::human("Hi")];
        let reply = agent
            .respond(&input, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.text, "Hello there");
        assert_eq!(backend.call_count(), 1);
        assert!(provider.calls().is_empty());
        assert_eq!(reply.conversation.len(), 2);
        assert_eq!(reply.conversation[0], input[0]);
        assert_eq!(reply.conversation[1], Message::ai("Hello there"));
    }

    #[tokio::test]
    async fn calculator_round_trip() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", r#"{"a":2,"b":2}"#)])
                .text(&["The answer is 4."]),
            calc(),
            AgentOptions::default(),
        )
        .await;

        let input = vec![Message::human("What's 2+2 using the calculator tool?")];
        let reply = agent
            .respond(&input, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.text, "The answer is 4.");
        assert_eq!(
            provider.calls(),
            vec![("add".to_string(), Some(json!({"a": 2, "b": 2})))]
        );
        assert_eq!(backend.call_count(), 2);
        assert_eq!(backend.tools(0), vec!["calc__add"]);
        assert_eq!(backend.tools(1), vec!["calc__add"]);

        let roles: Vec<Role> = reply.conversation.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Human, Role::Ai, Role::Tool, Role::Ai]);

        let second = backend.messages(1);
        assert_eq!(second.len(), 3);
        assert_eq!(second[2], Message::tool_result("call_1", "4"));

        // One input token per message sent, summed over both calls.
        assert_eq!(
            reply.usage,
            Usage {
                input_tokens: 4,
                output_tokens: 2
            }
        );
    }

    #[tokio::test]
    async fn executes_calls_in_request_order() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[
                    ("call_1", "calc__add", r#"{"a":1}"#),
                    ("call_2", "calc__add", r#"{"a":2}"#),
                    ("call_3", "calc__add", ""),
                ])
                .text(&["done"]),
            calc(),
            AgentOptions::default(),
        )
        .await;

        let reply = agent
            .respond(&[Message::human("go")], &CancellationToken::new())
            .await
            .unwrap();

        let args: Vec<Option<serde_json::Value>> =
            provider.calls().into_iter().map(|(_, a)| a).collect();
        assert_eq!(args, vec![Some(json!({"a": 1})), Some(json!({"a": 2})), None]);
        assert_eq!(backend.call_count(), 2);

        // 1 input + 2 per call + final answer
        assert_eq!(reply.conversation.len(), 1 + 2 * 3 + 1);
        let ids: Vec<String> = reply.conversation[1..7]
            .iter()
            .flat_map(|m| m.parts.iter())
            .map(|part| match part {
                Part::ToolCall(call) => call.id.clone(),
                Part::ToolResult(result) => result.tool_call_id.clone(),
                Part::Text(_) => String::new(),
            })
            .collect();
        assert_eq!(ids, vec!["call_1", "call_1", "call_2", "call_2", "call_3", "call_3"]);
    }

    #[tokio::test]
    async fn final_response_tool_calls_are_not_executed() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .tool_calls(&[("call_2", "calc__add", "")]),
            calc(),
            AgentOptions::default(),
        )
        .await;

        let reply = agent
            .respond(&[Message::human("go")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(provider.calls().len(), 1);
        assert_eq!(backend.call_count(), 2);
        assert_eq!(reply.text, "");
    }

    #[tokio::test]
    async fn more_rounds_when_configured() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .tool_calls(&[("call_2", "calc__add", "")])
                .text(&["finally"]),
            calc(),
            AgentOptions {
                max_tool_rounds: 3,
                ..AgentOptions::default()
            },
        )
        .await;

        let reply = agent
            .respond(&[Message::human("go")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(reply.text, "finally");
        assert_eq!(provider.calls().len(), 2);
        assert_eq!(backend.call_count(), 3);
    }

    #[tokio::test]
    async fn progress_markers_truncate_but_conversation_does_not() {
        let long = "x".repeat(2000);
        let (agent, _, _) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["ok"]),
            FakeProvider::new("calc")
                .tool("add")
                .returns("add", json!(long.clone())),
            AgentOptions {
                progress: true,
                ..AgentOptions::default()
            },
        )
        .await;

        let reply = agent
            .respond(&[Message::human("go")], &CancellationToken::new())
            .await
            .unwrap();

        let serialized = serde_json::to_string(&json!(long)).unwrap();
        let shown = format!("{}...", &serialized[..DISPLAY_CAP]);
        assert_eq!(
            reply.text,
            format!("[tool_usage] calc__add\n[tool_response] calc__add: {shown}\nok")
        );
        assert_eq!(reply.conversation[2], Message::tool_result("call_1", serialized));
    }

    #[tokio::test]
    async fn system_prompt_is_sent_but_not_returned() {
        let (agent, backend, _) = agent_with(
            ScriptedBackend::new().text(&["hi"]),
            calc(),
            AgentOptions {
                system: Some("Be brief.".into()),
                ..AgentOptions::default()
            },
        )
        .await;

        let reply = agent
            .respond(&[Message::human("hello")], &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(backend.messages(0)[0], Message::system("Be brief."));
        assert_eq!(reply.conversation[0], Message::human("hello"));
        assert_eq!(reply.conversation.len(), 2);
    }

    #[tokio::test]
    async fn tool_failure_aborts_turn() {
        let (agent, backend, _) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["unreachable"]),
            FakeProvider::new("calc").tool("add").failing_calls(),
            AgentOptions::default(),
        )
        .await;

        let err = agent
            .respond(&[Message::human("go")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ToolExecutionFailed { .. }));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn invalid_arguments_abort_turn() {
        let (agent, _, provider) = agent_with(
            ScriptedBackend::new().tool_calls(&[("call_1", "calc__add", "{oops")]),
            calc(),
            AgentOptions::default(),
        )
        .await;

        let err = agent
            .respond(&[Message::human("go")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::InvalidArguments { .. }));
        assert!(provider.calls().is_empty());
    }

    #[tokio::test]
    async fn generation_failure_aborts_turn() {
        let (agent, _, _) = agent_with(
            ScriptedBackend::new().fail("overloaded"),
            calc(),
            AgentOptions::default(),
        )
        .await;

        let err = agent
            .respond(&[Message::human("go")], &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Generation(ModelError::Api(_))));
    }

    #[tokio::test]
    async fn cancellation_during_tool_stops_turn() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["unreachable"]),
            FakeProvider::new("calc").tool("add").hanging(),
            AgentOptions::default(),
        )
        .await;

        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            let provider = provider.clone();
            tokio::spawn(async move {
                provider.started.notified().await;
                cancel.cancel();
            })
        };

        let err = agent
            .respond(&[Message::human("go")], &cancel)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(matches!(err, Error::Cancelled));
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn streaming_hides_tool_deltas() {
        let (agent, backend, _) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", r#"{"a":2,"b":2}"#)])
                .text(&["The answer", " is 4."]),
            calc(),
            AgentOptions {
                progress: true,
                ..AgentOptions::default()
            },
        )
        .await;

        let stream =
            agent.respond_streaming(vec![Message::human("2+2?")], CancellationToken::new());
        let (fragments, appended) = drain(stream).await;

        assert_eq!(
            fragments,
            vec![
                "[tool_usage] calc__add\n".to_string(),
                "[tool_response] calc__add: 4\n".to_string(),
                "The answer".to_string(),
                " is 4.".to_string(),
            ]
        );
        assert_eq!(backend.call_count(), 2);

        let roles: Vec<Role> = appended.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::Ai, Role::Tool, Role::Ai]);
        assert_eq!(appended[2], Message::ai("The answer is 4."));
    }

    #[tokio::test]
    async fn streaming_reports_error_then_closes() {
        let (agent, _, _) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["unreachable"]),
            FakeProvider::new("calc").tool("add").failing_calls(),
            AgentOptions::default(),
        )
        .await;

        let stream = agent.respond_streaming(vec![Message::human("go")], CancellationToken::new());
        let (fragments, appended) = drain(stream).await;

        assert_eq!(fragments.len(), 1);
        assert!(fragments[0].starts_with("[error] tool calc__add failed"));
        assert!(appended.is_empty());
    }

    #[tokio::test]
    async fn streaming_cancellation_closes_without_answer() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["unreachable"]),
            FakeProvider::new("calc").tool("add").hanging(),
            AgentOptions::default(),
        )
        .await;

        let cancel = CancellationToken::new();
        let stream = agent.respond_streaming(vec![Message::human("go")], cancel.clone());
        provider.started.notified().await;
        cancel.cancel();

        let (fragments, appended) = drain(stream).await;
        assert!(fragments.is_empty());
        assert!(appended.is_empty());
        assert_eq!(backend.call_count(), 1);
    }

    #[tokio::test]
    async fn streaming_with_dropped_reader_stops() {
        let (agent, backend, _) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["a", "b", "c"]),
            calc(),
            AgentOptions::default(),
        )
        .await;

        let TurnStream { text, mut messages } =
            agent.respond_streaming(vec![Message::human("go")], CancellationToken::new());
        drop(text);

        // The final answer is never appended: the turn aborts on its first push.
        let mut appended = Vec::new();
        while let Some(message) = messages.recv().await {
            appended.push(message);
        }
        assert_eq!(appended.len(), 2);
        assert_eq!(backend.call_count(), 2);
    }

    #[tokio::test]
    async fn streaming_cancel_unblocks_unread_progress_marker() {
        let (agent, backend, provider) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["unreachable"]),
            calc(),
            AgentOptions {
                progress: true,
                ..AgentOptions::default()
            },
        )
        .await;

        let cancel = CancellationToken::new();
        // `text` stays alive but unread: the second marker cannot be sent.
        let TurnStream { text, mut messages } =
            agent.respond_streaming(vec![Message::human("go")], cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while messages.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "turn kept running after cancellation");
        assert_eq!(backend.call_count(), 1);
        assert_eq!(provider.calls().len(), 1);
        drop(text);
    }

    #[tokio::test]
    async fn streaming_cancel_unblocks_unread_error_fragment() {
        let (agent, _, _) = agent_with(
            ScriptedBackend::new().tool_calls(&[("call_1", "calc__add", "")]),
            FakeProvider::new("calc").tool("add").failing_calls(),
            AgentOptions {
                progress: true,
                ..AgentOptions::default()
            },
        )
        .await;

        let cancel = CancellationToken::new();
        // The `[tool_usage]` marker fills the channel; `[error]` has to wait.
        let TurnStream { text, mut messages } =
            agent.respond_streaming(vec![Message::human("go")], cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            while messages.recv().await.is_some() {}
        })
        .await;
        assert!(closed.is_ok(), "turn kept running after cancellation");
        drop(text);
    }

    /// Hides fragments that start with `#`.
    struct HashComments;

    impl FragmentClassifier for HashComments {
        fn classify(&self, fragment: &str) -> Verdict {
            if fragment.starts_with('#') {
                Verdict::Suppress
            } else {
                Verdict::Emit
            }
        }
    }

    #[tokio::test]
    async fn streaming_uses_configured_classifier() {
        let (agent, _, _) = agent_with(
            ScriptedBackend::new()
                .tool_calls(&[("call_1", "calc__add", "")])
                .text(&["# scratch", "4"]),
            calc(),
            AgentOptions::default(),
        )
        .await;
        let agent = agent.with_classifier(Arc::new(HashComments));

        let stream = agent.respond_streaming(vec![Message::human("go")], CancellationToken::new());
        let (fragments, appended) = drain(stream).await;

        // The default classifier is gone, so the raw tool-call delta shows.
        assert_eq!(fragments.len(), 2);
        assert!(fragments[0].starts_with('['));
        assert_eq!(fragments[1], "4");
        assert_eq!(appended.last(), Some(&Message::ai("# scratch4")));
    }
}
