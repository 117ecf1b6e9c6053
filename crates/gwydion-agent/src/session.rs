//! Session orchestrator: the reason→act loop.
//!
//! A [`Session`] drives one conversation. Each turn issues a provider
//! request with the full history and the permission-filtered tool catalog,
//! pumps the canonical event stream, and — when the model asks for tools —
//! fans the calls out to workers, reconciles their results into history in
//! request order, and re-enters the loop.
//!
//! The session exclusively owns its message list; observers receive
//! streamed deltas and snapshots, never mutable access. Exactly one
//! terminal observer callback fires per prompt: `on_complete` for natural
//! or cancelled finishes, `on_error` for fatal failures.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use gwydion_llm::{
    CompletionRequest, ContentBlock, FinishReason, Message, SharedProvider, StreamEvent,
    StreamOutcome, ToolDefinition, Usage,
};
use gwydion_session::{MessageStore, SessionSnapshot};

use crate::context::{
    ChildSessionFn, QuestionInfo, QuestionResponse, SharedQuestionHandler, ToolContext,
};
use crate::error::{AgentError, Result};
use crate::history::{self, TruncateLimits};
use crate::permission::{AgentConfig, AgentType, Permission, PermissionEngine};
use crate::registry::ToolRegistry;
use crate::tool::{definition_for, ToolOutput};
use crate::tools::skill::SKILL_TOOL_ID;

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrator knobs. Everything here has a sensible default; embedders
/// override per session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Maximum reason→act turns per prompt before the loop errors out.
    pub max_turns: u32,
    /// Estimated input-token count above which old tool outputs are pruned.
    pub prune_protect_tokens: usize,
    /// How many recent tool-result turns pruning leaves intact.
    pub prune_keep_recent_turns: usize,
    /// Line cap applied to tool output before it enters history.
    pub truncate_max_lines: usize,
    /// Byte cap applied to tool output before it enters history.
    pub truncate_max_bytes: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_turns: 25,
            prune_protect_tokens: 40_000,
            prune_keep_recent_turns: 2,
            truncate_max_lines: 2000,
            truncate_max_bytes: 51_200,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Observers
// ─────────────────────────────────────────────────────────────────────────────

type StreamObserver = Box<dyn Fn(&str) + Send + Sync>;
type ToolStartObserver = Box<dyn Fn(&str, &str) + Send + Sync>;
type ToolCompleteObserver = Box<dyn Fn(&str, &str, &ToolOutput) + Send + Sync>;
type CompleteObserver = Box<dyn Fn(FinishReason) + Send + Sync>;
type ErrorObserver = Box<dyn Fn(&AgentError) + Send + Sync>;

#[derive(Default)]
struct Observers {
    stream: Mutex<Vec<StreamObserver>>,
    tool_start: Mutex<Vec<ToolStartObserver>>,
    tool_complete: Mutex<Vec<ToolCompleteObserver>>,
    complete: Mutex<Vec<CompleteObserver>>,
    error: Mutex<Vec<ErrorObserver>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

struct PendingCall {
    id: String,
    name: String,
    arguments: serde_json::Value,
}

/// One conversational session.
pub struct Session {
    id: String,
    agent: AgentConfig,
    config: SessionConfig,
    provider: SharedProvider,
    tools: Arc<ToolRegistry>,
    permissions: Arc<PermissionEngine>,
    store: Option<Arc<dyn MessageStore>>,
    question_handler: Option<SharedQuestionHandler>,
    child_factory: Option<Arc<ChildSessionFn>>,
    working_dir: PathBuf,
    messages: Mutex<Vec<Message>>,
    usage: Mutex<Usage>,
    cancel: CancellationToken,
    observers: Observers,
    terminal_fired: AtomicBool,
    created_at: DateTime<Utc>,
}

impl Session {
    /// Start building a session.
    pub fn builder(provider: SharedProvider, agent: AgentConfig) -> SessionBuilder {
        SessionBuilder::new(provider, agent)
    }

    /// Session id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The agent policy this session runs under.
    pub fn agent_config(&self) -> &AgentConfig {
        &self.agent
    }

    /// Snapshot of the message history.
    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    /// Accumulated usage across all turns.
    pub fn usage(&self) -> Usage {
        *self.usage.lock().unwrap()
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    // ── Observer registration ────────────────────────────────────────────────

    /// Observe streamed assistant text deltas.
    pub fn on_stream(&self, f: impl Fn(&str) + Send + Sync + 'static) {
        self.observers.stream.lock().unwrap().push(Box::new(f));
    }

    /// Observe tool dispatch starts `(call id, tool id)`.
    pub fn on_tool_start(&self, f: impl Fn(&str, &str) + Send + Sync + 'static) {
        self.observers.tool_start.lock().unwrap().push(Box::new(f));
    }

    /// Observe tool completions with the full, untruncated output.
    pub fn on_tool_complete(&self, f: impl Fn(&str, &str, &ToolOutput) + Send + Sync + 'static) {
        self.observers
            .tool_complete
            .lock()
            .unwrap()
            .push(Box::new(f));
    }

    /// Observe the terminal completion of a prompt.
    pub fn on_complete(&self, f: impl Fn(FinishReason) + Send + Sync + 'static) {
        self.observers.complete.lock().unwrap().push(Box::new(f));
    }

    /// Observe fatal errors.
    pub fn on_error(&self, f: impl Fn(&AgentError) + Send + Sync + 'static) {
        self.observers.error.lock().unwrap().push(Box::new(f));
    }

    // ── Control ──────────────────────────────────────────────────────────────

    /// Request cooperative cancellation. The in-flight stream stops at the
    /// next event boundary; launched tools run to completion but the loop
    /// ends with `FinishReason::Cancelled`.
    pub fn cancel(&self) {
        tracing::info!(session = %self.id, "cancellation requested");
        self.cancel.cancel();
    }

    /// Submit a prompt and return immediately; the turn loop runs on a
    /// background task and reports through the observers.
    pub fn prompt(self: &Arc<Self>, text: impl Into<String>) {
        let session = Arc::clone(self);
        let text = text.into();
        tokio::spawn(async move {
            let _ = session.run_prompt(text).await;
        });
    }

    /// Submit a prompt and drive the turn loop to completion inline.
    ///
    /// Observers fire exactly as with [`prompt`](Self::prompt); the outcome
    /// is also returned for callers that prefer awaiting it.
    pub async fn run_prompt(self: &Arc<Self>, text: impl Into<String>) -> Result<FinishReason> {
        self.terminal_fired.store(false, Ordering::SeqCst);

        self.append_message(Message::user(text.into()));
        self.persist().await;

        let result = self.drive().await;

        match &result {
            Ok(reason) => {
                tracing::info!(session = %self.id, reason = ?reason, "prompt finished");
            }
            Err(e) => {
                tracing::error!(session = %self.id, error = %e, "prompt failed");
            }
        }
        self.persist().await;
        self.fire_terminal(&result);
        result
    }

    // ── Turn loop ────────────────────────────────────────────────────────────

    async fn drive(self: &Arc<Self>) -> Result<FinishReason> {
        let mut turn: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(FinishReason::Cancelled);
            }
            // `turn` counts completed tool turns; the guard trips once the
            // limit has been exceeded, so max_turns + 1 turns may execute.
            if turn > self.config.max_turns {
                return Err(AgentError::TurnLimit(self.config.max_turns));
            }

            self.prune_if_needed();

            let request = self.build_request();
            tracing::debug!(
                session = %self.id,
                turn,
                messages = request.messages.len(),
                tools = request.tools.len(),
                model = %request.model,
                "requesting completion"
            );

            let mut stream = self.provider.stream(request).await?;
            let message_id = Uuid::new_v4().to_string();

            let mut text_buffer = String::new();
            let mut pending: Vec<PendingCall> = Vec::new();
            let mut outcome: Option<StreamOutcome> = None;
            let mut cancelled_mid_stream = false;

            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        cancelled_mid_stream = true;
                        break;
                    }
                    event = stream.next() => {
                        let Some(event) = event else { break };
                        match event? {
                            StreamEvent::TextDelta { text } => {
                                text_buffer.push_str(&text);
                                self.fire_stream(&text);
                            }
                            // Deltas are observer candy; the completion
                            // event carries the parsed arguments.
                            StreamEvent::ToolCallDelta { .. } => {}
                            StreamEvent::ToolCallComplete { id, name, arguments } => {
                                pending.push(PendingCall { id, name, arguments });
                            }
                            StreamEvent::FinishStep { reason, usage } => {
                                outcome = Some(StreamOutcome {
                                    finish_reason: reason,
                                    usage,
                                });
                                break;
                            }
                            StreamEvent::StreamError { message, .. } => {
                                return Err(AgentError::Stream(message));
                            }
                        }
                    }
                }
            }
            // Dropping the stream aborts the in-flight HTTP read.
            drop(stream);

            if cancelled_mid_stream {
                if !text_buffer.is_empty() {
                    self.append_message(Message::assistant(text_buffer));
                    self.persist().await;
                }
                return Ok(FinishReason::Cancelled);
            }

            let outcome = outcome
                .ok_or_else(|| AgentError::Stream("stream ended without a finish step".into()))?;

            // Assistant message: text first, then tool uses in the order
            // their arguments completed.
            let mut blocks = Vec::new();
            if !text_buffer.is_empty() {
                blocks.push(ContentBlock::text(text_buffer));
            }
            for call in &pending {
                blocks.push(ContentBlock::tool_use(
                    &call.id,
                    &call.name,
                    call.arguments.clone(),
                ));
            }
            if !blocks.is_empty() {
                self.append_message(Message::assistant_blocks(blocks));
                self.persist().await;
            }

            self.usage.lock().unwrap().add(&outcome.usage);

            match outcome.finish_reason {
                FinishReason::Stop | FinishReason::Length => return Ok(outcome.finish_reason),
                FinishReason::Cancelled => return Ok(FinishReason::Cancelled),
                FinishReason::Error => {
                    return Err(AgentError::Stream("provider reported an error finish".into()));
                }
                FinishReason::ToolCalls => {
                    if pending.is_empty() {
                        tracing::warn!(session = %self.id, "tool-calls finish with no pending calls");
                        return Ok(FinishReason::Stop);
                    }

                    let results = self.dispatch(&message_id, &pending).await;
                    self.append_message(Message::tool_results(results));
                    self.persist().await;

                    turn += 1;
                }
            }
        }
    }

    // ── Dispatch phase ───────────────────────────────────────────────────────

    /// Fan out the pending tool calls, fan their results back in.
    ///
    /// Permitted calls run concurrently on spawned workers; the result
    /// message is assembled deterministically in pending-list order. Every
    /// failure mode (denied, missing, crashed) becomes an error-flagged
    /// result block — the dispatch phase never aborts the turn.
    async fn dispatch(&self, message_id: &str, pending: &[PendingCall]) -> Vec<ContentBlock> {
        enum Slot {
            Ready(ToolOutput),
            Running(tokio::task::JoinHandle<ToolOutput>),
        }

        let mut ctx = ToolContext::new(&self.id, message_id)
            .with_working_dir(&self.working_dir)
            .with_abort(self.cancel.clone());
        if let Some(handler) = &self.question_handler {
            ctx = ctx.with_question_handler(Arc::clone(handler));
        }
        if let Some(factory) = &self.child_factory {
            ctx = ctx.with_child_factory(Arc::clone(factory));
        }

        let mut slots = Vec::with_capacity(pending.len());
        for call in pending {
            self.fire_tool_start(&call.id, &call.name);

            match self.gate(&call.name).await {
                Err(message) => {
                    tracing::info!(session = %self.id, tool = %call.name, "tool call denied");
                    slots.push(Slot::Ready(ToolOutput::error(message)));
                }
                Ok(()) => match self.tools.get(&call.name) {
                    None => {
                        slots.push(Slot::Ready(ToolOutput::error(format!(
                            "tool not found: {}",
                            call.name
                        ))));
                    }
                    Some(tool) => {
                        let args = call.arguments.clone();
                        let ctx = ctx.clone();
                        let name = call.name.clone();
                        slots.push(Slot::Running(tokio::spawn(async move {
                            match tool.execute(args, &ctx).await {
                                Ok(output) => output,
                                Err(e) => {
                                    tracing::warn!(tool = %name, error = %e, "tool execution failed");
                                    ToolOutput::error(e.to_string())
                                }
                            }
                        })));
                    }
                },
            }
        }

        let limits = TruncateLimits {
            max_lines: self.config.truncate_max_lines,
            max_bytes: self.config.truncate_max_bytes,
        };

        let mut results = Vec::with_capacity(pending.len());
        for (call, slot) in pending.iter().zip(slots) {
            let output = match slot {
                Slot::Ready(output) => output,
                Slot::Running(handle) => handle.await.unwrap_or_else(|e| {
                    ToolOutput::error(format!("tool task failed: {e}"))
                }),
            };

            // Observers get the full output; history gets the bounded form.
            self.fire_tool_complete(&call.id, &call.name, &output);

            let (content, truncated) = history::truncate_output(&output.content, limits);
            if truncated {
                tracing::debug!(tool = %call.name, "tool output truncated for history");
            }

            results.push(if output.is_error {
                ContentBlock::tool_error(&call.id, &call.name, content)
            } else {
                ContentBlock::tool_result(&call.id, &call.name, content)
            });
        }

        results
    }

    /// Resolve the permission gate for one tool. `Err` carries the denial
    /// message used for the synthesized result.
    async fn gate(&self, tool_id: &str) -> std::result::Result<(), String> {
        match self.permissions.check(tool_id, &self.agent) {
            Permission::Allow => Ok(()),
            Permission::Deny => Err(format!("permission denied for tool '{tool_id}'")),
            Permission::Ask => {
                let Some(handler) = &self.question_handler else {
                    return Err(format!(
                        "permission denied for tool '{tool_id}' (no question handler installed)"
                    ));
                };

                let info = QuestionInfo::single(format!(
                    "Allow the agent to run tool '{tool_id}'? (yes / always / no)"
                ));
                let response = tokio::select! {
                    _ = self.cancel.cancelled() => QuestionResponse::cancelled(),
                    response = handler.ask(info) => response,
                };

                if response.cancelled {
                    return Err(format!("permission denied for tool '{tool_id}'"));
                }
                match response
                    .answers
                    .first()
                    .map(|s| s.trim().to_lowercase())
                    .as_deref()
                {
                    Some("always") => {
                        self.permissions.grant(tool_id);
                        Ok(())
                    }
                    Some("yes") | Some("y") => Ok(()),
                    _ => Err(format!("permission denied for tool '{tool_id}'")),
                }
            }
        }
    }

    // ── Request construction & history maintenance ───────────────────────────

    fn build_request(&self) -> CompletionRequest {
        let tools: Vec<ToolDefinition> = self
            .tools
            .list()
            .iter()
            .filter(|tool| self.permissions.check(tool.id(), &self.agent) != Permission::Deny)
            .map(|tool| definition_for(tool.as_ref()))
            .collect();

        let mut request = CompletionRequest::new(&self.agent.model, self.messages());
        if let Some(prompt) = &self.agent.system_prompt {
            request = request.with_system(prompt);
        }
        if let Some(max_tokens) = self.agent.max_tokens {
            request = request.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.agent.temperature {
            request = request.with_temperature(temperature);
        }
        if !self.agent.stop_sequences.is_empty() {
            request = request.with_stop_sequences(self.agent.stop_sequences.clone());
        }
        request.with_tools(tools)
    }

    fn prune_if_needed(&self) {
        let mut messages = self.messages.lock().unwrap();
        let estimated = history::estimate_history_tokens(&messages);
        if estimated <= self.config.prune_protect_tokens {
            return;
        }

        let pruned = history::prune_old_outputs(
            &mut messages,
            self.config.prune_keep_recent_turns,
            SKILL_TOOL_ID,
        );
        if pruned > 0 {
            tracing::info!(
                session = %self.id,
                estimated_tokens = estimated,
                pruned,
                "pruned old tool outputs"
            );
        }
    }

    fn append_message(&self, message: Message) {
        self.messages.lock().unwrap().push(message);
    }

    /// Hand the store a snapshot. A lost save never disturbs the loop.
    async fn persist(&self) {
        let Some(store) = &self.store else { return };

        let snapshot = SessionSnapshot {
            id: self.id.clone(),
            agent_type: self.agent.agent_type.as_str().to_string(),
            title: None,
            messages: self.messages(),
            usage: self.usage(),
            created_at: self.created_at,
            updated_at: Utc::now(),
        };

        if let Err(e) = store.save(&snapshot).await {
            tracing::warn!(session = %self.id, error = %e, "failed to persist session");
        }
    }

    // ── Observer firing ──────────────────────────────────────────────────────

    fn fire_stream(&self, text: &str) {
        for observer in self.observers.stream.lock().unwrap().iter() {
            observer(text);
        }
    }

    fn fire_tool_start(&self, call_id: &str, tool_id: &str) {
        for observer in self.observers.tool_start.lock().unwrap().iter() {
            observer(call_id, tool_id);
        }
    }

    fn fire_tool_complete(&self, call_id: &str, tool_id: &str, output: &ToolOutput) {
        for observer in self.observers.tool_complete.lock().unwrap().iter() {
            observer(call_id, tool_id, output);
        }
    }

    /// Exactly one terminal callback per prompt, even if the loop produces
    /// more than one terminal condition.
    fn fire_terminal(&self, result: &Result<FinishReason>) {
        if self.terminal_fired.swap(true, Ordering::SeqCst) {
            return;
        }
        match result {
            Ok(reason) => {
                for observer in self.observers.complete.lock().unwrap().iter() {
                    observer(*reason);
                }
            }
            Err(error) => {
                for observer in self.observers.error.lock().unwrap().iter() {
                    observer(error);
                }
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("agent_type", &self.agent.agent_type)
            .field("model", &self.agent.model)
            .field("messages", &self.messages.lock().unwrap().len())
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for [`Session`].
pub struct SessionBuilder {
    provider: SharedProvider,
    agent: AgentConfig,
    config: SessionConfig,
    tools: Option<Arc<ToolRegistry>>,
    permissions: Option<Arc<PermissionEngine>>,
    store: Option<Arc<dyn MessageStore>>,
    question_handler: Option<SharedQuestionHandler>,
    child_factory: Option<Arc<ChildSessionFn>>,
    working_dir: Option<PathBuf>,
}

impl SessionBuilder {
    fn new(provider: SharedProvider, agent: AgentConfig) -> Self {
        Self {
            provider,
            agent,
            config: SessionConfig::default(),
            tools: None,
            permissions: None,
            store: None,
            question_handler: None,
            child_factory: None,
            working_dir: None,
        }
    }

    /// Override the orchestrator configuration.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a tool registry (defaults to the process-wide one).
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Inject a permission engine (defaults to the process-wide one).
    pub fn with_permissions(mut self, permissions: Arc<PermissionEngine>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Install a message store.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Install a question handler for `Ask` permission outcomes.
    pub fn with_question_handler(mut self, handler: SharedQuestionHandler) -> Self {
        self.question_handler = Some(handler);
        self
    }

    /// Install a child-session factory for the task tool.
    pub fn with_child_factory(mut self, factory: Arc<ChildSessionFn>) -> Self {
        self.child_factory = Some(factory);
        self
    }

    /// Set the working directory tools see.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Build the session.
    pub fn build(self) -> Arc<Session> {
        Arc::new(Session {
            id: Uuid::new_v4().to_string(),
            agent: self.agent,
            config: self.config,
            provider: self.provider,
            tools: self.tools.unwrap_or_else(ToolRegistry::global),
            permissions: self.permissions.unwrap_or_else(PermissionEngine::global),
            store: self.store,
            question_handler: self.question_handler,
            child_factory: self.child_factory,
            working_dir: self
                .working_dir
                .or_else(|| std::env::current_dir().ok())
                .unwrap_or_else(|| PathBuf::from("/")),
            messages: Mutex::new(Vec::new()),
            usage: Mutex::new(Usage::default()),
            cancel: CancellationToken::new(),
            observers: Observers::default(),
            terminal_fired: AtomicBool::new(false),
            created_at: Utc::now(),
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Child-Session Factory
// ─────────────────────────────────────────────────────────────────────────────

/// Builds the `create_child_session` callable installed on tool contexts.
///
/// Child sessions are independent — their own history, their own turn loop
/// — but share the provider, tool registry, and permission engine captured
/// here. The produced value is a callable, not a reference to any parent.
pub struct ChildSessionFactory {
    provider: SharedProvider,
    tools: Arc<ToolRegistry>,
    permissions: Arc<PermissionEngine>,
    store: Option<Arc<dyn MessageStore>>,
    config: SessionConfig,
    configure: Box<dyn Fn(AgentType) -> AgentConfig + Send + Sync>,
}

impl ChildSessionFactory {
    /// Create a factory; `configure` maps an agent type to the child's
    /// agent config (model, prompt, policy).
    pub fn new(
        provider: SharedProvider,
        configure: impl Fn(AgentType) -> AgentConfig + Send + Sync + 'static,
    ) -> Self {
        Self {
            provider,
            tools: ToolRegistry::global(),
            permissions: PermissionEngine::global(),
            store: None,
            config: SessionConfig::default(),
            configure: Box::new(configure),
        }
    }

    /// Share a tool registry with the children.
    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    /// Share a permission engine with the children.
    pub fn with_permissions(mut self, permissions: Arc<PermissionEngine>) -> Self {
        self.permissions = permissions;
        self
    }

    /// Persist children through a store.
    pub fn with_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Orchestrator configuration for the children.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Finish into the callable installed on tool contexts.
    pub fn into_fn(self) -> Arc<ChildSessionFn> {
        Arc::new(move |agent_type: AgentType| {
            let agent = (self.configure)(agent_type);
            let mut builder = Session::builder(Arc::clone(&self.provider), agent)
                .with_config(self.config.clone())
                .with_tools(Arc::clone(&self.tools))
                .with_permissions(Arc::clone(&self.permissions));
            if let Some(store) = &self.store {
                builder = builder.with_store(Arc::clone(store));
            }
            Some(builder.build())
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
