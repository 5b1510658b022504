//! The agent run loop.
//!
//! [`AgentEngine::execute`] drives one run: pick providers, build the
//! prompt, then iterate provider call → tool execution until the model
//! answers without tool calls or the iteration budget runs out. Errors and
//! panics inside a run never escape `execute`; they become an apology
//! response with `error` set.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{AgentConfig, Config};
use crate::error::{ClawError, Result};
use crate::providers::{
    ChatOptions, LLMResponse, ProviderManager, ProviderReply, ProviderRequest, ProviderRole,
    ProviderSelection, ProviderTier, SelectOptions, ToolDefinition,
};
use crate::session::{Message, MessageMetadata, Role, ToolCall};
use crate::tools::{ToolContext, ToolPolicy, ToolRegistry, ToolResult};
use crate::utils::sanitize::{compute_tool_result_budget, strip_reasoning};
use crate::utils::string::{log_preview, preview};

use super::compaction::{estimate_messages, is_summary, CompactionOutcome, ContextCompactor};
use super::context::{ContextBuilder, PromptBuilder, PromptInputs, RuntimeContext};
use super::events::{RunEvent, RunEventSink, RunOutcome};
use super::repair::repair_orphaned_tool_calls;
use super::tool_parts::ToolPart;

/// Denials of one tool name tolerated per run; the next one aborts.
pub const MAX_DENIALS_PER_TOOL: u32 = 3;

/// Characters of each tool output shown in the finalization digest.
const DIGEST_ITEM_CHARS: usize = 800;

const FINALIZE_INSTRUCTION: &str = "Using the tool results above, write the final answer for the user. \
Do not call any tools. Reply with the answer only.";

/// Scheduler context for runs that no person started.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronContext {
    pub job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// One request to the engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentInput {
    pub session_key: String,
    pub query: String,
    pub history: Vec<Message>,
    pub channel: String,
    pub chat_id: Option<String>,
    pub cron: Option<CronContext>,
    /// Name of a configured tool profile; `None` allows every tool
    pub tool_policy: Option<String>,
    /// Minimum provider tier for the tools role
    pub tier: Option<ProviderTier>,
    /// Extra context pasted into the system prompt
    pub memory_context: Option<String>,
}

impl AgentInput {
    pub fn new(session_key: &str, channel: &str, query: &str) -> Self {
        Self {
            session_key: session_key.to_string(),
            channel: channel.to_string(),
            query: query.to_string(),
            ..Default::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_chat_id(mut self, chat_id: Option<&str>) -> Self {
        self.chat_id = chat_id.map(str::to_string);
        self
    }

    pub fn with_cron(mut self, cron: CronContext) -> Self {
        self.cron = Some(cron);
        self
    }

    pub fn with_tool_policy(mut self, policy: &str) -> Self {
        self.tool_policy = Some(policy.to_string());
        self
    }

    pub fn with_tier(mut self, tier: ProviderTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

/// Result of a run. Every field is set whatever the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutput {
    pub response: String,
    pub tools_used: Vec<String>,
    pub iterations: u32,
    pub provider_id: Option<String>,
    pub model: Option<String>,
    pub run_id: String,
    pub error: Option<String>,
    pub outcome: RunOutcome,
    /// Conversation after the run, without the system prompt. Empty when
    /// the run failed before its prompt was built.
    #[serde(default)]
    pub messages: Vec<Message>,
}

impl AgentOutput {
    pub fn is_success(&self) -> bool {
        self.outcome == RunOutcome::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunPhase {
    Starting,
    SelectingProviders,
    BuildingPrompt,
    Iterating,
    ExecutingTools,
    Finalizing,
    Terminal(RunOutcome),
}

/// State owned by one `execute` call.
struct Run {
    id: String,
    phase: RunPhase,
    iterations: u32,
    tools_used: Vec<String>,
    provider_id: Option<String>,
    model: Option<String>,
    messages: Vec<Message>,
    denials: HashMap<String, u32>,
}

impl Run {
    fn new() -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            phase: RunPhase::Starting,
            iterations: 0,
            tools_used: Vec::new(),
            provider_id: None,
            model: None,
            messages: Vec::new(),
            denials: HashMap::new(),
        }
    }

    fn enter(&mut self, phase: RunPhase) {
        if self.phase != phase {
            debug!(run_id = %self.id, from = ?self.phase, to = ?phase, "Run phase");
            self.phase = phase;
        }
    }

    fn record_tool(&mut self, name: &str) {
        if !self.tools_used.iter().any(|t| t == name) {
            self.tools_used.push(name.to_string());
        }
    }

    fn record_reply(&mut self, reply: &ProviderReply) -> MessageMetadata {
        self.provider_id = Some(reply.provider_id.clone());
        self.model = Some(reply.model.clone());
        MessageMetadata {
            provider_id: Some(reply.provider_id.clone()),
            model: Some(reply.model.clone()),
            prompt_tokens: reply.response.usage.map(|u| u.prompt_tokens),
            completion_tokens: reply.response.usage.map(|u| u.completion_tokens),
        }
    }
}

struct Finished {
    response: String,
    outcome: RunOutcome,
    error: Option<String>,
}

/// Providers chosen for a run.
struct Selected {
    tools: ProviderSelection,
    chat: Option<ProviderSelection>,
}

/// Runs agent requests against shared providers and tools.
pub struct AgentEngine {
    config: AgentConfig,
    tool_profiles: HashMap<String, Option<Vec<String>>>,
    providers: Arc<ProviderManager>,
    tools: Arc<ToolRegistry>,
    compactor: ContextCompactor,
    prompt: Arc<dyn PromptBuilder>,
    sinks: Vec<Arc<dyn RunEventSink>>,
    iteration_timeout: Duration,
    tool_timeout: Duration,
}

impl AgentEngine {
    pub fn new(config: &Config, providers: Arc<ProviderManager>, tools: Arc<ToolRegistry>) -> Self {
        Self {
            config: config.agent.clone(),
            tool_profiles: config.tool_profiles.clone(),
            providers,
            tools,
            compactor: ContextCompactor::new(config.compaction.clone()),
            prompt: Arc::new(ContextBuilder::new()),
            sinks: Vec::new(),
            iteration_timeout: config.iteration_timeout(),
            tool_timeout: config.tool_timeout(),
        }
    }

    pub fn with_prompt_builder(mut self, prompt: Arc<dyn PromptBuilder>) -> Self {
        self.prompt = prompt;
        self
    }

    /// Register a sink for run events. Sinks are called in registration order.
    pub fn with_sink(mut self, sink: Arc<dyn RunEventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_iteration_timeout(mut self, timeout: Duration) -> Self {
        self.iteration_timeout = timeout;
        self
    }

    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn providers(&self) -> &Arc<ProviderManager> {
        &self.providers
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    fn emit(&self, event: RunEvent) {
        for sink in &self.sinks {
            sink.on_event(&event);
        }
    }

    fn emit_compaction(&self, run: &Run, outcome: &CompactionOutcome) {
        self.emit(RunEvent::ContextCompacted {
            run_id: run.id.clone(),
            strategy: outcome.strategy,
            before: outcome.before,
            after: outcome.after,
        });
    }

    fn emit_part(&self, run: &Run, part: &ToolPart) {
        self.emit(RunEvent::ToolPartUpdated {
            run_id: run.id.clone(),
            part: part.clone(),
        });
    }

    fn chat_options(&self) -> ChatOptions {
        let mut options = ChatOptions::new();
        if let Some(max_tokens) = self.config.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = self.config.temperature {
            options = options.with_temperature(temperature);
        }
        options
    }

    /// Run one request to completion. Never fails and never panics.
    pub async fn execute(&self, input: AgentInput) -> AgentOutput {
        let mut run = Run::new();
        let started = Instant::now();
        let span = info_span!(
            "run",
            run_id = %run.id,
            session_key = %input.session_key,
            channel = %input.channel,
        );

        self.emit(RunEvent::RunStarted {
            run_id: run.id.clone(),
            session_key: input.session_key.clone(),
            channel: input.channel.clone(),
        });

        let result = AssertUnwindSafe(self.run(&input, &mut run).instrument(span.clone()))
            .catch_unwind()
            .await;

        let finished = match result {
            Ok(Ok(finished)) => finished,
            Ok(Err(e)) => {
                span.in_scope(|| error!(error = %e, "Run failed"));
                Finished {
                    response: format!("Sorry, I couldn't complete that request: {}", e),
                    outcome: RunOutcome::Error,
                    error: Some(e.to_string()),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                span.in_scope(|| error!(panic = %message, "Run panicked"));
                Finished {
                    response: "Sorry, something went wrong while handling that request."
                        .to_string(),
                    outcome: RunOutcome::Error,
                    error: Some(format!("run panicked: {}", message)),
                }
            }
        };

        run.enter(RunPhase::Terminal(finished.outcome));
        let duration_ms = started.elapsed().as_millis() as u64;
        self.emit(RunEvent::RunFinished {
            run_id: run.id.clone(),
            outcome: finished.outcome,
            iterations: run.iterations,
            duration_ms,
        });

        // Drop the built system prompt; compaction summaries stay.
        let mut messages = run.messages;
        if messages.first().is_some_and(|m| m.role == Role::System) {
            messages.remove(0);
        }

        AgentOutput {
            response: finished.response,
            tools_used: run.tools_used,
            iterations: run.iterations,
            provider_id: run.provider_id,
            model: run.model,
            run_id: run.id,
            error: finished.error,
            outcome: finished.outcome,
            messages,
        }
    }

    async fn run(&self, input: &AgentInput, run: &mut Run) -> Result<Finished> {
        info!(query = %log_preview(&input.query, 80), "Run started");

        // Policy and tool definitions
        let policy_name = input.tool_policy.as_deref().or_else(|| {
            input
                .cron
                .as_ref()
                .and(self.config.cron_tool_profile.as_deref())
        });
        let policy = ToolPolicy::from_profiles(&self.tool_profiles, policy_name)?;
        let ctx = ToolContext::for_run(&run.id, &input.session_key)
            .with_channel(&input.channel, input.chat_id.as_deref())
            .with_cron(input.cron.is_some())
            .with_policy(policy_name)
            .with_workspace(self.config.workspace.as_deref());
        let tool_defs = self.tools.definitions_for_policy(&policy, &ctx);
        let allowed: HashSet<String> = tool_defs.iter().map(|d| d.name.clone()).collect();

        run.enter(RunPhase::SelectingProviders);
        let selected = self.select_providers(input, !tool_defs.is_empty())?;
        self.emit(RunEvent::ProvidersSelected {
            run_id: run.id.clone(),
            tools_provider: selected.tools.id.clone(),
            chat_provider: selected.chat.as_ref().map(|c| c.id.clone()),
        });

        run.enter(RunPhase::BuildingPrompt);
        run.messages = self.build_messages(input, &tool_defs);

        let options = self.chat_options();
        let mut last_content = String::new();

        for iteration in 1..=self.config.max_iterations {
            run.enter(RunPhase::Iterating);
            run.iterations = iteration;
            self.emit(RunEvent::IterationStarted {
                run_id: run.id.clone(),
                iteration,
            });

            if let Some(outcome) = self.compactor.proactive(&run.messages) {
                self.emit_compaction(run, &outcome);
                run.messages = outcome.messages;
            }
            repair_orphaned_tool_calls(&mut run.messages);

            let request = ProviderRequest::new(run.messages.clone(), ProviderRole::Tools)
                .with_tools(tool_defs.clone())
                .with_options(options.clone())
                .with_tier(input.tier);
            let call = self
                .providers
                .call_with_tool_repair(request, &selected.tools.id);
            let reply = tokio::time::timeout(self.iteration_timeout, call)
                .await
                .map_err(|_| {
                    ClawError::timeout(format!("iteration {}", iteration), self.iteration_timeout)
                })??;
            let metadata = run.record_reply(&reply);
            debug!(
                provider = %reply.provider_id,
                attempts = reply.attempts,
                repaired = reply.repaired,
                tool_calls = reply.response.tool_calls.len(),
                "Provider replied"
            );

            if !reply.response.has_tool_calls() {
                run.enter(RunPhase::Finalizing);
                let response = self
                    .finalize(input, run, &selected, reply.response, &options)
                    .await;
                let answer = Message::assistant(&response).with_metadata(metadata);
                run.messages.push(answer);
                info!(iterations = iteration, tools = ?run.tools_used, "Run succeeded");
                return Ok(Finished {
                    response,
                    outcome: RunOutcome::Success,
                    error: None,
                });
            }

            let LLMResponse {
                content,
                tool_calls,
                ..
            } = reply.response;
            if !content.trim().is_empty() {
                last_content = content.clone();
            }
            let calls: Vec<ToolCall> = tool_calls.into_iter().map(ToolCall::from).collect();
            run.messages
                .push(Message::assistant_with_tools(&content, calls.clone()).with_metadata(metadata));

            if let Some(outcome) = self.compactor.emergency(&run.messages)? {
                self.emit_compaction(run, &outcome);
                run.messages = outcome.messages;
            }

            run.enter(RunPhase::ExecutingTools);
            self.execute_tools(run, &calls, &allowed, &ctx).await?;

            if let Some(outcome) = self.compactor.reactive(&run.messages) {
                self.emit_compaction(run, &outcome);
                run.messages = outcome.messages;
            }
        }

        let max = self.config.max_iterations;
        warn!(max_iterations = max, "Run reached maximum iterations");
        let stripped = strip_reasoning(&last_content);
        let response = if stripped.is_empty() {
            progress_summary(max, &run.tools_used)
        } else {
            stripped
        };
        Ok(Finished {
            response,
            outcome: RunOutcome::MaxIterationsReached,
            error: Some(ClawError::MaxIterationsReached(max).to_string()),
        })
    }

    fn select_providers(&self, input: &AgentInput, require_tools: bool) -> Result<Selected> {
        let opts = SelectOptions::for_role(ProviderRole::Tools)
            .with_tier(input.tier)
            .requiring_tools(require_tools);
        let tools = self
            .providers
            .select_best_provider(ProviderRole::Tools, &opts)?;

        let chat = if self.config.finalize_with_chat_provider {
            let opts = SelectOptions::for_role(ProviderRole::Chat).with_tier(input.tier);
            self.providers
                .select_best_provider(ProviderRole::Chat, &opts)
                .ok()
                .filter(|chat| chat.id != tools.id)
        } else {
            None
        };

        info!(
            tools_provider = %tools.id,
            chat_provider = chat.as_ref().map(|c| c.id.as_str()).unwrap_or("-"),
            "Providers selected"
        );
        Ok(Selected { tools, chat })
    }

    fn build_messages(&self, input: &AgentInput, tool_defs: &[ToolDefinition]) -> Vec<Message> {
        let bootstrap = self
            .config
            .workspace
            .as_deref()
            .map(|dir| {
                self.prompt
                    .load_bootstrap_files(Path::new(dir), &self.config.bootstrap_files)
            })
            .unwrap_or_default();

        let mut runtime = RuntimeContext::new()
            .with_channel(&input.channel)
            .with_tools(tool_defs.iter().map(|d| d.name.clone()).collect())
            .with_current_time()
            .with_os_info()
            .with_cron(input.cron.is_some());
        if let Some(ref workspace) = self.config.workspace {
            runtime = runtime.with_workspace(workspace);
        }

        let system = self.prompt.build_system_prompt(&PromptInputs {
            agent_name: &self.config.agent_name,
            base_prompt: self.config.system_prompt.as_deref(),
            bootstrap: &bootstrap,
            runtime: Some(&runtime),
            memory_context: input.memory_context.as_deref(),
        });

        let mut messages = vec![Message::system(&system)];
        messages.extend(
            input
                .history
                .iter()
                .filter(|m| m.role != Role::System || is_summary(m))
                .cloned(),
        );
        if !input.query.is_empty() {
            messages.push(Message::user(&input.query));
        }
        self.prompt
            .trim_messages_for_context(messages, self.compactor.budget())
    }

    async fn execute_tools(
        &self,
        run: &mut Run,
        calls: &[ToolCall],
        allowed: &HashSet<String>,
        ctx: &ToolContext,
    ) -> Result<()> {
        let budget = compute_tool_result_budget(
            self.compactor.budget(),
            estimate_messages(&run.messages),
            calls.len(),
            self.config.max_tool_result_bytes,
        );

        for call in calls {
            let args = parse_arguments(&call.arguments);
            let input = args.as_ref().ok().cloned().unwrap_or(Value::Null);
            let mut part = ToolPart::pending(&call.id, &call.name, input);
            self.emit_part(run, &part);

            if !allowed.contains(&call.name) {
                let denials = run.denials.entry(call.name.clone()).or_insert(0);
                *denials += 1;
                let denials = *denials;
                warn!(tool = %call.name, denials, "Tool call denied");
                self.emit(RunEvent::ToolDenied {
                    run_id: run.id.clone(),
                    tool: call.name.clone(),
                    denials,
                });
                part.fail(format!("Tool '{}' is not allowed in this context", call.name))?;
                self.emit_part(run, &part);

                if denials > MAX_DENIALS_PER_TOOL {
                    return Err(ClawError::ToolPolicyDenied(call.name.clone()));
                }
                let result = ToolResult::failure(format!(
                    "Tool '{}' is not allowed in this context. Use one of the offered tools.",
                    call.name
                ));
                run.messages
                    .push(Message::tool_result(&call.id, &call.name, &result.format()));
                continue;
            }

            run.record_tool(&call.name);
            part.start()?;
            self.emit_part(run, &part);

            let result = match args {
                Ok(args) => self.run_tool(&call.name, args, ctx).await,
                Err(e) => ToolResult::failure(format!("Invalid arguments JSON: {}", e)),
            }
            .sanitized(budget);

            match result.error() {
                Some(err) => part.fail(err)?,
                None => part.complete(preview(&result.format(), 200))?,
            }
            self.emit_part(run, &part);

            run.messages
                .push(Message::tool_result(&call.id, &call.name, &result.format()));
        }
        Ok(())
    }

    /// Execute on its own task so a panicking or hanging tool cannot take
    /// the run down with it.
    async fn run_tool(&self, name: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let limit = self.tools.tool_timeout(name).unwrap_or(self.tool_timeout);
        let tools = Arc::clone(&self.tools);
        let task_name = name.to_string();
        let task_ctx = ctx.clone();
        let handle = tokio::spawn(async move { tools.execute(&task_name, args, &task_ctx).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(limit, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_panic() => {
                error!(tool = name, "Tool panicked");
                ToolResult::failure(format!("Tool '{}' panicked", name))
            }
            Ok(Err(_)) => ToolResult::failure(format!("Tool '{}' was cancelled", name)),
            Err(_) => {
                abort.abort();
                warn!(tool = name, timeout_ms = limit.as_millis() as u64, "Tool timed out");
                ToolResult::failure(format!(
                    "Tool '{}' timed out after {}ms",
                    name,
                    limit.as_millis()
                ))
            }
        }
    }

    /// Final answer text. A distinct chat provider rephrases the answer when
    /// tools ran; any failure there falls back to the tool provider's text.
    async fn finalize(
        &self,
        input: &AgentInput,
        run: &mut Run,
        selected: &Selected,
        response: LLMResponse,
        options: &ChatOptions,
    ) -> String {
        let draft = response.content;
        let chat = match selected.chat {
            Some(ref chat) if !run.tools_used.is_empty() => chat,
            _ => return self.clean_answer(&draft, run),
        };

        let digest = tool_digest(&run.messages, self.config.finalize_digest_items);
        let mut messages: Vec<Message> = run
            .messages
            .iter()
            .take_while(|m| m.role == Role::System)
            .cloned()
            .collect();
        messages.push(Message::user(&input.query));
        let mut prompt = format!("Tool results:\n{}", digest);
        if !draft.trim().is_empty() {
            prompt.push_str(&format!("\n\nDraft answer:\n{}", draft.trim()));
        }
        prompt.push_str("\n\n");
        prompt.push_str(FINALIZE_INSTRUCTION);
        messages.push(Message::user(&prompt));

        let request = ProviderRequest::new(messages, ProviderRole::Chat)
            .with_options(options.clone())
            .with_tier(input.tier);
        let call = self.providers.call_provider_with_fallback(request, &chat.id);
        match tokio::time::timeout(self.iteration_timeout, call).await {
            Ok(Ok(reply)) if !strip_reasoning(&reply.response.content).is_empty() => {
                debug!(provider = %reply.provider_id, "Finalized with chat provider");
                run.record_reply(&reply);
                strip_reasoning(&reply.response.content)
            }
            Ok(Ok(_)) => {
                warn!(provider = %chat.id, "Chat provider returned an empty answer");
                self.clean_answer(&draft, run)
            }
            Ok(Err(e)) => {
                warn!(provider = %chat.id, error = %e, "Chat finalization failed");
                self.clean_answer(&draft, run)
            }
            Err(_) => {
                warn!(provider = %chat.id, "Chat finalization timed out");
                self.clean_answer(&draft, run)
            }
        }
    }

    fn clean_answer(&self, draft: &str, run: &Run) -> String {
        let answer = strip_reasoning(draft);
        if answer.is_empty() && !run.tools_used.is_empty() {
            return format!("Done. Tools used: {}.", run.tools_used.join(", "));
        }
        answer
    }
}

fn parse_arguments(raw: &str) -> std::result::Result<Value, serde_json::Error> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_str(raw)
}

/// Most recent `items` tool outputs, oldest first.
fn tool_digest(messages: &[Message], items: usize) -> String {
    let mut recent: Vec<String> = messages
        .iter()
        .rev()
        .filter(|m| m.is_tool_result())
        .take(items.max(1))
        .map(|m| {
            format!(
                "- {}: {}",
                m.tool_name.as_deref().unwrap_or("tool"),
                preview(&m.content, DIGEST_ITEM_CHARS)
            )
        })
        .collect();
    recent.reverse();
    recent.join("\n")
}

fn progress_summary(max_iterations: u32, tools_used: &[String]) -> String {
    if tools_used.is_empty() {
        format!(
            "I reached the limit of {} steps before finishing this request.",
            max_iterations
        )
    } else {
        format!(
            "I reached the limit of {} steps before finishing this request. Tools used so far: {}.",
            max_iterations,
            tools_used.join(", ")
        )
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
