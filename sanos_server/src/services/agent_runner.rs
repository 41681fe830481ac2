//! Remediation agent runner.
//!
//! Drives a bounded reasoning/tool-call loop against an OpenAI-compatible
//! chat completions endpoint and mirrors its transcript into the
//! [`LogStore`] `agent` channel so operators can follow a run live.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::log_store::{LogChannel, LogStore};
use super::tools::{GithubTools, ToolExecutor};
use crate::error::{Result, SanosError};

pub const NO_OUTPUT_NOTICE: &str = "Agent completed but produced no output.";

const TOOL_PREVIEW_CHARS: usize = 200;

const SYSTEM_PROMPT: &str = "You are an SRE remediation agent with access to a GitHub repository. \
Investigate the reported incident by reading the relevant files and recent commits, \
make the smallest change that fixes the root cause on a new branch, and open a pull request \
describing the root cause and the fix. Always read a file immediately before updating it so the \
sha you pass is current. Finish with a short summary of what you found and changed.";

/// Human-facing output of one agent run.
///
/// Everything is written through to `out` (stdout by default). When bound to
/// an app, complete lines are also appended to that app's `agent` channel.
/// An unterminated trailing line is flushed as a final entry on detach or
/// drop, so every exit path leaves the transcript complete.
pub struct TranscriptSink {
    out: Box<dyn Write + Send>,
    capture: Option<Capture>,
}

struct Capture {
    log_store: Arc<LogStore>,
    app_id: i64,
    pending: String,
}

impl TranscriptSink {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self { out, capture: None }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    /// Mirror complete lines into `app_id`'s agent channel.
    pub fn capturing(mut self, log_store: Arc<LogStore>, app_id: i64) -> Self {
        self.capture = Some(Capture {
            log_store,
            app_id,
            pending: String::new(),
        });
        self
    }

    pub fn write_str(&mut self, text: &str) {
        if let Err(e) = self.out.write_all(text.as_bytes()) {
            tracing::debug!(error = %e, "transcript write-through failed");
        }

        if let Some(capture) = self.capture.as_mut() {
            capture.pending.push_str(text);
            if let Some(pos) = capture.pending.rfind('\n') {
                let complete: String = capture.pending.drain(..=pos).collect();
                capture
                    .log_store
                    .append_lines(capture.app_id, LogChannel::Agent, &complete);
            }
        }
    }

    pub fn line(&mut self, text: &str) {
        self.write_str(text);
        self.write_str("\n");
    }

    /// Stop mirroring, flushing any buffered partial line.
    pub fn detach(&mut self) {
        if let Some(capture) = self.capture.take() {
            if !capture.pending.is_empty() {
                capture
                    .log_store
                    .append(capture.app_id, LogChannel::Agent, &capture.pending);
            }
        }
        let _ = self.out.flush();
    }
}

impl Drop for TranscriptSink {
    fn drop(&mut self) {
        self.detach();
    }
}

#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub prompt: String,
    pub model: String,
    pub max_turns: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub name: String,
    pub result: String,
}

/// What a reasoning provider hands back after a completed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentRunResult {
    pub final_output: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub total_tokens: u64,
}

#[async_trait]
pub trait ReasoningProvider: Send + Sync {
    async fn run(
        &self,
        request: &AgentRequest,
        tools: &dyn ToolExecutor,
        sink: &mut TranscriptSink,
    ) -> Result<AgentRunResult>;
}

// ── Chat completions wire types ──

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    total_tokens: u64,
}

fn function_type() -> String {
    "function".to_string()
}

/// Reasoning provider speaking the OpenAI-compatible `/chat/completions` API.
pub struct ChatCompletionsProvider {
    http: reqwest::Client,
    api_base: String,
}

impl ChatCompletionsProvider {
    pub fn new(api_base: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key.trim())).map_err(|_| {
            SanosError::InvalidInput("reasoning provider key is not a valid header value".into())
        })?;
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SanosError::Transport(format!("failed to build provider client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    async fn complete(&self, body: &Value) -> Result<ChatResponse> {
        let url = format!("{}/chat/completions", self.api_base);
        let response = self.http.post(url).json(body).send().await?;
        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(SanosError::ReasoningProvider(format!(
                "provider returned {}: {}",
                status.as_u16(),
                text
            )));
        }
        serde_json::from_str(&text).map_err(|e| {
            SanosError::ReasoningProvider(format!("unreadable provider response: {e}"))
        })
    }
}

#[async_trait]
impl ReasoningProvider for ChatCompletionsProvider {
    async fn run(
        &self,
        request: &AgentRequest,
        tools: &dyn ToolExecutor,
        sink: &mut TranscriptSink,
    ) -> Result<AgentRunResult> {
        let tool_specs: Vec<Value> = tools
            .definitions()
            .into_iter()
            .map(|def| {
                json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": def.parameters,
                    }
                })
            })
            .collect();

        let mut messages = vec![
            json!({"role": "system", "content": SYSTEM_PROMPT}),
            json!({"role": "user", "content": request.prompt}),
        ];
        let mut result = AgentRunResult::default();

        for turn in 1..=request.max_turns {
            let body = json!({
                "model": request.model,
                "messages": messages,
                "tools": tool_specs,
                "tool_choice": "auto",
            });
            let response = self.complete(&body).await?;

            if let Some(usage) = response.usage {
                result.total_tokens += usage.total_tokens;
            }
            let message = response
                .choices
                .into_iter()
                .next()
                .map(|choice| choice.message)
                .ok_or_else(|| SanosError::ReasoningProvider("provider returned no choices".into()))?;

            let content = message.content.unwrap_or_default();
            if !content.trim().is_empty() {
                sink.line(content.trim_end());
            }

            if message.tool_calls.is_empty() {
                tracing::info!(turn, tokens = result.total_tokens, "agent finished");
                result.final_output = content;
                return Ok(result);
            }

            messages.push(json!({
                "role": "assistant",
                "content": content,
                "tool_calls": message.tool_calls,
            }));

            for call in message.tool_calls {
                let name = call.function.name;
                let arguments: Value = if call.function.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&call.function.arguments).map_err(|e| {
                        SanosError::ReasoningProvider(format!(
                            "tool call {name} has malformed arguments: {e}"
                        ))
                    })?
                };

                sink.line(&format!("[Tool] {name}"));
                let output = tools.invoke(&name, arguments).await?;
                sink.line(&format!("  -> {}", preview(&output)));

                messages.push(json!({
                    "role": "tool",
                    "tool_call_id": call.id,
                    "content": output,
                }));
                result.tool_calls.push(ToolCallRecord { name, result: output });
            }
        }

        Err(SanosError::ReasoningProvider(format!(
            "agent did not finish within {} turns",
            request.max_turns
        )))
    }
}

fn preview(output: &str) -> String {
    let flat = output.replace('\n', " ");
    match flat.char_indices().nth(TOOL_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// Normalized result of a remediation run.
#[derive(Debug, Clone, Serialize)]
pub struct AgentOutcome {
    pub success: bool,
    /// Final narrative of the agent alone.
    pub summary: String,
    pub agent_output: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub total_tokens: u64,
}

pub struct RemediationRunner {
    provider: Arc<dyn ReasoningProvider>,
    log_store: Arc<LogStore>,
    github_api_base: String,
    github_timeout: Duration,
    model: String,
    max_turns: usize,
}

impl RemediationRunner {
    pub fn new(
        provider: Arc<dyn ReasoningProvider>,
        log_store: Arc<LogStore>,
        config: &crate::config::SanosConfig,
    ) -> Self {
        Self {
            provider,
            log_store,
            github_api_base: config.github_api_base.clone(),
            github_timeout: Duration::from_secs(config.github_timeout_secs),
            model: config.agent_model.clone(),
            max_turns: config.agent_max_turns,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Run the agent with a tool surface bound to `github_token`.
    pub async fn run(
        &self,
        github_token: &str,
        prompt: &str,
        app_id: Option<i64>,
    ) -> Result<AgentOutcome> {
        self.mark(app_id, "[Agent] Starting agent...");
        let result = match GithubTools::new(&self.github_api_base, github_token, self.github_timeout) {
            Ok(tools) => self.drive(&tools, prompt, app_id).await,
            Err(e) => Err(e),
        };
        self.finish(app_id, result)
    }

    /// Run the agent against an arbitrary tool executor.
    pub async fn run_with_tools(
        &self,
        tools: &dyn ToolExecutor,
        prompt: &str,
        app_id: Option<i64>,
    ) -> Result<AgentOutcome> {
        self.mark(app_id, "[Agent] Starting agent...");
        let result = self.drive(tools, prompt, app_id).await;
        self.finish(app_id, result)
    }

    async fn drive(
        &self,
        tools: &dyn ToolExecutor,
        prompt: &str,
        app_id: Option<i64>,
    ) -> Result<AgentRunResult> {
        let request = AgentRequest {
            prompt: prompt.to_string(),
            model: self.model.clone(),
            max_turns: self.max_turns,
        };

        let mut sink = TranscriptSink::stdout();
        if let Some(app_id) = app_id {
            sink = sink.capturing(self.log_store.clone(), app_id);
        }

        let run_id = uuid::Uuid::new_v4();
        tracing::info!(%run_id, app_id = ?app_id, model = %self.model, "agent run started");

        let started = Instant::now();
        let result = self.provider.run(&request, tools, &mut sink).await;
        sink.detach();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let outcome = if result.is_ok() { "success" } else { "failure" };
        tracing::info!(%run_id, elapsed_ms, outcome, "agent run finished");
        crate::metrics::remediation_finished(outcome, elapsed_ms);
        result
    }

    fn finish(&self, app_id: Option<i64>, result: Result<AgentRunResult>) -> Result<AgentOutcome> {
        match result {
            Ok(run) => {
                for call in run.tool_calls.iter().filter(|c| c.name == "create_pull_request") {
                    self.mark(app_id, &format!("[PR Created] {}", call.result));
                }
                self.mark(app_id, "[Agent] Agent completed successfully.");
                tracing::info!(
                    app_id = ?app_id,
                    tool_calls = run.tool_calls.len(),
                    tokens = run.total_tokens,
                    "remediation agent completed"
                );

                Ok(AgentOutcome {
                    success: true,
                    agent_output: compose_output(&run),
                    summary: run.final_output,
                    tool_calls: run.tool_calls,
                    total_tokens: run.total_tokens,
                })
            }
            Err(e) => {
                self.mark(app_id, &format!("[Agent Error] {}: {}", e.kind(), e));
                tracing::error!(app_id = ?app_id, kind = e.kind(), error = %e, "remediation agent failed");
                Err(e)
            }
        }
    }

    fn mark(&self, app_id: Option<i64>, message: &str) {
        if let Some(app_id) = app_id {
            self.log_store.append(app_id, LogChannel::Agent, message);
        }
    }
}

/// Final narrative followed by each tool payload, in call order.
fn compose_output(run: &AgentRunResult) -> String {
    let mut output = run.final_output.clone();
    for call in &run.tool_calls {
        output.push('\n');
        output.push_str(&call.result);
    }
    if output.trim().is_empty() {
        NO_OUTPUT_NOTICE.to_string()
    } else {
        output
    }
}
