//! Remediation workflow: runs the agent against an incident and records
//! the attempt as an analysis.

use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use super::agent_runner::{AgentOutcome, RemediationRunner, ToolCallRecord};
use super::incident_service::get_incident;
use super::store::IncidentStore;
use crate::error::{Result, SanosError};
use crate::models::analysis::{Analysis, NewAnalysis};
use crate::models::app::App;
use crate::models::incident::{Incident, IncidentStatus};
use crate::services::tools::RepoTool;

static PR_URL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https://github\.com/[\w.-]+/[\w.-]+/pull/(\d+)").unwrap());

const MAX_STACK_TRACE_CHARS: usize = 4_000;

#[derive(Debug, Clone, Serialize)]
pub struct RemediationReport {
    pub analysis: Analysis,
    pub incident_status: IncidentStatus,
    pub agent_output: String,
}

/// Prompt handed to the agent for one incident.
pub fn build_prompt(app: &App, incident: &Incident) -> String {
    let mut prompt = format!(
        "An error was reported by the application in the GitHub repository {owner}/{repo}.\n\n\
         Source: {source}\n\
         Error: {message}\n",
        owner = app.repo_owner,
        repo = app.repo_name,
        source = incident.source,
        message = incident.error_message,
    );

    if let Some(trace) = incident.stack_trace.as_deref().filter(|t| !t.trim().is_empty()) {
        let trace: String = trace.chars().take(MAX_STACK_TRACE_CHARS).collect();
        prompt.push_str(&format!("\nStack trace:\n{trace}\n"));
    }
    if let Some(logs) = incident.logs.as_ref().filter(|l| !l.is_null()) {
        prompt.push_str(&format!("\nRecent logs:\n{logs}\n"));
    }

    prompt.push_str(&format!(
        "\nUse owner \"{owner}\" and repo \"{repo}\" for every tool call. \
         Find the root cause, commit a fix on a new branch named sanos/fix-incident-{id}, \
         and open a pull request into main.",
        owner = app.repo_owner,
        repo = app.repo_name,
        id = incident.id,
    ));
    prompt
}

fn payloads<'a>(calls: &'a [ToolCallRecord], tool: RepoTool) -> impl Iterator<Item = Value> + 'a {
    calls
        .iter()
        .filter(move |c| c.name == tool.name())
        .filter_map(|c| serde_json::from_str::<Value>(&c.result).ok())
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Pull request opened during the run: from the tool trace when present,
/// else the first PR link mentioned in the output.
pub fn extract_pull_request(outcome: &AgentOutcome) -> Option<(String, Option<i32>)> {
    if let Some(pr) = payloads(&outcome.tool_calls, RepoTool::CreatePullRequest).last() {
        if let Some(url) = string_field(&pr, "url") {
            let number = pr
                .get("number")
                .and_then(Value::as_i64)
                .and_then(|n| i32::try_from(n).ok());
            return Some((url, number));
        }
    }

    PR_URL_REGEX.captures(&outcome.agent_output).map(|caps| {
        let number = caps.get(1).and_then(|m| m.as_str().parse().ok());
        (caps[0].to_string(), number)
    })
}

fn files_analyzed(calls: &[ToolCallRecord]) -> Vec<String> {
    let mut files: Vec<String> = Vec::new();
    for path in payloads(calls, RepoTool::GetFileContent).filter_map(|v| string_field(&v, "path")) {
        if !files.contains(&path) {
            files.push(path);
        }
    }
    files
}

fn commits_analyzed(calls: &[ToolCallRecord]) -> Vec<String> {
    payloads(calls, RepoTool::ListCommits)
        .filter_map(|v| v.as_array().cloned())
        .flatten()
        .filter_map(|commit| string_field(&commit, "sha"))
        .collect()
}

fn fix_commits(calls: &[ToolCallRecord]) -> Vec<String> {
    payloads(calls, RepoTool::UpdateFile)
        .chain(payloads(calls, RepoTool::CreateFile))
        .filter_map(|v| string_field(&v, "commit_sha"))
        .collect()
}

/// Run the remediation agent for `incident_id` with the given GitHub token.
///
/// The incident is `analyzing` while the agent runs. Afterwards it is
/// `pr_created` when a pull request was opened, otherwise back to `open`.
pub async fn remediate(
    store: &dyn IncidentStore,
    runner: &RemediationRunner,
    github_token: &str,
    incident_id: i64,
) -> Result<RemediationReport> {
    let incident = get_incident(store, incident_id).await?;
    let app = store
        .get_app(incident.app_id)
        .await?
        .ok_or_else(|| SanosError::NotFound(format!("app {}", incident.app_id)))?;

    if !store.try_begin_analysis(incident_id).await? {
        let reason = match IncidentStatus::parse(&incident.status) {
            Some(IncidentStatus::Resolved) => "is already resolved",
            _ => "is already being remediated",
        };
        return Err(SanosError::InvalidInput(format!(
            "incident {incident_id} {reason}"
        )));
    }
    tracing::info!(incident_id, app_id = app.id, repo = %app.full_name(), "remediation started");

    let prompt = build_prompt(&app, &incident);
    let outcome = match runner.run(github_token, &prompt, Some(app.id)).await {
        Ok(outcome) => outcome,
        Err(e) => {
            release(store, &incident).await;
            return Err(e);
        }
    };

    let pull_request = extract_pull_request(&outcome);
    let branch_name = payloads(&outcome.tool_calls, RepoTool::CreateBranch)
        .last()
        .and_then(|v| string_field(&v, "branch"));
    let root_cause = Some(outcome.summary.trim().to_string()).filter(|s| !s.is_empty());

    let new_analysis = NewAnalysis {
        incident_id,
        model: runner.model().to_string(),
        prompt,
        root_cause,
        suggested_fix: Some(json!({
            "branch": branch_name,
            "commits": fix_commits(&outcome.tool_calls),
        })),
        files_analyzed: json!(files_analyzed(&outcome.tool_calls)),
        commits_analyzed: json!(commits_analyzed(&outcome.tool_calls)),
        pr_url: pull_request.as_ref().map(|(url, _)| url.clone()),
        pr_number: pull_request.as_ref().and_then(|(_, number)| *number),
        branch_name,
        tokens_used: i64::try_from(outcome.total_tokens).ok(),
    };

    let analysis = match store.insert_analysis(new_analysis).await {
        Ok(analysis) => analysis,
        Err(e) => {
            release(store, &incident).await;
            return Err(e);
        }
    };

    let incident_status = if analysis.pr_url.is_some() {
        store
            .set_incident_status(incident_id, IncidentStatus::PrCreated)
            .await?;
        IncidentStatus::PrCreated
    } else {
        release(store, &incident).await
    };

    tracing::info!(
        incident_id,
        analysis_id = analysis.id,
        pr_url = analysis.pr_url.as_deref().unwrap_or("-"),
        status = incident_status.as_str(),
        "remediation recorded"
    );

    Ok(RemediationReport {
        analysis,
        incident_status,
        agent_output: outcome.agent_output,
    })
}

/// Put an incident back to `open` after a run that opened no pull request.
///
/// An identical report may have opened a fresh incident meanwhile; the
/// open-dedup index then refuses the reopen and this one is resolved as
/// superseded.
async fn release(store: &dyn IncidentStore, incident: &Incident) -> IncidentStatus {
    let superseded = match store
        .find_open_incident(incident.app_id, &incident.source, &incident.error_message)
        .await
    {
        Ok(open) => open.is_some_and(|other| other.id != incident.id),
        Err(_) => false,
    };

    if !superseded {
        match store
            .set_incident_status(incident.id, IncidentStatus::Open)
            .await
        {
            Ok(()) => return IncidentStatus::Open,
            Err(e) => {
                tracing::warn!(incident_id = incident.id, error = %e, "could not reopen incident");
            }
        }
    }

    match store
        .set_incident_status(incident.id, IncidentStatus::Resolved)
        .await
    {
        Ok(()) => {
            tracing::info!(
                incident_id = incident.id,
                "incident superseded by a newer open report"
            );
            IncidentStatus::Resolved
        }
        Err(e) => {
            tracing::error!(incident_id = incident.id, error = %e, "incident left in analyzing");
            IncidentStatus::Analyzing
        }
    }
}

/// Run [`remediate`] on its own task so that dropping the caller (a client
/// disconnect, a proxy timeout) does not abandon the incident mid-run.
pub async fn remediate_detached(
    store: Arc<dyn IncidentStore>,
    runner: Arc<RemediationRunner>,
    github_token: String,
    incident_id: i64,
) -> Result<RemediationReport> {
    let task_store = Arc::clone(&store);
    let handle = tokio::spawn(async move {
        remediate(task_store.as_ref(), &runner, &github_token, incident_id).await
    });

    match handle.await {
        Ok(result) => result,
        Err(e) => {
            tracing::error!(incident_id, error = %e, "remediation task failed");
            if let Ok(Some(incident)) = store.get_incident(incident_id).await {
                if incident.status == IncidentStatus::Analyzing.as_str() {
                    release(store.as_ref(), &incident).await;
                }
            }
            Err(SanosError::ReasoningProvider(format!(
                "remediation task failed: {e}"
            )))
        }
    }
}
