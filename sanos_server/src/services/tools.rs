//! Repository tool surface handed to the remediation agent.
//!
//! The set of tools is closed: [`RepoTool`] enumerates it, tool definitions
//! are derived from it, and [`GithubTools::invoke`] refuses anything else.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::github_service::GithubClient;
use crate::error::{Result, SanosError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoTool {
    GetFileContent,
    CreateBranch,
    UpdateFile,
    CreateFile,
    ListCommits,
    CreatePullRequest,
    GetCommitDiff,
}

impl RepoTool {
    pub const ALL: [RepoTool; 7] = [
        RepoTool::GetFileContent,
        RepoTool::CreateBranch,
        RepoTool::UpdateFile,
        RepoTool::CreateFile,
        RepoTool::ListCommits,
        RepoTool::CreatePullRequest,
        RepoTool::GetCommitDiff,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::GetFileContent => "get_file_content",
            Self::CreateBranch => "create_branch",
            Self::UpdateFile => "update_file",
            Self::CreateFile => "create_file",
            Self::ListCommits => "list_commits",
            Self::CreatePullRequest => "create_pull_request",
            Self::GetCommitDiff => "get_commit_diff",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Safe to repeat without side effects.
    pub fn is_idempotent(&self) -> bool {
        matches!(self, Self::GetFileContent | Self::ListCommits)
    }

    fn description(&self) -> &'static str {
        match self {
            Self::GetFileContent => {
                "Read a file from the repository. Returns the decoded content and the blob sha needed to update it."
            }
            Self::CreateBranch => "Create a new branch from the head of an existing branch.",
            Self::UpdateFile => {
                "Replace the content of an existing file on a branch. Requires the current blob sha."
            }
            Self::CreateFile => "Create a new file on a branch.",
            Self::ListCommits => "List the most recent commits on a branch, newest first.",
            Self::CreatePullRequest => "Open a pull request from a head branch into a base branch.",
            Self::GetCommitDiff => "Get the unified diff introduced by one commit.",
        }
    }

    fn parameters(&self) -> Value {
        match self {
            Self::GetFileContent => object_schema(
                json!({
                    "owner": string_prop("Repository owner"),
                    "repo": string_prop("Repository name"),
                    "path": string_prop("File path relative to the repository root"),
                    "ref": string_prop("Branch, tag or commit (default main)"),
                }),
                &["owner", "repo", "path"],
            ),
            Self::CreateBranch => object_schema(
                json!({
                    "owner": string_prop("Repository owner"),
                    "repo": string_prop("Repository name"),
                    "new_branch": string_prop("Name of the branch to create"),
                    "source_branch": string_prop("Branch to fork from (default main)"),
                }),
                &["owner", "repo", "new_branch"],
            ),
            Self::UpdateFile => object_schema(
                json!({
                    "owner": string_prop("Repository owner"),
                    "repo": string_prop("Repository name"),
                    "path": string_prop("File path"),
                    "content": string_prop("Complete new file content"),
                    "message": string_prop("Commit message"),
                    "branch": string_prop("Branch to commit to"),
                    "sha": string_prop("Current blob sha of the file"),
                }),
                &["owner", "repo", "path", "content", "message", "branch", "sha"],
            ),
            Self::CreateFile => object_schema(
                json!({
                    "owner": string_prop("Repository owner"),
                    "repo": string_prop("Repository name"),
                    "path": string_prop("File path"),
                    "content": string_prop("File content"),
                    "message": string_prop("Commit message"),
                    "branch": string_prop("Branch to commit to"),
                }),
                &["owner", "repo", "path", "content", "message", "branch"],
            ),
            Self::ListCommits => object_schema(
                json!({
                    "owner": string_prop("Repository owner"),
                    "repo": string_prop("Repository name"),
                    "branch": string_prop("Branch name (default main)"),
                    "per_page": {"type": "integer", "description": "Number of commits (default 5)"},
                }),
                &["owner", "repo"],
            ),
            Self::CreatePullRequest => object_schema(
                json!({
                    "owner": string_prop("Repository owner"),
                    "repo": string_prop("Repository name"),
                    "title": string_prop("Pull request title"),
                    "head": string_prop("Branch containing the changes"),
                    "base": string_prop("Branch to merge into (default main)"),
                    "body": string_prop("Pull request description"),
                }),
                &["owner", "repo", "title", "head"],
            ),
            Self::GetCommitDiff => object_schema(
                json!({
                    "owner": string_prop("Repository owner"),
                    "repo": string_prop("Repository name"),
                    "sha": string_prop("Commit sha"),
                }),
                &["owner", "repo", "sha"],
            ),
        }
    }

    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

fn string_prop(description: &str) -> Value {
    json!({"type": "string", "description": description})
}

fn object_schema(properties: Value, required: &[&str]) -> Value {
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Name, description and JSON-schema parameters of one callable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Dispatch seam between the reasoning loop and the tools it may call.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run the named tool with JSON arguments and return its result payload.
    async fn invoke(&self, name: &str, arguments: Value) -> Result<String>;
}

fn default_main() -> String {
    "main".to_string()
}

fn default_per_page() -> u32 {
    5
}

#[derive(Deserialize)]
struct GetFileContentArgs {
    owner: String,
    repo: String,
    path: String,
    #[serde(rename = "ref", default = "default_main")]
    git_ref: String,
}

#[derive(Deserialize)]
struct CreateBranchArgs {
    owner: String,
    repo: String,
    new_branch: String,
    #[serde(default = "default_main")]
    source_branch: String,
}

#[derive(Deserialize)]
struct UpdateFileArgs {
    owner: String,
    repo: String,
    path: String,
    content: String,
    message: String,
    branch: String,
    sha: String,
}

#[derive(Deserialize)]
struct CreateFileArgs {
    owner: String,
    repo: String,
    path: String,
    content: String,
    message: String,
    branch: String,
}

#[derive(Deserialize)]
struct ListCommitsArgs {
    owner: String,
    repo: String,
    #[serde(default = "default_main")]
    branch: String,
    #[serde(default = "default_per_page")]
    per_page: u32,
}

#[derive(Deserialize)]
struct CreatePullRequestArgs {
    owner: String,
    repo: String,
    title: String,
    head: String,
    #[serde(default = "default_main")]
    base: String,
    #[serde(default)]
    body: String,
}

#[derive(Deserialize)]
struct GetCommitDiffArgs {
    owner: String,
    repo: String,
    sha: String,
}

fn parse_args<T: serde::de::DeserializeOwned>(tool: RepoTool, arguments: Value) -> Result<T> {
    serde_json::from_value(arguments).map_err(|e| {
        SanosError::ReasoningProvider(format!("invalid arguments for {}: {e}", tool.name()))
    })
}

/// The seven repository tools bound to one GitHub credential.
#[derive(Clone)]
pub struct GithubTools {
    client: GithubClient,
}

impl GithubTools {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: GithubClient::new(api_base, token, timeout)?,
        })
    }

    async fn dispatch(&self, tool: RepoTool, arguments: Value) -> Result<String> {
        match tool {
            RepoTool::GetFileContent => {
                let args: GetFileContentArgs = parse_args(tool, arguments)?;
                let file = self
                    .client
                    .get_file_content(&args.owner, &args.repo, &args.path, &args.git_ref)
                    .await?;
                Ok(json!({"content": file.content, "sha": file.sha, "path": file.path}).to_string())
            }
            RepoTool::CreateBranch => {
                let args: CreateBranchArgs = parse_args(tool, arguments)?;
                let sha = self
                    .client
                    .create_branch(&args.owner, &args.repo, &args.new_branch, &args.source_branch)
                    .await?;
                Ok(json!({
                    "message": format!("Branch '{}' created from '{}'", args.new_branch, args.source_branch),
                    "sha": sha,
                    "branch": args.new_branch,
                })
                .to_string())
            }
            RepoTool::UpdateFile => {
                let args: UpdateFileArgs = parse_args(tool, arguments)?;
                let commit_sha = self
                    .client
                    .update_file(
                        &args.owner,
                        &args.repo,
                        &args.path,
                        &args.content,
                        &args.message,
                        &args.branch,
                        &args.sha,
                    )
                    .await?;
                Ok(json!({
                    "message": format!("Updated {} on {}", args.path, args.branch),
                    "commit_sha": commit_sha,
                })
                .to_string())
            }
            RepoTool::CreateFile => {
                let args: CreateFileArgs = parse_args(tool, arguments)?;
                let commit_sha = self
                    .client
                    .create_file(
                        &args.owner,
                        &args.repo,
                        &args.path,
                        &args.content,
                        &args.message,
                        &args.branch,
                    )
                    .await?;
                Ok(json!({
                    "message": format!("Created {} on {}", args.path, args.branch),
                    "commit_sha": commit_sha,
                })
                .to_string())
            }
            RepoTool::ListCommits => {
                let args: ListCommitsArgs = parse_args(tool, arguments)?;
                let commits = self
                    .client
                    .list_commits(&args.owner, &args.repo, &args.branch, args.per_page)
                    .await?;
                Ok(json!(commits).to_string())
            }
            RepoTool::CreatePullRequest => {
                let args: CreatePullRequestArgs = parse_args(tool, arguments)?;
                let pr = self
                    .client
                    .create_pull_request(
                        &args.owner,
                        &args.repo,
                        &args.title,
                        &args.head,
                        &args.base,
                        &args.body,
                    )
                    .await?;
                Ok(json!({
                    "message": format!("Pull request #{} created", pr.number),
                    "url": pr.url,
                    "number": pr.number,
                })
                .to_string())
            }
            RepoTool::GetCommitDiff => {
                let args: GetCommitDiffArgs = parse_args(tool, arguments)?;
                self.client
                    .get_commit_diff(&args.owner, &args.repo, &args.sha)
                    .await
            }
        }
    }
}

#[async_trait]
impl ToolExecutor for GithubTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        RepoTool::ALL.iter().map(RepoTool::definition).collect()
    }

    async fn invoke(&self, name: &str, arguments: Value) -> Result<String> {
        let Some(tool) = RepoTool::from_name(name) else {
            crate::metrics::tool_called("unknown", "rejected");
            return Err(SanosError::ReasoningProvider(format!("unknown tool: {name}")));
        };

        let started = Instant::now();
        let result = self.dispatch(tool, arguments).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(payload) => {
                tracing::info!(
                    tool = name,
                    idempotent = tool.is_idempotent(),
                    elapsed_ms,
                    bytes = payload.len(),
                    "tool call succeeded"
                );
                crate::metrics::tool_called(name, "ok");
            }
            Err(e) => {
                tracing::warn!(tool = name, elapsed_ms, kind = e.kind(), error = %e, "tool call failed");
                crate::metrics::tool_called(name, e.kind());
            }
        }
        result
    }
}
