//! GitHub REST client: repository contents, refs, commits and pulls.
//!
//! Every non-2xx response is translated into `SanosError::Remote` carrying
//! the status and GitHub's `message` field (or the raw body).

use std::time::Duration;

use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SanosError};

/// Longest commit diff handed back to the agent, in characters.
pub const MAX_DIFF_CHARS: usize = 15_000;
pub const DIFF_TRUNCATION_MARKER: &str = "\n... [truncated]";

const DIFF_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Serialize)]
pub struct FileContent {
    pub content: String,
    pub sha: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitSummary {
    pub sha: String,
    pub message: String,
    pub author: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PullRequestRef {
    pub number: u64,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoDetails {
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub permissions: Option<serde_json::Value>,
}

/// GitHub client bound to one token.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(api_base: &str, token: &str, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("sanos-remediation-agent"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));
        headers.insert("x-github-api-version", HeaderValue::from_static("2022-11-28"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", token.trim()))
            .map_err(|_| SanosError::InvalidInput("GitHub token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| SanosError::Transport(format!("failed to build GitHub client: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn repo_url(&self, owner: &str, repo: &str, rest: &str) -> String {
        format!("{}/repos/{owner}/{repo}{rest}", self.api_base)
    }

    /// Read a file; content comes back base64-decoded.
    pub async fn get_file_content(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<FileContent> {
        #[derive(Deserialize)]
        struct Contents {
            content: String,
            sha: String,
            path: String,
        }

        let url = self.repo_url(owner, repo, &format!("/contents/{path}"));
        let data: Contents = send_json(self.http.get(url).query(&[("ref", git_ref)])).await?;

        let packed: String = data.content.split_whitespace().collect();
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(packed)
            .map_err(|e| SanosError::Remote {
                status: 200,
                message: format!("undecodable file content for {path}: {e}"),
            })?;

        Ok(FileContent {
            content: String::from_utf8_lossy(&bytes).into_owned(),
            sha: data.sha,
            path: data.path,
        })
    }

    /// Create `new_branch` from the head of `source_branch`; returns the base commit sha.
    pub async fn create_branch(
        &self,
        owner: &str,
        repo: &str,
        new_branch: &str,
        source_branch: &str,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct GitRef {
            object: GitObject,
        }
        #[derive(Deserialize)]
        struct GitObject {
            sha: String,
        }

        let url = self.repo_url(owner, repo, &format!("/git/ref/heads/{source_branch}"));
        let source: GitRef = send_json(self.http.get(url)).await?;
        let sha = source.object.sha;

        let url = self.repo_url(owner, repo, "/git/refs");
        let body = serde_json::json!({
            "ref": format!("refs/heads/{new_branch}"),
            "sha": sha,
        });
        let _: serde_json::Value = send_json(self.http.post(url).json(&body)).await?;

        Ok(sha)
    }

    /// Update an existing file. `sha` must be the blob sha from a fresh read.
    #[allow(clippy::too_many_arguments)]
    pub async fn update_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
        sha: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
            "sha": sha,
            "branch": branch,
        });
        self.put_contents(owner, repo, path, body).await
    }

    /// Create a new file; GitHub rejects the call if the path exists.
    pub async fn create_file(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        branch: &str,
    ) -> Result<String> {
        let body = serde_json::json!({
            "message": message,
            "content": base64::engine::general_purpose::STANDARD.encode(content.as_bytes()),
            "branch": branch,
        });
        self.put_contents(owner, repo, path, body).await
    }

    async fn put_contents(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<String> {
        #[derive(Deserialize)]
        struct ContentsWrite {
            commit: CommitRef,
        }
        #[derive(Deserialize)]
        struct CommitRef {
            sha: String,
        }

        let url = self.repo_url(owner, repo, &format!("/contents/{path}"));
        let written: ContentsWrite = send_json(self.http.put(url).json(&body)).await?;
        Ok(written.commit.sha)
    }

    /// Newest-first commits on `branch`.
    pub async fn list_commits(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        per_page: u32,
    ) -> Result<Vec<CommitSummary>> {
        #[derive(Deserialize)]
        struct CommitItem {
            sha: String,
            commit: CommitDetail,
        }
        #[derive(Deserialize)]
        struct CommitDetail {
            message: String,
            author: Option<CommitAuthor>,
        }
        #[derive(Deserialize)]
        struct CommitAuthor {
            name: String,
        }

        let url = self.repo_url(owner, repo, "/commits");
        let per_page = per_page.to_string();
        let items: Vec<CommitItem> = send_json(
            self.http
                .get(url)
                .query(&[("sha", branch), ("per_page", per_page.as_str())]),
        )
        .await?;

        Ok(items
            .into_iter()
            .map(|item| CommitSummary {
                sha: item.sha.chars().take(7).collect(),
                message: item.commit.message,
                author: item.commit.author.map(|a| a.name).unwrap_or_default(),
            })
            .collect())
    }

    pub async fn create_pull_request(
        &self,
        owner: &str,
        repo: &str,
        title: &str,
        head: &str,
        base: &str,
        body: &str,
    ) -> Result<PullRequestRef> {
        #[derive(Deserialize)]
        struct Pull {
            number: u64,
            html_url: String,
        }

        let url = self.repo_url(owner, repo, "/pulls");
        let payload = serde_json::json!({
            "title": title,
            "head": head,
            "base": base,
            "body": body,
        });
        let pull: Pull = send_json(self.http.post(url).json(&payload)).await?;
        Ok(PullRequestRef {
            number: pull.number,
            url: pull.html_url,
        })
    }

    /// Unified diff of one commit, truncated to [`MAX_DIFF_CHARS`].
    pub async fn get_commit_diff(&self, owner: &str, repo: &str, sha: &str) -> Result<String> {
        let url = self.repo_url(owner, repo, &format!("/commits/{sha}"));
        let diff = send_text(
            self.http
                .get(url)
                .header(ACCEPT, "application/vnd.github.v3.diff")
                .timeout(DIFF_TIMEOUT),
        )
        .await?;
        Ok(truncate_diff(diff))
    }

    pub async fn repo_details(&self, owner: &str, repo: &str) -> Result<RepoDetails> {
        send_json(self.http.get(self.repo_url(owner, repo, ""))).await
    }
}

async fn send_text(request: RequestBuilder) -> Result<String> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(SanosError::remote(status.as_u16(), &body));
    }
    Ok(body)
}

async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(SanosError::remote(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| SanosError::Remote {
        status: status.as_u16(),
        message: format!("unexpected response body: {e}"),
    })
}

fn truncate_diff(diff: String) -> String {
    match diff.char_indices().nth(MAX_DIFF_CHARS) {
        Some((cut, _)) => format!("{}{DIFF_TRUNCATION_MARKER}", &diff[..cut]),
        None => diff,
    }
}
