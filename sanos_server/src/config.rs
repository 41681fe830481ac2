//! Orchestrator configuration: loaded from environment variables.

#[derive(Clone, Debug)]
pub struct SanosConfig {
    /// GitHub REST base URL.
    pub github_api_base: String,
    /// GitHub token the remediation agent's tool surface is bound to.
    pub github_token: String,
    /// Timeout for a single GitHub call.
    pub github_timeout_secs: u64,
    /// Vercel REST base URL.
    pub vercel_api_base: String,
    /// Vercel bearer token for deployment status and build events.
    pub vercel_token: String,
    /// Timeout for a single Vercel call.
    pub vercel_timeout_secs: u64,
    /// OpenAI-compatible base URL of the reasoning provider.
    pub agent_api_base: String,
    /// Reasoning provider API key.
    pub agent_api_key: String,
    /// Model identifier passed to the reasoning provider.
    pub agent_model: String,
    /// Upper bound on reasoning turns per remediation run.
    pub agent_max_turns: usize,
    /// Timeout for a single reasoning-provider round-trip.
    pub agent_timeout_secs: u64,
    /// Lines retained per app per log channel.
    pub log_buffer_lines: usize,
}

impl SanosConfig {
    pub fn from_env() -> Self {
        let github_api_base = std::env::var("SANOS_GITHUB_API")
            .unwrap_or_else(|_| "https://api.github.com".to_string());
        let github_token = std::env::var("SANOS_GITHUB_TOKEN").unwrap_or_default();
        let github_timeout_secs = std::env::var("SANOS_GITHUB_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(30);
        let vercel_api_base = std::env::var("SANOS_VERCEL_API")
            .unwrap_or_else(|_| "https://api.vercel.com".to_string());
        let vercel_token = std::env::var("VERCEL_TOKEN").unwrap_or_default();
        let vercel_timeout_secs = std::env::var("SANOS_VERCEL_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(15);
        let agent_api_base = std::env::var("SANOS_AGENT_API")
            .unwrap_or_else(|_| "https://api.dedaluslabs.ai/v1".to_string());
        let agent_api_key = std::env::var("DEDALUS_API_KEY").unwrap_or_default();
        let agent_model = std::env::var("SANOS_AGENT_MODEL")
            .unwrap_or_else(|_| "anthropic/claude-sonnet-4-20250514".to_string());
        let agent_max_turns = std::env::var("SANOS_AGENT_MAX_TURNS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(12);
        let agent_timeout_secs = std::env::var("SANOS_AGENT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(120);
        let log_buffer_lines = std::env::var("SANOS_LOG_BUFFER_LINES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(crate::services::log_store::MAX_ENTRIES);

        if github_token.is_empty() {
            tracing::warn!("SANOS_GITHUB_TOKEN not set -- remediation runs and repo lookups will fail");
        }
        if vercel_token.is_empty() {
            tracing::warn!("VERCEL_TOKEN not set -- deployment status stays at cached values");
        }
        if agent_api_key.is_empty() {
            tracing::warn!("DEDALUS_API_KEY not set -- reasoning provider calls will be rejected");
        }

        Self {
            github_api_base,
            github_token,
            github_timeout_secs,
            vercel_api_base,
            vercel_token,
            vercel_timeout_secs,
            agent_api_base,
            agent_api_key,
            agent_model,
            agent_max_turns,
            agent_timeout_secs,
            log_buffer_lines,
        }
    }
}

#[cfg(test)]
impl SanosConfig {
    /// Config pointing every outbound client at one mock server.
    pub fn for_tests(base_url: &str) -> Self {
        Self {
            github_api_base: base_url.to_string(),
            github_token: "gh-test-token".to_string(),
            github_timeout_secs: 5,
            vercel_api_base: base_url.to_string(),
            vercel_token: "vercel-test-token".to_string(),
            vercel_timeout_secs: 5,
            agent_api_base: base_url.to_string(),
            agent_api_key: "agent-test-key".to_string(),
            agent_model: "test/model".to_string(),
            agent_max_turns: 4,
            agent_timeout_secs: 5,
            log_buffer_lines: crate::services::log_store::MAX_ENTRIES,
        }
    }
}
