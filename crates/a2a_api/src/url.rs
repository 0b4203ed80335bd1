/// Default base URL for a local agent deployment.
pub const DEFAULT_AGENT_BASE_URL: &str = "http://localhost:8030";

/// Normalize a base URL: trim whitespace, default when empty, strip any
/// trailing slashes.
pub fn normalize_agent_url(input: &str) -> String {
    let base = if input.trim().is_empty() {
        DEFAULT_AGENT_BASE_URL
    } else {
        input.trim()
    };

    base.trim_end_matches('/').to_string()
}

/// The single JSON-RPC POST endpoint is the agent root itself.
pub fn rpc_endpoint(base: &str) -> String {
    format!("{}/", normalize_agent_url(base))
}

pub fn agent_card_url(base: &str) -> String {
    format!("{}/.well-known/agent.json", normalize_agent_url(base))
}

pub fn skills_url(base: &str) -> String {
    format!("{}/agent/skills", normalize_agent_url(base))
}

pub fn skill_url(base: &str, skill_id: &str) -> String {
    format!("{}/agent/skills/{skill_id}", normalize_agent_url(base))
}

pub fn skill_docs_url(base: &str, skill_id: &str) -> String {
    format!("{}/agent/skills/{skill_id}/docs", normalize_agent_url(base))
}

pub fn did_resolve_url(base: &str) -> String {
    format!("{}/did/resolve", normalize_agent_url(base))
}

pub fn health_url(base: &str) -> String {
    format!("{}/health", normalize_agent_url(base))
}

pub fn payment_session_url(base: &str) -> String {
    format!("{}/api/start-payment-session", normalize_agent_url(base))
}

pub fn payment_status_url(base: &str, session_id: &str) -> String {
    format!("{}/api/payment-status/{session_id}", normalize_agent_url(base))
}
