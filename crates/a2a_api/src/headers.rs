use std::collections::BTreeMap;

use crate::config::AgentApiConfig;
use crate::error::AgentApiError;

pub const HEADER_ACCEPT: &str = "accept";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_AUTHORIZATION: &str = "authorization";
pub const HEADER_PAYMENT_TOKEN: &str = "x-payment-token";
pub const HEADER_USER_AGENT: &str = "user-agent";

const DEFAULT_USER_AGENT: &str = concat!("agent-chat/", env!("CARGO_PKG_VERSION"));

/// Returns true when every byte of `value` can travel in an HTTP header.
///
/// Bearer credentials and payment tokens that fail this check would be
/// rejected by the header encoder, so they must never be transmitted.
#[must_use]
pub fn is_header_safe(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| (0x20..=0x7e).contains(&byte))
}

/// Build a deterministic header map for agent requests.
///
/// The current credential is attached whenever one is configured; the payment
/// token is attached only for the single call it authorizes.
pub fn build_headers(
    config: &AgentApiConfig,
    payment_token: Option<&str>,
) -> Result<BTreeMap<String, String>, AgentApiError> {
    let mut headers = BTreeMap::new();

    headers.insert(HEADER_ACCEPT.to_owned(), "application/json".to_owned());
    headers.insert(
        HEADER_CONTENT_TYPE.to_owned(),
        "application/json".to_owned(),
    );

    if let Some(token) = config.bearer_token.as_deref().map(str::trim) {
        if !token.is_empty() {
            if !is_header_safe(token) {
                return Err(AgentApiError::InvalidCredential);
            }
            headers.insert(HEADER_AUTHORIZATION.to_owned(), format!("Bearer {token}"));
        }
    }

    if let Some(token) = payment_token.map(str::trim) {
        if !token.is_empty() {
            if !is_header_safe(token) {
                return Err(AgentApiError::InvalidCredential);
            }
            headers.insert(HEADER_PAYMENT_TOKEN.to_owned(), token.to_owned());
        }
    }

    let ua = match config.user_agent.as_deref().map(str::trim) {
        Some(explicit) if !explicit.is_empty() => explicit.to_owned(),
        _ => DEFAULT_USER_AGENT.to_owned(),
    };
    headers.insert(HEADER_USER_AGENT.to_owned(), ua);

    for (key, value) in &config.extra_headers {
        headers.insert(key.trim().to_ascii_lowercase(), value.trim().to_owned());
    }

    Ok(headers)
}
