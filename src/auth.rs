use async_trait::async_trait;
use tracing::info;

use a2a_api::headers::is_header_safe;
use chat_store::{ChatStore, ChatStoreError};

/// Render-layer seam for out-of-band interrupt surfaces.
///
/// Implementations typically open a dialog or a browser tab; the orchestrator
/// only awaits the result.
#[async_trait]
pub trait InterruptUi: Send + Sync {
    /// Prompts the user for a bearer credential. `None` means dismissed.
    async fn request_credential(&self) -> Option<String>;

    /// Surfaces the payment authorization URL out of band.
    async fn open_payment_url(&self, url: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialOutcome {
    /// A valid credential was stored. The user must re-issue the send.
    Updated,
    /// The supplied credential could not travel in a header and was cleared.
    Rejected,
    /// The prompt was dismissed without input.
    Dismissed,
}

/// Handles an authentication fault: prompt, validate, store.
///
/// A credential containing non-printable or non-ASCII bytes is rejected and
/// cleared rather than transmitted. There is no auto-retry on this path.
pub async fn handle_auth_fault(
    store: &ChatStore,
    ui: &dyn InterruptUi,
) -> Result<CredentialOutcome, ChatStoreError> {
    let Some(credential) = ui.request_credential().await else {
        return Ok(CredentialOutcome::Dismissed);
    };

    let credential = credential.trim().to_owned();
    if !is_header_safe(&credential) {
        info!("rejecting credential with non-header-safe bytes");
        store.set_bearer_token(None)?;
        return Ok(CredentialOutcome::Rejected);
    }

    store.set_bearer_token(Some(credential))?;
    Ok(CredentialOutcome::Updated)
}
