use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{info, warn};

use a2a_api::{AgentApiError, PaymentState};

use crate::auth::InterruptUi;
use crate::poller::{sleep_unless_cancelled, CancelSignal};
use crate::transport::AgentTransport;

/// Delay between payment session status checks.
pub const PAYMENT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Status-check ceiling; with the default interval this bounds the wait to
/// five minutes.
pub const PAYMENT_POLL_ATTEMPTS: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    /// The session completed; the token authorizes exactly one retry of the
    /// suspended send.
    Authorized { token: String },
    /// The session failed server-side.
    Declined,
    /// The bounded wait elapsed without completion.
    TimedOut,
    /// The cancellation signal fired while waiting.
    Cancelled,
}

/// Out-of-band payment interrupt: start a session, surface the authorization
/// URL, and wait for the session to settle.
pub struct PaymentFlow {
    transport: Arc<dyn AgentTransport>,
    interval: Duration,
    max_attempts: u32,
}

impl PaymentFlow {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self::with_budget(transport, PAYMENT_POLL_INTERVAL, PAYMENT_POLL_ATTEMPTS)
    }

    pub fn with_budget(
        transport: Arc<dyn AgentTransport>,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            transport,
            interval,
            max_attempts,
        }
    }

    /// Runs one payment interrupt. `hint` is the session-start payload the
    /// server attached to its payment fault, forwarded verbatim.
    pub async fn run(
        &self,
        hint: Option<&Value>,
        ui: &dyn InterruptUi,
        cancel: &CancelSignal,
    ) -> Result<PaymentOutcome, AgentApiError> {
        let session = self.transport.start_payment_session(hint).await?;
        info!(session_id = %session.session_id, "payment session started");
        ui.open_payment_url(&session.payment_url).await;

        for _attempt in 0..self.max_attempts {
            let status = self.transport.payment_status(&session.session_id).await?;
            match status.status {
                PaymentState::Completed => {
                    let token = status.payment_token.ok_or_else(|| {
                        AgentApiError::MalformedResponse(
                            "completed payment session without token".to_owned(),
                        )
                    })?;
                    info!(session_id = %session.session_id, "payment authorized");
                    return Ok(PaymentOutcome::Authorized { token });
                }
                PaymentState::Failed => {
                    warn!(session_id = %session.session_id, "payment session failed");
                    return Ok(PaymentOutcome::Declined);
                }
                PaymentState::Pending => {
                    if !sleep_unless_cancelled(self.interval, cancel).await {
                        return Ok(PaymentOutcome::Cancelled);
                    }
                }
            }
        }

        warn!(session_id = %session.session_id, "payment session wait elapsed");
        Ok(PaymentOutcome::TimedOut)
    }
}
