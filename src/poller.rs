use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, warn};

use a2a_api::{AgentApiError, Task};

use crate::transport::AgentTransport;

/// Shared cancellation flag for a poll loop or payment wait.
pub type CancelSignal = Arc<AtomicBool>;

/// Delay between status queries.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Attempt ceiling before a poll loop aborts with a timeout.
pub const MAX_POLL_ATTEMPTS: u32 = 300;

const CANCEL_CHECK_INTERVAL: Duration = Duration::from_millis(25);

/// Final notification of one poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The task settled in `completed`, `failed`, or `canceled`.
    Terminal(Task),
    /// The task paused in a re-entrant state and awaits another user turn.
    InputPending(Task),
    /// The attempt ceiling was reached without a settled state.
    TimedOut { task_id: String },
    /// The cancellation signal fired.
    Cancelled,
    /// A poll for this task id is already in flight; this request is a no-op.
    AlreadyPolling,
}

/// Repeatedly queries task status until a terminal or input-pending state,
/// within a bounded attempt budget.
///
/// At most one poll loop runs per task identifier; a concurrent request for
/// the same id resolves immediately instead of scheduling a duplicate timer.
pub struct TaskPoller {
    transport: Arc<dyn AgentTransport>,
    in_flight: Mutex<HashSet<String>>,
    interval: Duration,
    max_attempts: u32,
}

impl TaskPoller {
    pub fn new(transport: Arc<dyn AgentTransport>) -> Self {
        Self::with_budget(transport, POLL_INTERVAL, MAX_POLL_ATTEMPTS)
    }

    pub fn with_budget(
        transport: Arc<dyn AgentTransport>,
        interval: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            transport,
            in_flight: Mutex::new(HashSet::new()),
            interval,
            max_attempts,
        }
    }

    #[must_use]
    pub fn is_polling(&self, task_id: &str) -> bool {
        lock_unpoisoned(&self.in_flight).contains(task_id)
    }

    /// Polls `task_id`, emitting every observed snapshot through `on_update`
    /// and ending in exactly one outcome. The in-flight registration is
    /// released on every exit path, including transport errors.
    pub async fn poll(
        &self,
        task_id: &str,
        cancel: &CancelSignal,
        on_update: &mut (dyn FnMut(&Task) + Send),
    ) -> Result<PollOutcome, AgentApiError> {
        let _registration = match PollRegistration::claim(&self.in_flight, task_id) {
            Some(registration) => registration,
            None => {
                warn!(task_id, "duplicate poll request ignored");
                return Ok(PollOutcome::AlreadyPolling);
            }
        };

        let mut attempts = 0u32;
        loop {
            if cancel.load(Ordering::Acquire) {
                return Ok(PollOutcome::Cancelled);
            }

            let task = self.transport.get_task(task_id, None).await?;
            on_update(&task);

            let state = task.status.state;
            if state.is_terminal() {
                debug!(task_id, state = state.as_str(), "task settled");
                return Ok(PollOutcome::Terminal(task));
            }
            if state.is_reentrant() {
                debug!(task_id, state = state.as_str(), "task awaits user input");
                return Ok(PollOutcome::InputPending(task));
            }

            attempts += 1;
            if attempts >= self.max_attempts {
                warn!(task_id, attempts, "poll attempt ceiling reached");
                return Ok(PollOutcome::TimedOut {
                    task_id: task_id.to_owned(),
                });
            }

            if !sleep_unless_cancelled(self.interval, cancel).await {
                return Ok(PollOutcome::Cancelled);
            }
        }
    }
}

/// Sleeps for `duration`, waking early when the cancel signal fires. Returns
/// false when cancelled.
pub async fn sleep_unless_cancelled(duration: Duration, cancel: &CancelSignal) -> bool {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return true;
        }
        let step = CANCEL_CHECK_INTERVAL.min(deadline - now);
        tokio::time::sleep(step).await;
    }
}

struct PollRegistration<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    task_id: String,
}

impl<'a> PollRegistration<'a> {
    fn claim(in_flight: &'a Mutex<HashSet<String>>, task_id: &str) -> Option<Self> {
        let claimed = lock_unpoisoned(in_flight).insert(task_id.to_owned());
        claimed.then(|| Self {
            in_flight,
            task_id: task_id.to_owned(),
        })
    }
}

impl Drop for PollRegistration<'_> {
    fn drop(&mut self) {
        lock_unpoisoned(self.in_flight).remove(&self.task_id);
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
