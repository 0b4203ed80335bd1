mod support;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agent_chat::a2a_api::TaskState;
use agent_chat::{AgentTransport, CancelSignal, MockTransport, PollOutcome, TaskPoller};

use support::task;

fn poller(transport: &Arc<MockTransport>, max_attempts: u32) -> Arc<TaskPoller> {
    Arc::new(TaskPoller::with_budget(
        Arc::clone(transport) as Arc<dyn AgentTransport>,
        Duration::from_millis(5),
        max_attempts,
    ))
}

#[tokio::test]
async fn poll_emits_snapshots_and_settles_once() {
    let transport = Arc::new(MockTransport::new());
    transport.script_snapshot(task("t-1", "c-1", TaskState::Submitted));
    transport.script_snapshot(task("t-1", "c-1", TaskState::Working));
    transport.script_snapshot(task("t-1", "c-1", TaskState::Completed));

    let poller = poller(&transport, 50);
    let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
    let mut observed = Vec::new();
    let outcome = poller
        .poll("t-1", &cancel, &mut |snapshot| {
            observed.push(snapshot.status.state);
        })
        .await
        .unwrap();

    assert!(matches!(outcome, PollOutcome::Terminal(_)));
    assert_eq!(
        observed,
        vec![TaskState::Submitted, TaskState::Working, TaskState::Completed]
    );
}

#[tokio::test]
async fn second_poll_for_the_same_task_is_a_no_op() {
    let transport = Arc::new(MockTransport::new());
    // A single working snapshot repeats, keeping the first loop alive.
    transport.script_snapshot(task("t-1", "c-1", TaskState::Working));

    let poller = poller(&transport, 1_000);
    let cancel: CancelSignal = Arc::new(AtomicBool::new(false));

    let background = Arc::clone(&poller);
    let background_cancel = Arc::clone(&cancel);
    let first = tokio::spawn(async move {
        background
            .poll("t-1", &background_cancel, &mut |_| {})
            .await
    });

    // Wait for the first loop to claim its registration.
    let mut waited = 0;
    while !poller.is_polling("t-1") && waited < 200 {
        tokio::time::sleep(Duration::from_millis(1)).await;
        waited += 1;
    }
    assert!(poller.is_polling("t-1"));

    let second = poller.poll("t-1", &cancel, &mut |_| {}).await.unwrap();
    assert_eq!(second, PollOutcome::AlreadyPolling);

    cancel.store(true, Ordering::Release);
    let first = first.await.unwrap().unwrap();
    assert_eq!(first, PollOutcome::Cancelled);
    assert!(!poller.is_polling("t-1"));
}

#[tokio::test]
async fn attempt_ceiling_aborts_with_a_timeout() {
    let transport = Arc::new(MockTransport::new());
    transport.script_snapshot(task("t-1", "c-1", TaskState::Working));

    let poller = poller(&transport, 3);
    let cancel: CancelSignal = Arc::new(AtomicBool::new(false));
    let outcome = poller.poll("t-1", &cancel, &mut |_| {}).await.unwrap();

    assert_eq!(
        outcome,
        PollOutcome::TimedOut {
            task_id: "t-1".to_owned()
        }
    );
    assert_eq!(transport.polled_task_ids().len(), 3);
    assert!(!poller.is_polling("t-1"));
}

#[tokio::test]
async fn transport_error_releases_the_registration() {
    let transport = Arc::new(MockTransport::new());
    // No snapshot scripted: the first status query errors.
    let poller = poller(&transport, 3);
    let cancel: CancelSignal = Arc::new(AtomicBool::new(false));

    let result = poller.poll("t-9", &cancel, &mut |_| {}).await;
    assert!(result.is_err());
    assert!(!poller.is_polling("t-9"));
}
