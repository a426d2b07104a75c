//! Outbound call correlation across threads

use std::collections::HashSet;
use std::time::Duration;

use ferry_interop::{CallError, CallOptions, CancellationToken, DeferredResult};

use crate::common::dispatcher;

fn payload(value: &serde_json::Value) -> DeferredResult {
    DeferredResult::from_json(value.to_string()).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_get_unique_handles() {
    let (dispatcher, transport) = dispatcher();

    let mut tasks = Vec::new();
    for i in 0..32u32 {
        let dispatcher = dispatcher.clone();
        tasks.push(tokio::spawn(async move {
            let fut = dispatcher.invoke::<u32, _>("echo", &(i,), CallOptions::new());
            drop(fut);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let handles: HashSet<_> = transport.calls().iter().map(|c| c.handle).collect();
    assert_eq!(handles.len(), 32);
    assert_eq!(dispatcher.pending_count(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn completions_from_other_threads_reach_their_callers() {
    let (dispatcher, transport) = dispatcher();

    let futures: Vec<_> = (0..16u32)
        .map(|i| dispatcher.invoke::<u32, _>("double", &(i,), CallOptions::new()))
        .collect();

    // Answer in reverse order, each from its own blocking thread.
    let calls = transport.calls();
    let mut completers = Vec::new();
    for call in calls.into_iter().rev() {
        let dispatcher = dispatcher.clone();
        completers.push(std::thread::spawn(move || {
            let input = call.args[0].as_u64().unwrap();
            let answer = serde_json::json!(input * 2);
            assert!(dispatcher.complete(call.handle, true, payload(&answer)));
        }));
    }
    for completer in completers {
        completer.join().unwrap();
    }

    for (i, fut) in futures.into_iter().enumerate() {
        assert_eq!(fut.await.unwrap(), u32::try_from(i).unwrap() * 2);
    }
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test]
async fn late_completion_after_timeout_is_dropped() {
    let (dispatcher, transport) = dispatcher();

    let result = dispatcher
        .invoke::<String, _>(
            "slow",
            &(),
            CallOptions::new().with_timeout(Duration::from_millis(10)),
        )
        .await;
    assert!(matches!(result, Err(CallError::Canceled(_))));

    let handle = transport.calls()[0].handle;
    assert!(!dispatcher.complete(handle, true, payload(&serde_json::json!("late"))));
}

#[tokio::test]
async fn one_token_cancels_many_calls() {
    let (dispatcher, _transport) = dispatcher();
    let token = CancellationToken::new();

    let first = dispatcher.invoke::<(), _>(
        "a",
        &(),
        CallOptions::new().with_cancellation(token.clone()),
    );
    let second = dispatcher.invoke::<(), _>(
        "b",
        &(),
        CallOptions::new().with_cancellation(token.clone()),
    );
    assert_eq!(dispatcher.pending_count(), 2);

    token.cancel();
    assert!(first.await.unwrap_err().is_canceled());
    assert!(second.await.unwrap_err().is_canceled());
    assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test]
async fn failure_surfaces_remote_message() {
    let (dispatcher, transport) = dispatcher();

    let fut = dispatcher.invoke::<i32, _>("explode", &(), CallOptions::new());
    let handle = transport.calls()[0].handle;
    dispatcher.complete(handle, false, payload(&serde_json::json!("boom")));

    match fut.await {
        Err(CallError::RemoteCallFailed { message, source }) => {
            assert_eq!(message, "boom");
            assert!(source.is_none());
        }
        other => panic!("unexpected result: {other:?}"),
    }
}
