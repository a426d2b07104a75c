//! Host objects lent to the engine and called back by id

use std::sync::Mutex;

use ferry_interop::{
    CallOptions, InvocationInfo, InvocationTarget, ObjectRefToken, ObjectTableError,
};

use crate::common::dispatcher;

#[derive(Default)]
struct Counter {
    hits: Mutex<u32>,
}

impl Counter {
    fn hit(&self) -> u32 {
        let mut hits = self.hits.lock().unwrap();
        *hits += 1;
        *hits
    }
}

#[tokio::test]
async fn engine_calls_back_into_a_lent_object() {
    let (dispatcher, transport) = dispatcher();
    let counter = dispatcher.track(Counter::default());

    let _pending = dispatcher.invoke::<(), _>("subscribe", &(&counter,), CallOptions::new());
    let sent = transport.calls();
    assert_eq!(sent[0].args, serde_json::json!([{ "__hostObject": 1 }]));

    // The engine hands the sentinel back as the target of an inbound call.
    let token: ObjectRefToken = serde_json::from_value(sent[0].args[0].clone()).unwrap();
    let info = InvocationInfo::new(
        Some("c1".to_string()),
        InvocationTarget::instance_method(token.id(), "Hit"),
    );
    let target = info.target().object_id().unwrap();
    let object = dispatcher.objects().find_as::<Counter>(target).unwrap();
    let hits = object.hit();
    dispatcher
        .complete_inbound(&info, Ok(serde_json::json!(hits)))
        .unwrap();

    let completions = transport.completions();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].call_id, "c1");
    assert!(completions[0].success);
    assert_eq!(completions[0].result, serde_json::json!(1));
    assert_eq!(*counter.value().hits.lock().unwrap(), 1);
}

#[tokio::test]
async fn disposed_object_is_unreachable_by_id() {
    let (dispatcher, _transport) = dispatcher();
    let counter = dispatcher.track(Counter::default());
    let id = counter.id();

    counter.dispose().unwrap();

    let token: ObjectRefToken =
        serde_json::from_value(serde_json::json!({ "__hostObject": id.value() })).unwrap();
    assert_eq!(
        token.resolve(dispatcher.objects()).unwrap_err(),
        ObjectTableError::NotFound(id)
    );
    assert!(dispatcher.objects().is_empty());
}

#[tokio::test]
async fn unknown_inbound_target_is_reported_sanitized() {
    let (dispatcher, transport) = dispatcher();
    let info = InvocationInfo::new(
        Some("c9".to_string()),
        InvocationTarget::static_method("Tools", "Missing"),
    );

    let error = anyhow::anyhow!("no such method");
    dispatcher.complete_inbound(&info, Err(error)).unwrap();

    let completion = &transport.completions()[0];
    assert!(!completion.success);
    assert_eq!(
        completion.result,
        serde_json::json!(
            "An error ocurred while invoking '[Tools]::Missing'. Swapping to 'Development' \
             environment will display more detailed information about the error that occurred."
        )
    );
}
