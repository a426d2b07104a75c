//! Engine-side objects over a framed connection

use std::time::Duration;

use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex, split};

use ferry_interop::frame::{FrameReader, FrameWriter};
use ferry_interop::{
    CallError, CallOptions, EngineConfig, InteropConfig, PeerConnection, RELEASE_REMOTE_OBJECT,
    RemoteObject, RemoteObjectId, ScriptPeer,
};

struct Engine {
    reader: FrameReader<ReadHalf<DuplexStream>>,
    writer: FrameWriter<WriteHalf<DuplexStream>>,
}

impl Engine {
    async fn next(&mut self) -> serde_json::Value {
        let body = self.reader.read_frame().await.unwrap().unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn complete(&mut self, call: &serde_json::Value, payload: serde_json::Value) {
        let frame = serde_json::json!({
            "type": "complete",
            "handle": call["handle"],
            "succeeded": true,
            "payload": payload
        });
        self.writer
            .write_frame(&serde_json::to_vec(&frame).unwrap())
            .await
            .unwrap();
    }
}

fn connect(config: &InteropConfig) -> (PeerConnection, Engine) {
    let (host, engine) = duplex(64 * 1024);
    let (host_read, host_write) = split(host);
    let (engine_read, engine_write) = split(engine);
    let (connection, _events) = PeerConnection::open("suite", host_read, host_write, config);
    let engine = Engine {
        reader: FrameReader::new(engine_read),
        writer: FrameWriter::new(engine_write),
    };
    (connection, engine)
}

#[tokio::test]
async fn remote_object_is_targeted_and_released() {
    let (connection, mut engine) = connect(&InteropConfig::default());
    let dispatcher = connection.dispatcher().clone();

    let create = dispatcher.invoke::<RemoteObject, _>("createChart", &("bar",), CallOptions::new());
    let call = engine.next().await;
    engine
        .complete(&call, serde_json::json!({ "__remoteObject": 4 }))
        .await;
    let chart = create.await.unwrap();
    assert_eq!(chart.id(), RemoteObjectId::new(4));

    let resize = chart.invoke::<bool, _>(&dispatcher, "resize", &(640, 480), CallOptions::new());
    let call = engine.next().await;
    assert_eq!(call["identifier"], "resize");
    assert_eq!(call["targetInstanceId"], 4);
    assert_eq!(call["args"], serde_json::json!([640, 480]));
    engine.complete(&call, serde_json::json!(true)).await;
    assert!(resize.await.unwrap());

    let release = chart.release(&dispatcher);
    let call = engine.next().await;
    assert_eq!(call["identifier"], RELEASE_REMOTE_OBJECT);
    assert_eq!(call["args"], serde_json::json!([4]));
    assert!(call.get("targetInstanceId").is_none());
    engine.complete(&call, serde_json::Value::Null).await;
    release.await.unwrap();
}

#[tokio::test]
async fn configured_default_timeout_applies_to_peer_calls() {
    let config = InteropConfig {
        default_timeout_ms: Some(20),
        detailed_errors: false,
    };
    let (connection, mut engine) = connect(&config);

    let call = connection
        .dispatcher()
        .invoke::<(), _>("neverAnswered", &(), CallOptions::new());
    let _frame = engine.next().await;

    let err = tokio::time::timeout(Duration::from_secs(5), call)
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, CallError::Canceled(_)));
}

#[tokio::test]
async fn spawning_a_missing_engine_fails() {
    let engine = EngineConfig {
        command: "ferry-engine-that-does-not-exist".to_string(),
        args: Vec::new(),
    };
    let err = ScriptPeer::spawn("missing", &engine, &InteropConfig::default())
        .err()
        .unwrap();
    assert!(err.to_string().contains("not found in PATH"));
}
