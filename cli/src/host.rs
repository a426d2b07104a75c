//! Host methods the script engine may call while a call is running.

use anyhow::{Context, anyhow};
use serde_json::value::RawValue;

use ferry_interop::{InvocationResult, InvocationTarget};

pub fn handle(target: &InvocationTarget, args: &RawValue) -> InvocationResult {
    tracing::debug!(%target, "Inbound call");
    if target.object_id().is_some() {
        return Err(anyhow!("the CLI lends no objects to the engine"));
    }
    match target.method() {
        "echo" => serde_json::from_str(args.get()).context("arguments are not valid JSON"),
        "log" => {
            tracing::info!(args = args.get(), "Engine log");
            Ok(serde_json::Value::Null)
        }
        other => Err(anyhow!("no host method named '{other}'")),
    }
}
