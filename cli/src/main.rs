//! Ferry CLI - runs one call against the configured script engine.
//!
//! ```text
//! ferry <identifier> [json-args]
//! ```
//!
//! The engine named in `[engine]` of `~/.ferry/config.toml` is spawned, the
//! call is issued with `json-args` as its positional arguments (default `[]`),
//! and the decoded result is printed as JSON. Calls the engine makes back into
//! the host while the call runs are served by [`host::handle`]. Ctrl-C cancels
//! the outstanding call.

mod config;
mod host;

use anyhow::{Context, Result, bail};
use std::{
    env,
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::Mutex,
};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ferry_interop::{CallOptions, CancellationToken, PeerEvent, ScriptPeer};

use crate::config::FerryConfig;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_ferry_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Stdout carries the call result; never log there.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_ferry_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let candidates = ferry_log_file_candidates();
    let mut warnings = Vec::new();

    for candidate in candidates {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn ferry_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.ferry/logs/ferry.log
    if let Some(home) = dirs::home_dir() {
        candidates.push(home.join(".ferry").join("logs").join("ferry.log"));
    }

    // Fallback: ./.ferry/logs/ferry.log
    candidates.push(PathBuf::from(".ferry").join("logs").join("ferry.log"));

    candidates
}

struct Invocation {
    identifier: String,
    args: serde_json::Value,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Invocation> {
    let Some(identifier) = args.next() else {
        bail!("usage: ferry <identifier> [json-args]");
    };
    let args = match args.next() {
        Some(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("arguments for '{identifier}' are not valid JSON"))?,
        None => serde_json::Value::Array(Vec::new()),
    };
    Ok(Invocation { identifier, args })
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let invocation = parse_args(env::args().skip(1))?;

    let config = FerryConfig::load()?.unwrap_or_default();
    let Some(engine) = config.engine.as_ref() else {
        let path = FerryConfig::path().map_or_else(
            || "~/.ferry/config.toml".to_string(),
            |p| p.display().to_string(),
        );
        bail!("no [engine] configured in {path}");
    };

    let (peer, mut events) = ScriptPeer::spawn("engine", engine, &config.interop())?;

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, canceling call");
            ctrl_c_token.cancel();
        }
    });

    let mut call = peer.dispatcher().invoke::<serde_json::Value, _>(
        &invocation.identifier,
        &invocation.args,
        CallOptions::new().with_cancellation(cancel),
    );

    let outcome = loop {
        tokio::select! {
            result = &mut call => break result,
            Some(event) = events.recv() => match event {
                PeerEvent::Invocation { info, args } => {
                    let result = host::handle(info.target(), &args);
                    if let Err(e) = peer.dispatcher().complete_inbound(&info, result) {
                        tracing::warn!("Failed to report inbound call result: {e}");
                    }
                }
                PeerEvent::Stopped { reason } => {
                    tracing::info!(?reason, "Engine stopped");
                }
            },
        }
    };

    peer.shutdown().await;

    let value = outcome.with_context(|| format!("call to '{}' failed", invocation.identifier))?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
