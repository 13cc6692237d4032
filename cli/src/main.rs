//! Tether CLI - loopback demonstration of call correlation.
//!
//! Binds a host to an in-process peer that holds each batch of requests and
//! answers it backwards, so every response arrives out of issue order:
//!
//! ```text
//! main() -> Host::bind() -> host.run()      (task)
//!                        -> loopback_peer() (task)
//!        -> handle.call() x N -> print completions -> print stats
//! ```
//!
//! Usage: `tether [CONFIG.toml]`. Log level comes from `RUST_LOG`.

use std::{env, io::stderr, path::PathBuf};

use anyhow::{Context, Result};
use tether_host::{Host, HostConfig, RemoteSide, channel_pair};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const WORDS: [&str; 5] = ["alpha", "bravo", "charlie", "delta", "echo"];

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::try_new("warn").expect("warn filter is valid"));

    // Completions go to stdout; keep logs out of the way.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(stderr))
        .with(env_filter)
        .init();
}

fn load_config() -> Result<HostConfig> {
    match env::args_os().nth(1) {
        Some(path) => {
            let path = PathBuf::from(path);
            let config = HostConfig::load(&path)?;
            tracing::info!(path = %path.display(), "Loaded host config");
            Ok(config)
        }
        None => Ok(HostConfig::default()),
    }
}

/// Reply to each request with its payload reversed, one batch at a time,
/// last request first.
async fn loopback_peer(mut remote: RemoteSide<String, String>, batch: usize) -> Result<()> {
    let mut held = Vec::with_capacity(batch);
    while let Some(request) = remote.recv_request().await {
        held.push(request);
        if held.len() < batch {
            continue;
        }
        for request in held.drain(..).rev() {
            tracing::debug!(id = %request.id, "Peer answering");
            remote
                .send_response(request.map(|word| word.chars().rev().collect()))
                .await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = load_config()?;
    let (side, remote) = channel_pair::<String, String>(&config);
    let (host, handle, mut completions) = Host::<String, String, String>::bind(&config, side);

    let host_task = tokio::spawn(host.run());
    let peer_task = tokio::spawn(loopback_peer(remote, WORDS.len()));

    for word in WORDS {
        handle
            .call(word.to_string(), move |reply| format!("{word} -> {reply}"))
            .await?;
    }
    drop(handle);

    while let Some(line) = completions.recv().await {
        println!("{line}");
    }

    let stats = host_task.await.context("host task failed")?;
    peer_task.await.context("peer task failed")??;

    println!(
        "issued={} completed={} unmatched={} pending={} backlog_warnings={}",
        stats.issued, stats.completed, stats.unmatched, stats.pending, stats.backlog_warnings
    );
    Ok(())
}
