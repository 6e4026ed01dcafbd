use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use clap::{Parser, ValueEnum};
use log::{info, warn};
use peer_session::NegotiationCore;
use peer_session::config::SessionConfig;
use peer_session::media::{VideoSource, WebRtcMediaEngine};
use peer_session::signaling::memory;

// Loopback demo: two sessions negotiate with each other over an in-memory
// signaling link, then the caller switches its video source.
//
// Usage:
//   cargo run                                   # host candidates only
//   cargo run -- --config session.json          # custom ICE servers etc.
//   cargo run -- --switch-to file --settle-ms 3000

#[derive(Debug, Parser)]
#[command(name = "peer-session", about = "Loopback negotiation demo")]
struct Args {
    /// JSON session config. Without it no STUN/TURN servers are used.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Source the caller switches to after the first exchange.
    #[arg(short, long, value_enum, default_value_t = Source::Front)]
    switch_to: Source,

    /// Time given to each exchange before moving on.
    #[arg(long, default_value_t = 1500)]
    settle_ms: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Source {
    Front,
    Back,
    File,
}

impl From<Source> for VideoSource {
    fn from(source: Source) -> Self {
        match source {
            Source::Front => VideoSource::FrontCamera,
            Source::Back => VideoSource::BackCamera,
            Source::File => VideoSource::File,
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let config = match &args.config {
        Some(path) => SessionConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => SessionConfig::local_only(),
    };

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    rt.block_on(run(args, config))
}

async fn run(args: Args, config: SessionConfig) -> anyhow::Result<()> {
    let settle = Duration::from_millis(args.settle_ms);
    let ((caller_link, caller_rx), (callee_link, callee_rx)) = memory::pair("caller", "callee");

    let caller = NegotiationCore::spawn(
        Arc::new(WebRtcMediaEngine::new(&config)),
        Arc::new(caller_link),
        config.clone(),
    );
    let callee = NegotiationCore::spawn(
        Arc::new(WebRtcMediaEngine::new(&config)),
        Arc::new(callee_link),
        config,
    );
    caller.attach_signaling(caller_rx);
    callee.attach_signaling(callee_rx);

    for (name, core) in [("caller", &caller), ("callee", &callee)] {
        let mut remote = core.subscribe_remote();
        let mut failures = core.subscribe_failures();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok(track) = remote.recv() => info!("[{}] remote track {}", name, track.id),
                    Ok(failure) = failures.recv() => warn!("[{}] {}", name, failure),
                    else => break,
                }
            }
        });
    }

    caller.start().await.context("starting caller")?;
    tokio::time::sleep(settle).await;

    callee.start().await.context("starting callee")?;
    tokio::time::sleep(settle).await;

    let switched = caller
        .switch_source(args.switch_to.into())
        .await
        .context("switching caller source")?;
    if switched {
        info!("Caller switched to {:?}, renegotiating", args.switch_to);
    } else {
        info!("Caller already on {:?}", args.switch_to);
    }
    tokio::time::sleep(settle).await;

    for (name, core) in [("caller", &caller), ("callee", &callee)] {
        let snapshot = core.snapshot().await?;
        info!("[{}] {}", name, serde_json::to_string_pretty(&snapshot)?);
    }

    caller.stop().await?;
    callee.stop().await?;
    caller.shutdown().await?;
    callee.shutdown().await?;
    Ok(())
}
