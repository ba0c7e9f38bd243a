mod demo;
mod logging;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use shuttle_core::config::EngineConfig;
use shuttle_core::impls::{DepthLimit, FileStopChannel, SeenFilter, StartUrls, SuccessOnly};
use shuttle_core::liveness::LivenessRecord;
use shuttle_core::ports::StopChannel;
use shuttle_core::{EngineBuilder, EngineStats, MiddlewareChain, ShutdownHandle, StatsProbe};
use tracing::info;

use crate::demo::{SyntheticSite, extract_links};

#[derive(Parser)]
#[command(name = "shuttle")]
#[command(about = "Bounded-concurrency crawl scheduler")]
struct Cli {
    /// JSON file with engine settings; missing keys keep their defaults
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the `<pid>_stop` liveness records
    #[arg(long, global = true, value_name = "DIR")]
    shared_dir: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a synthetic in-process site and print the final stats
    Run {
        /// Worker pool capacity
        #[arg(long)]
        pool: Option<usize>,

        /// Number of pages on the synthetic site
        #[arg(long, default_value_t = 200)]
        pages: u32,

        #[arg(long, default_value_t = 16)]
        max_depth: u32,

        /// Simulated fetch latency in milliseconds
        #[arg(long, default_value_t = 20)]
        latency_ms: u64,

        /// Every n-th page answers 500
        #[arg(long)]
        fail_every: Option<u32>,

        /// Exit once nothing has been queued or running for this long
        #[arg(long, default_value_t = 500)]
        idle_exit_ms: u64,
    },
    /// Ask the process with this pid to stop admitting work
    Stop { pid: u32 },
    /// Show the liveness record of a process
    Status { pid: u32 },
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.shared_dir {
        config.shared_dir = dir;
    }

    match cli.command {
        Command::Run {
            pool,
            pages,
            max_depth,
            latency_ms,
            fail_every,
            idle_exit_ms,
        } => {
            if let Some(pool) = pool {
                config.pool_capacity = pool;
            }
            let site = SyntheticSite {
                pages,
                latency: Duration::from_millis(latency_ms),
                fail_every,
            };
            let stats = run(config, site, max_depth, Duration::from_millis(idle_exit_ms)).await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Stop { pid } => {
            let channel = FileStopChannel::new(&config.shared_dir);
            channel
                .signal_stop(pid)
                .await
                .with_context(|| format!("failed to signal pid {pid}"))?;
            println!("stop requested: {}", channel.record_path(pid).display());
        }
        Command::Status { pid } => status(&FileStopChannel::new(&config.shared_dir), pid).await?,
    }
    Ok(())
}

async fn run(config: EngineConfig, site: SyntheticSite, max_depth: u32, idle_exit: Duration) -> Result<EngineStats> {
    let chain = MiddlewareChain::new()
        .with_request_stage(DepthLimit::new(max_depth))
        .with_request_stage(SeenFilter::new())
        .with_response_stage(SuccessOnly)
        .with_extraction_stage(extract_links);

    let poll = config.tick_interval();
    let engine = EngineBuilder::new(config)
        .seed_source(StartUrls::new(["/1"]))
        .fetcher(site)
        .middleware(chain)
        .build()?;
    info!(pid = engine.monitor().pid(), "to stop from another shell: shuttle stop <pid>");

    let shutdown = engine.shutdown_handle();
    let probe = engine.stats_probe();
    let running = tokio::spawn(engine.run());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        reason = watch_until_done(&probe, poll, idle_exit) => info!(reason, "shutting down"),
    }
    shutdown_and_wait(shutdown, running).await
}

/// Resolves once the stop marker was seen or the engine sat idle for
/// `idle_exit` after having done some work.
async fn watch_until_done(probe: &StatsProbe, poll: Duration, idle_exit: Duration) -> &'static str {
    let mut idle_since: Option<tokio::time::Instant> = None;
    loop {
        tokio::time::sleep(poll).await;
        let stats = probe.snapshot();
        if stats.stopped {
            return "stop marker observed";
        }
        let started = stats.dispatcher.submitted > 0;
        if !(started && stats.is_idle()) {
            idle_since = None;
            continue;
        }
        let since = *idle_since.get_or_insert_with(tokio::time::Instant::now);
        if since.elapsed() >= idle_exit {
            return "idle";
        }
    }
}

async fn shutdown_and_wait(
    shutdown: ShutdownHandle,
    running: tokio::task::JoinHandle<EngineStats>,
) -> Result<EngineStats> {
    shutdown.shutdown();
    running.await.context("engine task failed")
}

async fn status(channel: &FileStopChannel, pid: u32) -> Result<()> {
    let record = channel
        .poll(pid)
        .await
        .with_context(|| format!("failed to read {}", channel.record_path(pid).display()))?;
    match record {
        None => bail!("no liveness record for pid {pid} in {}", channel.dir().display()),
        Some(LivenessRecord::Stop) => println!("pid {pid}: stop requested"),
        Some(LivenessRecord::Heartbeat { iteration, timestamp }) => {
            let at = chrono::DateTime::from_timestamp(timestamp, 0)
                .with_context(|| format!("heartbeat timestamp {timestamp} is out of range"))?;
            let age = chrono::Utc::now().signed_duration_since(at);
            println!(
                "pid {pid}: iteration {iteration}, last heartbeat {} ({}s ago)",
                at.to_rfc3339(),
                age.num_seconds()
            );
        }
    }
    Ok(())
}
