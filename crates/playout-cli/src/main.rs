// crates/playout-cli/src/main.rs
//
// The channel process: load config + a static playlist, enqueue every block
// up front (scheduling itself is external per SPEC_FULL.md §1 — there is no
// control-plane wire protocol to implement), run the tick loop on its own
// thread against a real `playout-sink-ts` MPEG-TS sink, and serve the
// metrics snapshot over a blocking TCP responder on the main thread.

mod config;
mod metrics_server;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use config::{ChannelConfig, Playlist};
use playout_engine::{BlockPlanSessionContext, DeterministicWaitStrategy, PipelineManager, RealtimeWaitStrategy, SystemTimeSource, TimeSource};
use playout_sink_ts::MpegTsSink;

#[derive(Parser, Debug)]
#[command(name = "playout", version, about = "Continuous-output channel playout engine")]
struct Cli {
    /// Path to the channel's YAML config.
    #[arg(long, env = "PLAYOUT_CONFIG")]
    config: PathBuf,

    /// Path to the YAML playlist enqueued at startup.
    #[arg(long, env = "PLAYOUT_PLAYLIST")]
    playlist: PathBuf,

    /// Override the config file's metrics port.
    #[arg(long, env = "PLAYOUT_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Run for a bounded number of ticks instead of forever (deterministic,
    /// no real sleeping) — useful for smoke-testing a channel's config.
    #[arg(long)]
    max_ticks: Option<i64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut config = ChannelConfig::load(&cli.config)?;
    if let Some(port) = cli.metrics_port {
        config.metrics_port = port;
    }
    let playlist = Playlist::load(&cli.playlist)?;

    log::info!(
        "starting channel '{}' {}x{} @ {}/{} fps -> {}",
        config.channel_id,
        config.width,
        config.height,
        config.fps.num,
        config.fps.den,
        config.sink_path,
    );

    let ctx = Arc::new(BlockPlanSessionContext::new(
        config.channel_id.clone(),
        config.width,
        config.height,
        config.fps,
    ));

    let now_utc_ms = SystemTimeSource.now_utc_ms();
    for block in playlist.blocks {
        let block_id = block.block_id.clone();
        if let Err(e) = ctx.enqueue_block(block, now_utc_ms) {
            log::warn!("playlist block '{block_id}' rejected: {e} ({})", e.tag());
        }
    }

    let sink = Box::new(MpegTsSink::new(
        PathBuf::from(&config.sink_path),
        config.width,
        config.height,
        config.fps,
        config.sample_rate,
        config.channels,
        config.bitrate_bps,
        config.gop_size,
    ));

    if cli.max_ticks.is_some() {
        run_bounded(ctx, config, sink, cli.max_ticks)
    } else {
        run_realtime(ctx, config, sink)
    }
}

fn run_realtime(ctx: Arc<BlockPlanSessionContext>, config: ChannelConfig, sink: Box<MpegTsSink>) -> anyhow::Result<()> {
    let mut manager = PipelineManager::new(ctx.clone(), SystemTimeSource, RealtimeWaitStrategy, sink, config.sample_rate, config.channels);
    let metrics = manager.metrics_handle();

    let stop_ctx = ctx.clone();
    ctrlc_handler(stop_ctx);

    let engine = std::thread::Builder::new()
        .name("playout-tick".into())
        .spawn(move || manager.run(None))
        .map_err(|e| anyhow::anyhow!("spawn tick thread: {e}"))?;

    metrics_server::serve(config.metrics_port, metrics)?;
    let _ = engine.join();
    Ok(())
}

fn run_bounded(ctx: Arc<BlockPlanSessionContext>, config: ChannelConfig, sink: Box<MpegTsSink>, max_ticks: Option<i64>) -> anyhow::Result<()> {
    let mut manager = PipelineManager::new(ctx, SystemTimeSource, DeterministicWaitStrategy::new(), sink, config.sample_rate, config.channels);
    manager.run(max_ticks);
    print!("{}", manager.generate_metrics_text());
    Ok(())
}

/// Installs a best-effort Ctrl-C handler so an interactive run stops the
/// engine cleanly instead of leaving an unflushed output file.
fn ctrlc_handler(ctx: Arc<BlockPlanSessionContext>) {
    // No signal-handling crate in this workspace's dependency stack; a
    // dedicated thread blocked on stdin EOF gives the same "stop on ^D"
    // behavior without adding one.
    std::thread::spawn(move || {
        let mut buf = String::new();
        let _ = std::io::stdin().read_line(&mut buf);
        ctx.request_stop();
    });
}
