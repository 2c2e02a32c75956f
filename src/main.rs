//! Headless streaming harness: stands in for the renderer, driving the
//! session at a fixed render-tick interval and logging latency reports.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use color_eyre::Result;
use tracing::info;

use panostream::gpu::GpuContext;
use panostream::session::StreamingSession;
use panostream::{utils, Config};

/// Render-tick interval the harness simulates (~120 Hz headset refresh).
const TICK: Duration = Duration::from_millis(8);

fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter("panostream=debug")
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("panostream launching...");

    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let run_secs: u64 = args.next().as_deref().map_or(Ok(10), str::parse)?;

    let mut config = Config::load(config_path.as_deref())?;
    info!("Streaming config: {:?}", config);

    // Fall back to probing the frame directory when the configured codec
    // has no sequence on disk.
    let probe = config
        .stream
        .directory
        .join(format!("{}000{}", config.stream.base, config.stream.codec.extension()));
    if !probe.exists() {
        config.stream.codec = utils::detect_codec(&config.stream.directory, &config.stream.base)?;
    }

    let gpu = GpuContext::new()?;
    let mut session = StreamingSession::new(&gpu, &config)?;

    let deadline = Instant::now() + Duration::from_secs(run_secs);
    while Instant::now() < deadline {
        let _view = session.tick(&gpu, Instant::now());
        std::thread::sleep(TICK);
    }

    session.final_report();
    info!(
        frames = session.advances(),
        "panostream shutting down"
    );
    Ok(())
}
