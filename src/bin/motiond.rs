//! motiond - motion sensor notifier daemon
//!
//! This daemon:
//! 1. Reads motion events from a serial device (or stdin with --stdin)
//! 2. Captures a still when motion starts (debounced until motion ends)
//! 3. Optionally runs person detection on the still
//! 4. Pushes the still and the analysis to an ntfy topic

use anyhow::Result;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use motion_notify::{
    open_serial, ConfigOverrides, LineReader, MatchStrategy, MotionConfig, Sentry,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Capture and push a still whenever the motion sensor fires"
)]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "MOTION_CONFIG")]
    config: Option<PathBuf>,

    /// Serial device to read motion events from.
    #[arg(long)]
    device: Option<String>,

    /// Serial protocol: 'fragment' (noise tolerant) or 'exact' (EVENT: tokens).
    #[arg(long, env = "MOTION_PROTOCOL")]
    protocol: Option<String>,

    /// Read events from stdin instead of the serial device; EOF stops the daemon.
    /// Ctrl-C is only noticed after the next line arrives, so close stdin to stop
    /// an idle bench run.
    #[arg(long)]
    stdin: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let overrides = ConfigOverrides {
        device: args.device.clone(),
        protocol: args
            .protocol
            .as_deref()
            .map(MatchStrategy::from_str)
            .transpose()?,
    };
    let cfg = MotionConfig::load(args.config.as_deref(), &overrides)?;

    let mut sentry = Sentry::from_config(&cfg)?;

    log::info!("motiond {}", env!("CARGO_PKG_VERSION"));
    log::info!("protocol: {}", cfg.protocol.strategy.as_str());
    log::info!("images will be saved to {}", cfg.capture.output_dir.display());
    log::info!("ntfy topic: {}", cfg.notify.topic_url);
    log::info!(
        "analysis: {}",
        if sentry.has_analyzer() { "enabled" } else { "disabled" }
    );

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
    })
    .expect("error setting Ctrl-C handler");

    let stats = if args.stdin {
        let mut source = LineReader::new(io::stdin().lock(), "stdin");
        sentry.run(&mut source, &shutdown)?
    } else {
        let mut source = open_serial(&cfg.serial)?;
        log::info!(
            "connected to {} at {} baud",
            cfg.serial.device.display(),
            cfg.serial.baud_rate
        );
        sentry.run(&mut source, &shutdown)?
    };

    log::info!(
        "exiting: lines={} triggers={} notifications={} failures={}",
        stats.lines,
        stats.triggers,
        stats.notifications_sent,
        stats.failures
    );
    Ok(())
}
