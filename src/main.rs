//! lamco-encode - drive an encode session from the command line
//!
//! Generates a moving test pattern, feeds it through an encode session and
//! optionally writes the resulting elementary stream to a file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lamco_encode_session::config::{Config, LoggingConfig};
use lamco_encode_session::encoder::{create_device_context, SessionStats};
use lamco_encode_session::pipeline::EncodeSession;
use lamco_encode_session::video::Frame;

/// Time allowed for the device to drain after the last frame
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line arguments for lamco-encode
#[derive(Parser, Debug)]
#[command(name = "lamco-encode")]
#[command(version, about = "Encode a test pattern through an encode session", long_about = None)]
struct Args {
    /// Configuration file path (defaults are used if missing)
    #[arg(short, long, default_value = "encode.toml")]
    config: String,

    /// Number of frames to encode
    #[arg(short = 'n', long, default_value = "300")]
    frames: u64,

    /// Frame width (overrides config)
    #[arg(long)]
    width: Option<u32>,

    /// Frame height (overrides config)
    #[arg(long)]
    height: Option<u32>,

    /// Frames per second (overrides config)
    #[arg(long, env = "LAMCO_ENCODE_FPS")]
    fps: Option<u32>,

    /// Write extra data and packets to this file
    #[arg(short, long)]
    output: Option<String>,

    /// Submit as fast as possible instead of at the frame rate
    #[arg(long)]
    fast: bool,

    /// Print statistics as JSON
    #[arg(long)]
    stats_json: bool,

    /// Verbose logging (can be specified multiple times)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (json|pretty|compact)
    #[arg(long, default_value = "pretty")]
    log_format: String,

    /// Write logs to file (in addition to stdout)
    #[arg(long)]
    log_file: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Config first: it carries the log level and log directory
    let (config, load_error) = match Config::load(&args.config) {
        Ok(config) => (config, None),
        Err(e) => (Config::default_config()?, Some(e)),
    };

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&args, &config.logging)?;

    info!("════════════════════════════════════════════════════════");
    info!("  lamco-encode v{}", env!("CARGO_PKG_VERSION"));
    info!("  Built: {} {}", env!("BUILD_DATE"), env!("BUILD_TIME"));
    info!("  Commit: {}", env!("GIT_HASH"));
    info!("  Profile: {}", if cfg!(debug_assertions) { "debug" } else { "release" });
    info!("════════════════════════════════════════════════════════");

    if let Some(e) = load_error {
        warn!("Failed to load config: {:#}, using defaults", e);
    }
    let config = config.with_overrides(args.width, args.height, args.fps);
    if let Err(e) = config.validate() {
        eprintln!("{}", lamco_encode_session::utils::format_user_error(&e));
        return Err(e);
    }

    info!("Configuration loaded successfully");
    debug!("Config: {:?}", config);

    let interrupted = Arc::new(AtomicBool::new(false));
    let host = {
        let interrupted = Arc::clone(&interrupted);
        let frames = args.frames;
        let output = args.output.clone();
        let fast = args.fast;
        tokio::task::spawn_blocking(move || run_host(config, frames, output, fast, &interrupted))
    };
    tokio::pin!(host);

    let result = tokio::select! {
        joined = &mut host => joined,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received, stopping");
            interrupted.store(true, Ordering::Release);
            host.await
        }
    };

    let stats = match result.context("Host loop panicked")? {
        Ok(stats) => stats,
        Err(e) => {
            eprintln!("{}", lamco_encode_session::utils::format_user_error(&e));
            return Err(e);
        }
    };

    if args.stats_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", stats.summary());
    }

    Ok(())
}

/// Drive one session with the blocking host call pattern
fn run_host(
    config: Config,
    frames: u64,
    output: Option<String>,
    fast: bool,
    interrupted: &AtomicBool,
) -> Result<SessionStats> {
    let ctx = create_device_context(&config.device).context("Failed to create encoder backend")?;
    let session =
        EncodeSession::new(config.session.clone(), ctx).context("Failed to create encode session")?;
    session.start().context("Failed to start encode session")?;

    let mut sink = match &output {
        Some(path) => {
            let file =
                File::create(path).context(format!("Failed to create output file: {}", path))?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&session.get_extra_data()?)?;
            info!("Writing elementary stream to {}", path);
            Some(writer)
        }
        None => None,
    };

    let (width, height) = (config.session.width, config.session.height);
    let interval = session.frame_rate().frame_interval();
    let mut packets = 0u64;

    for index in 0..frames {
        if interrupted.load(Ordering::Acquire) {
            break;
        }
        let started = Instant::now();

        match session.submit(test_pattern(index, width, height)) {
            Ok(()) => {}
            Err(e) if e.is_recoverable() => debug!("{}", e),
            Err(e) => return Err(e).context("Encode session failed"),
        }
        packets += write_ready(&session, sink.as_mut())?;

        if !fast {
            if let Some(rest) = interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    if !interrupted.load(Ordering::Acquire) {
        session.flush().context("Failed to flush encode session")?;
        let deadline = Instant::now() + DRAIN_TIMEOUT;
        while !session.is_drained() {
            if interrupted.load(Ordering::Acquire) {
                break;
            }
            if Instant::now() >= deadline {
                warn!("Device did not drain within {:?}", DRAIN_TIMEOUT);
                break;
            }
            match write_ready(&session, sink.as_mut())? {
                0 => std::thread::sleep(interval / 4),
                n => packets += n,
            }
        }
    }

    if let Some(mut writer) = sink {
        writer.flush()?;
    }

    let stats = session.stats();
    session.stop().context("Failed to stop encode session")?;
    info!("Encoded {} packets", packets);
    Ok(stats)
}

/// Retrieve every ready packet, writing payloads to the sink
fn write_ready(session: &EncodeSession, mut sink: Option<&mut BufWriter<File>>) -> Result<u64> {
    let mut n = 0;
    while let Some(packet) = session.retrieve().context("Encode session failed")? {
        if let Some(writer) = sink.as_mut() {
            writer.write_all(&packet.data)?;
        }
        n += 1;
    }
    Ok(n)
}

/// Moving diagonal gradient in BGRA
fn test_pattern(index: u64, width: u32, height: u32) -> Frame {
    let (w, h) = (width as usize, height as usize);
    let shift = (index * 4) as usize;
    let mut data = Vec::with_capacity(w * h * 4);
    for y in 0..h {
        for x in 0..w {
            data.push(((x + shift) & 0xff) as u8);
            data.push(((y + shift / 2) & 0xff) as u8);
            data.push((((x + y) / 2 + shift) & 0xff) as u8);
            data.push(0xff);
        }
    }
    Frame::bgra(index, width, height, data)
}

fn init_logging(args: &Args, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let log_level = match args.verbose {
        0 => logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!(
            "lamco_encode_session={level},lamco_encode={level},warn",
            level = log_level
        ))
    });

    // --log-file wins over [logging] log_dir
    let file_sink = if let Some(path) = &args.log_file {
        let file = File::create(path).context(format!("Failed to create log file: {}", path))?;
        Some((tracing_appender::non_blocking(file), path.clone()))
    } else if let Some(dir) = &logging.log_dir {
        std::fs::create_dir_all(dir)
            .context(format!("Failed to create log directory: {}", dir.display()))?;
        let appender = tracing_appender::rolling::daily(dir, "lamco-encode.log");
        Some((
            tracing_appender::non_blocking(appender),
            dir.join("lamco-encode.log.<date>").display().to_string(),
        ))
    } else {
        None
    };

    // If a log file is configured, write to both stdout and file
    if let Some(((writer, guard), location)) = file_sink {
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .json()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .compact()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(
                        tracing_subscriber::fmt::layer()
                            .pretty()
                            .with_writer(std::io::stdout),
                    )
                    .with(
                        tracing_subscriber::fmt::layer()
                            .with_writer(writer)
                            .with_ansi(false),
                    )
                    .init();
            }
        }
        info!("Logging to file: {}", location);
        Ok(Some(guard))
    } else {
        // Stdout only
        match args.log_format.as_str() {
            "json" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().json())
                    .init();
            }
            "compact" => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().compact())
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(env_filter)
                    .with(tracing_subscriber::fmt::layer().pretty())
                    .init();
            }
        }
        Ok(None)
    }
}
