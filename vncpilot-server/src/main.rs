//! vncpilot: entry point.
//!
//! ```text
//! vncpilot                      Serve tool calls on stdin/stdout
//! vncpilot --config <path>      Load a custom config TOML
//! vncpilot --macro-dir <path>   Override the macro directory
//! vncpilot --gen-config         Write default config to stdout
//! ```

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vncpilot_server::config::PilotConfig;
use vncpilot_server::server;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "vncpilot", about = "Drive a VNC desktop through JSON tool calls on stdio")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "vncpilot.toml")]
    config: PathBuf,

    /// Macro directory (overrides the config file).
    #[arg(long)]
    macro_dir: Option<PathBuf>,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,
}

// ── Main ─────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", PilotConfig::default_toml()?);
        return Ok(());
    }

    // Load config.
    let mut config = PilotConfig::load(&cli.config);
    if let Some(dir) = cli.macro_dir {
        config.macros.dir = dir.to_string_lossy().into_owned();
    }

    // Init tracing. stdout carries the protocol, so logs go to stderr
    // or the configured file.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.logging.log_file() {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            subscriber.with_ansi(false).with_writer(Mutex::new(file)).init();
        }
        None => subscriber.with_writer(std::io::stderr).init(),
    }

    info!("vncpilot v{}", env!("CARGO_PKG_VERSION"));
    info!("macro dir: {}", if config.macros.dir.is_empty() { "<unset>" } else { &config.macros.dir });
    info!("encoder: {} ({}, crf {})", config.recording.ffmpeg, config.recording.preset, config.recording.crf);

    let (handle, engine) =
        vncpilot_core::spawn(config.to_engine_config(), config.to_transport_config())?;

    tokio::select! {
        result = server::serve(handle, tokio::io::stdin(), tokio::io::stdout()) => {
            if let Err(e) = result {
                warn!("stdio error: {e}");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl-C received; shutting down");
        }
    }

    // The engine stops once the last request holding a handle finishes.
    match tokio::time::timeout(SHUTDOWN_GRACE, engine).await {
        Ok(Err(e)) => warn!("engine task failed: {e}"),
        Err(_) => warn!("engine still busy after {SHUTDOWN_GRACE:?}; exiting"),
        Ok(Ok(())) => {}
    }
    Ok(())
}
