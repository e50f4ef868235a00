//! blender-navcap daemon
//!
//! Grabs a keyboard and a mouse and remaps capslock + mouse buttons for
//! Blender navigation.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use navcap_config::DEFAULT_CONFIG_PATH;
use navcap_daemon::{Session, SessionEnd, Settings};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "navcapd")]
#[command(about = "Capslock + mouse button remapping for Blender navigation")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Keyboard device name or /dev/input path
    #[arg(long, env = "BLENDER_NAVCAP_KEYBOARD")]
    keyboard: Option<String>,

    /// Mouse device name or /dev/input path
    #[arg(long, env = "BLENDER_NAVCAP_MOUSE")]
    mouse: Option<String>,

    /// Pick devices from a list on the terminal
    #[arg(short, long)]
    interactive: bool,

    /// Do not copy MOUSE_DPI to the virtual mouse
    #[arg(long)]
    no_dpi_sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&args.config).into_owned().into();

    let config = navcap_config::load_config(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;

    // RUST_LOG wins over the configured level
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.global.log_level.as_filter())),
        )
        .init();

    tracing::info!("Using configuration {}", config_path.display());

    let mut settings = Settings::from_config(&config);
    settings.override_devices(args.keyboard, args.mouse);
    settings.interactive = args.interactive;
    if args.no_dpi_sync {
        settings.dpi_sync = false;
    }

    let session = Session::setup(&settings).await?;

    match session.run().await? {
        SessionEnd::Aborted => tracing::info!("Aborted"),
        SessionEnd::Shutdown => tracing::info!("Stopped"),
        SessionEnd::Failed(e) => return Err(e).context("Input device failed"),
    }

    Ok(())
}
