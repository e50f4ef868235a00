//! blender-navcap CLI
//!
//! Configuration and device inspection tool for blender-navcap.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use navcap_config::DEFAULT_CONFIG_PATH;
use navcap_daemon::device::{enumerate_devices, resolve_device, DeviceInfo};
use navcap_daemon::dpi::query_mouse_dpi;

#[derive(Parser, Debug)]
#[command(name = "navcap")]
#[command(about = "Configuration and device tool for blender-navcap")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate the configuration file
    Validate {
        /// Print the effective configuration as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available input devices
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the MOUSE_DPI udev property of a device
    Dpi {
        /// Device name or /dev/input path
        device: String,
    },
}

fn main() -> miette::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();

    // Expand tilde in config path
    let config_path: PathBuf = shellexpand::tilde(&cli.config).into_owned().into();

    match cli.command {
        Commands::Validate { json } => cmd_validate(&config_path, json),
        Commands::Devices { json } => cmd_devices(json),
        Commands::Dpi { device } => cmd_dpi(&device),
    }
}

fn cmd_validate(config_path: &Path, json: bool) -> miette::Result<()> {
    let config = navcap_config::parse_config(config_path).map_err(miette::Report::new)?;

    if json {
        let out = serde_json::to_string_pretty(&config).into_diagnostic()?;
        println!("{}", out);
        return Ok(());
    }

    println!("Validating configuration: {}", config_path.display());

    println!("Configuration is valid!");
    println!("  Log level: {}", config.global.log_level.as_filter());
    println!(
        "  Keyboard: {}",
        config.devices.keyboard.as_deref().unwrap_or("<not set>")
    );
    println!(
        "  Mouse: {}",
        config.devices.mouse.as_deref().unwrap_or("<not set>")
    );
    println!(
        "  Virtual devices: '{}', '{}'",
        config.output.keyboard_name, config.output.mouse_name
    );
    println!("  Modifier delay: {}ms", config.remap.modifier_delay_ms);
    if config.global.dpi_sync {
        println!("  DPI sync: {}", config.global.dpi_rules_path.display());
    } else {
        println!("  DPI sync: off");
    }
    Ok(())
}

fn print_device(device: &DeviceInfo) {
    println!("  {} [{}]", device.name, device.kind);
    println!("    Path: {}", device.path.display());
    println!("    ID: {}", device.vendor_product());
    println!();
}

fn cmd_devices(json: bool) -> miette::Result<()> {
    let devices = enumerate_devices().map_err(|e| miette::miette!("{:#}", e))?;

    if json {
        let out = serde_json::to_string_pretty(&devices).into_diagnostic()?;
        println!("{}", out);
        return Ok(());
    }

    println!("Available input devices:\n");
    for device in &devices {
        print_device(device);
    }
    Ok(())
}

fn cmd_dpi(device: &str) -> miette::Result<()> {
    let path = resolve_device(device).map_err(|e| miette::miette!("{:#}", e))?;
    let dpi = query_mouse_dpi(&path).into_diagnostic()?;
    println!("{}: MOUSE_DPI={}", path.display(), dpi);
    Ok(())
}
