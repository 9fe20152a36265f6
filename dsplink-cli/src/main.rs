//! dsplink: entry point.
//!
//! ```text
//! dsplink ports                     List serial ports
//! dsplink --port COM3 ping          Probe a target
//! dsplink ls /presets               List remote storage
//! dsplink put take.wav /take.wav    Copy a file to the target
//! dsplink --config <path> ...       Load a custom config TOML
//! dsplink --gen-config              Write default config to stdout
//! dsplink --dry-run <command>       Run against a simulated target
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use dsplink_cli::commands::{self, Command};
use dsplink_core::{FakeDevice, FakeTransport, Link, LinkConfig, SerialTransport};

// ── CLI ──────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "dsplink", version, about = "Host tool for DSP targets on a serial link")]
struct Cli {
    /// Path to configuration TOML file.
    #[arg(short, long, default_value = "dsplink.toml")]
    config: PathBuf,

    /// Serial port; overrides the config file.
    #[arg(short, long)]
    port: Option<String>,

    /// Talk to a simulated target instead of a serial port.
    #[arg(long)]
    dry_run: bool,

    /// Print the default configuration to stdout and exit.
    #[arg(long)]
    gen_config: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

// ── Main ─────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // --gen-config: dump defaults and exit.
    if cli.gen_config {
        println!("{}", LinkConfig::default_toml()?);
        return Ok(());
    }

    // Load config.
    let mut config = LinkConfig::load(&cli.config);
    if let Some(port) = cli.port {
        config.transport.port = port;
    }

    // Init tracing.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let Some(command) = cli.command else {
        eprintln!("no command given; see --help");
        std::process::exit(2);
    };

    if !command.needs_link() {
        commands::run_offline(&command);
        return Ok(());
    }

    let link = if cli.dry_run {
        if config.transport.port.is_empty() {
            config.transport.port = "sim0".into();
        }
        Link::new(FakeTransport::new(demo_target()), config)
    } else {
        let transport = SerialTransport::new(config.transport.baud_rate, config.read_timeout());
        Link::new(transport, config)
    };

    info!("dsplink v{}", env!("CARGO_PKG_VERSION"));
    link.connect()?;
    let result = commands::run(&link, &command);
    link.disconnect();
    result?;

    Ok(())
}

/// Simulated target with a little content to browse.
fn demo_target() -> FakeDevice {
    let device = FakeDevice::new();
    device.add_directory("/presets");
    device.add_directory("/loops");
    device.add_file("/presets/init.json", br#"{"gain":0.5}"#, None);
    device.add_file("/loops/break.wav", &[0; 4096], None);
    device.poke(0x2001_1000, b"DSPLINK demo patch");
    device
}
