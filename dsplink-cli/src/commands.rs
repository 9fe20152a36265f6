//! Subcommands and their output formatting.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Local, NaiveDateTime};
use clap::Subcommand;
use tracing::{debug, info};

use dsplink_core::{CommandTask, ConnectionState, Link, LinkError, RemoteFileCatalogEntry};

/// How long `dfu` waits for the link to drop after the reboot request.
const DFU_GRACE: Duration = Duration::from_secs(2);

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List serial ports on this machine.
    Ports,
    /// Probe the target and print its status.
    Ping,
    /// Print the firmware version.
    Version,
    /// List a directory on the target's storage.
    Ls { dir: Option<String> },
    /// Describe one remote path.
    Info { path: String },
    /// Copy a local file to the target.
    Put { local: PathBuf, remote: String },
    /// Delete a remote file or empty directory.
    Rm { path: String },
    /// Create a remote directory.
    Mkdir { path: String },
    /// Dump target memory.
    Peek {
        #[arg(value_parser = parse_number)]
        address: u32,
        #[arg(default_value = "64", value_parser = parse_number)]
        length: u32,
    },
    /// Load a patch image into target RAM.
    Patch { image: PathBuf },
    /// Start the DSP loop.
    Start,
    /// Stop the DSP loop.
    Stop,
    /// Recall a stored preset.
    Preset { index: u16 },
    /// Send one MIDI message.
    Midi {
        #[arg(value_parser = parse_byte)]
        status: u8,
        #[arg(value_parser = parse_byte)]
        data1: u8,
        #[arg(value_parser = parse_byte)]
        data2: u8,
    },
    /// Persist the RAM patch to flash.
    Flash,
    /// Reboot the target into firmware-update mode.
    Dfu,
}

impl Command {
    /// `false` for commands that never touch the link.
    pub fn needs_link(&self) -> bool {
        !matches!(self, Command::Ports)
    }
}

/// Run a command that needs no link. Others are ignored.
pub fn run_offline(command: &Command) {
    if let Command::Ports = command {
        list_ports();
    }
}

/// Run `command` on a connected link.
pub fn run(link: &Link, command: &Command) -> Result<(), LinkError> {
    debug!(?command, "running");
    match command {
        Command::Ports => list_ports(),
        Command::Ping => {
            let status = link.ping_device()?;
            println!(
                "storage: {}  load: {}%  flags: {:?}",
                if status.storage_present { "present" } else { "absent" },
                status.dsp_load_percent,
                status.connection_flags()
            );
        }
        Command::Version => {
            let version = link.firmware_version()?;
            println!("{} {version}", link.target_profile().model);
        }
        Command::Ls { dir } => {
            for entry in link.file_list(dir.as_deref())? {
                println!("{}", format_entry(&entry));
            }
        }
        Command::Info { path } => match link.file_info(path)? {
            Some(entry) => println!("{}", format_entry(&entry)),
            None => println!("{path}: not found"),
        },
        Command::Put { local, remote } => {
            let data = std::fs::read(local)?;
            let stamp = modified_time(local);
            link.upload_file(remote, &data, stamp)?;
            info!(remote = %remote, bytes = data.len(), "file written");
        }
        Command::Rm { path } => link.delete_file(path)?,
        Command::Mkdir { path } => link.create_directory(path, Some(Local::now().naive_local()))?,
        Command::Peek { address, length } => {
            let data = link.read_memory(*address, *length)?;
            print!("{}", hexdump(*address, &data));
        }
        Command::Patch { image } => {
            let data = std::fs::read(image)?;
            link.upload_patch(&data)?;
        }
        Command::Start => link.request_ack(CommandTask::Start)?,
        Command::Stop => link.request_ack(CommandTask::Stop)?,
        Command::Preset { index } => link.request_ack(CommandTask::RecallPreset { index: *index })?,
        Command::Midi {
            status,
            data1,
            data2,
        } => {
            link.transmit_midi(*status, *data1, *data2)?;
            // No reply to MIDI; a ping behind it proves it was written.
            link.ping_device()?;
        }
        Command::Flash => link.request_ack(CommandTask::CopyToFlash)?,
        Command::Dfu => {
            link.transmit_bring_to_dfu()?;
            let deadline = Instant::now() + DFU_GRACE;
            while link.state() == ConnectionState::Connected && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if link.is_connected() {
                return Err(LinkError::ResponseTimeout(DFU_GRACE));
            }
            println!("target rebooting into firmware update mode");
        }
    }
    Ok(())
}

fn list_ports() {
    match dsplink_core::list_ports() {
        Ok(ports) if ports.is_empty() => println!("no serial ports found"),
        Ok(ports) => {
            for port in ports {
                println!("{:<24} {}", port.name, port.description);
            }
        }
        Err(e) => eprintln!("could not enumerate ports: {e}"),
    }
}

fn modified_time(path: &Path) -> Option<NaiveDateTime> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Local>::from(modified).naive_local())
}

// ── Formatting ───────────────────────────────────────────────────

/// One listing line: kind, size, timestamp, name.
pub fn format_entry(entry: &RemoteFileCatalogEntry) -> String {
    let kind = if entry.is_directory() { 'd' } else { '-' };
    let stamp = entry
        .timestamp()
        .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".repeat(16));
    format!(
        "{kind} {:>10} {stamp} {}",
        entry.size_bytes(),
        entry.pure_name()
    )
}

/// Classic 16-bytes-per-line hex dump.
pub fn hexdump(address: u32, data: &[u8]) -> String {
    let mut out = String::new();
    for (row, chunk) in data.chunks(16).enumerate() {
        let at = address.wrapping_add((row * 16) as u32);
        let hex: Vec<String> = chunk.iter().map(|b| format!("{b:02x}")).collect();
        let ascii: String = chunk
            .iter()
            .map(|&b| if b.is_ascii_graphic() { b as char } else { '.' })
            .collect();
        out.push_str(&format!("{at:08x}  {:<47}  {ascii}\n", hex.join(" ")));
    }
    out
}

// ── Argument parsing ─────────────────────────────────────────────

/// Decimal or `0x`-prefixed hex.
pub fn parse_number(text: &str) -> Result<u32, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| format!("invalid number {text:?}: {e}"))
}

pub fn parse_byte(text: &str) -> Result<u8, String> {
    let value = parse_number(text)?;
    u8::try_from(value).map_err(|_| format!("{text:?} does not fit in a byte"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn numbers_accept_hex_and_decimal() {
        assert_eq!(parse_number("0x20011000"), Ok(0x2001_1000));
        assert_eq!(parse_number("0XfF"), Ok(255));
        assert_eq!(parse_number("42"), Ok(42));
        assert!(parse_number("0xzz").is_err());
        assert!(parse_number("").is_err());
    }

    #[test]
    fn bytes_are_range_checked() {
        assert_eq!(parse_byte("0x90"), Ok(0x90));
        assert!(parse_byte("256").is_err());
    }

    #[test]
    fn entry_line() {
        let ts = NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(3, 4, 6)
            .unwrap();
        let file = RemoteFileCatalogEntry::new("/loops/kick.wav", Some(ts), 1234, false);
        assert_eq!(format_entry(&file), "-       1234 2024-01-02 03:04 kick.wav");

        let dir = RemoteFileCatalogEntry::new("/presets/", None, 0, true);
        assert!(format_entry(&dir).starts_with("d "));
        assert!(format_entry(&dir).ends_with(" presets"));
    }

    #[test]
    fn hexdump_rows() {
        let data: Vec<u8> = (0x41..0x41 + 20).collect();
        let dump = hexdump(0x100, &data);
        let lines: Vec<&str> = dump.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00000100  41 42"));
        assert!(lines[0].ends_with("ABCDEFGHIJKLMNOP"));
        assert!(lines[1].starts_with("00000110  51 52 53 54"));
        assert!(lines[1].ends_with("QRST"));
    }

    #[test]
    fn ports_needs_no_link() {
        assert!(!Command::Ports.needs_link());
        assert!(Command::Ping.needs_link());
    }
}
