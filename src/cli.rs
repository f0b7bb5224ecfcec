//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use mcu_updater::{Config, DfuFilter, UpdaterResult, UsbId};

/// Parse a string as a hex or decimal u32
fn parse_size(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

#[derive(Parser)]
#[command(name = "mcu-updater")]
#[command(author, version, about = "Bootloader, radio and MCU updater for Input Club keyboards", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Settings file (JSON)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// dfu-util executable
    #[arg(long, global = true)]
    pub dfu_util: Option<PathBuf>,

    /// dfu-suffix executable
    #[arg(long, global = true)]
    pub dfu_suffix: Option<PathBuf>,

    /// bossac executable
    #[arg(long, global = true)]
    pub bossac: Option<PathBuf>,

    /// How long to wait for a device to re-enumerate
    #[arg(long, global = true)]
    pub timeout_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level selected by `-v` (debug) and `-vv` (trace).
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }

    /// Settings file contents with command-line overrides applied.
    pub fn load_config(&self) -> UpdaterResult<Config> {
        let mut config = match &self.config {
            Some(path) => Config::load(path)?,
            None => Config::default(),
        };
        if let Some(path) = &self.dfu_util {
            config.tools.dfu_util = path.clone();
        }
        if let Some(path) = &self.dfu_suffix {
            config.tools.dfu_suffix = path.clone();
        }
        if let Some(path) = &self.bossac {
            config.tools.bossac = path.clone();
        }
        if let Some(timeout_ms) = self.timeout_ms {
            config.rebind_timeout_ms = timeout_ms;
        }
        Ok(config)
    }
}

/// Device selection shared across commands
#[derive(clap::Args, Debug, Clone, Default)]
pub struct SelectArgs {
    /// USB physical path (e.g. 1-2.3)
    #[arg(long)]
    pub path: Option<String>,

    /// USB vendor:product in hex (e.g. 308f:0013)
    #[arg(long)]
    pub device: Option<UsbId>,

    /// MCU serial number
    #[arg(long)]
    pub serial: Option<String>,

    /// Radio module serial number
    #[arg(long)]
    pub ble_serial: Option<String>,
}

impl SelectArgs {
    pub fn filter(&self) -> DfuFilter {
        DfuFilter {
            physical_path: self.path.clone(),
            usb_id: self.device,
            serial: self.serial.clone(),
            ble_serial: self.ble_serial.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring bootloader, radio and MCU firmware to the given builds
    Update {
        /// Bootloader image (needs a companion buildvars.h)
        bootloader: PathBuf,

        /// MCU firmware image (needs a companion buildvars.h)
        mcu: PathBuf,

        /// Radio firmware image (needs a companion buildvars.h)
        #[arg(long)]
        ble_firmware: Option<PathBuf>,

        #[command(flatten)]
        select: SelectArgs,
    },

    /// Show the DFU interfaces of one device
    List {
        #[command(flatten)]
        select: SelectArgs,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Show programmer details of a device in SAM-BA mode
    SambaInfo {
        /// USB physical path (e.g. 1-2.3)
        #[arg(long)]
        path: Option<String>,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Rewrite the bootloader through SAM-BA regardless of revision
    ReflashBootloader {
        /// Bootloader image
        file: PathBuf,

        /// USB physical path (e.g. 1-2.3)
        #[arg(long)]
        path: Option<String>,
    },

    /// Detach a DFU alt-setting, booting the firmware on alt 0
    Reset {
        #[command(flatten)]
        select: SelectArgs,

        /// Alt-setting to detach
        #[arg(long, default_value_t = 0)]
        alt: u8,
    },

    /// Read device flash back into a file
    Upload {
        /// Output file
        file: PathBuf,

        #[command(flatten)]
        select: SelectArgs,

        /// Alt-setting to read
        #[arg(long, default_value_t = 0)]
        alt: u8,

        /// Bytes to read (hex with 0x prefix or decimal); whole flash if omitted
        #[arg(long, value_parser = parse_size)]
        size: Option<u32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("0x4000"), Ok(0x4000));
        assert_eq!(parse_size("1024"), Ok(1024));
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_verbosity_sets_log_level() {
        fn level(flags: &[&str]) -> log::LevelFilter {
            let argv = std::iter::once("mcu-updater")
                .chain(flags.iter().copied())
                .chain(std::iter::once("list"));
            Cli::parse_from(argv).log_level()
        }

        assert_eq!(level(&[]), log::LevelFilter::Info);
        assert_eq!(level(&["-v"]), log::LevelFilter::Debug);
        assert_eq!(level(&["-vv"]), log::LevelFilter::Trace);
        assert_eq!(level(&["-v", "-v", "-v"]), log::LevelFilter::Trace);
    }

    #[test]
    fn test_cli_overrides_config() {
        let cli = Cli::parse_from([
            "mcu-updater",
            "--bossac",
            "/opt/bossa/bossac",
            "--timeout-ms",
            "5000",
            "list",
            "--device",
            "308f:0013",
        ]);
        let config = cli.load_config().unwrap();
        assert_eq!(config.tools.bossac, PathBuf::from("/opt/bossa/bossac"));
        assert_eq!(config.rebind_timeout_ms, 5000);

        match cli.command {
            Commands::List { select, json } => {
                assert!(!json);
                assert_eq!(select.filter().usb_id, Some(UsbId::new(0x308F, 0x0013)));
            }
            _ => panic!("expected list"),
        }
    }

    #[test]
    fn test_verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
