//! Device identifiers, safety limits and tool locations.
//!
//! The constants below are the defaults; a [`Config`] value carries the
//! effective settings into the resolver, mode switch and orchestrator so tests
//! and alternate setups can substitute tool paths and device identities.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UpdaterResult;

// ============================================================================
// USB Device Identifiers
// ============================================================================

/// Input Club USB Vendor ID (DFU bootloader personality).
pub const INPUT_CLUB_VID: u16 = 0x308F;

/// Atmel SAM-BA ROM bootloader.
pub const SAMBA_IDS: &[UsbId] = &[UsbId::new(0x03EB, 0x6124)];

/// USB interface class for application-specific interfaces.
pub const DFU_INTERFACE_CLASS: u8 = 0xFE;

/// Application-specific subclass for DFU.
pub const DFU_INTERFACE_SUBCLASS: u8 = 0x01;

/// Alt-setting addressing the main MCU flash.
pub const MCU_ALT_SETTING: u8 = 0;

/// Alt-setting addressing the radio module.
pub const BLE_ALT_SETTING: u8 = 1;

// ============================================================================
// Bootloader Switching
// ============================================================================

/// Only this MCU family understands the serial-number switch command.
pub const SUPPORTED_CHIP_FAMILY: &str = "sam4s";

/// First bootloader revision that jumps to SAM-BA when sent its own serial.
pub const MIN_SAMBA_SWITCH_REVISION: u16 = 1233;

/// Lock regions covering the bootloader (24 kB).
pub const BOOTLOADER_LOCK_REGIONS: &[u32] = &[0, 1, 2];

/// Timeout waiting for a device to rebind after a reset or mode switch.
pub const REBIND_TIMEOUT_MS: u64 = 3000;

/// Retry interval while a rebound device's drivers are still attaching.
pub const REBIND_SETTLE_INTERVAL: Duration = Duration::from_millis(100);

// ============================================================================
// External Tools
// ============================================================================

pub const DFU_UTIL_BIN: &str = "dfu-util";
pub const DFU_SUFFIX_BIN: &str = "dfu-suffix";
pub const BOSSAC_BIN: &str = "bossac";

/// A USB vendor/product pair, written `vvvv:pppp` in hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UsbId {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl UsbId {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

impl FromStr for UsbId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vid, pid) = s
            .split_once(':')
            .ok_or_else(|| format!("Expected VID:PID, got '{}'", s))?;
        let parse = |part: &str| {
            let part = part.trim_start_matches("0x").trim_start_matches("0X");
            u16::from_str_radix(part, 16).map_err(|e| format!("Invalid hex id '{}': {}", part, e))
        };
        Ok(Self::new(parse(vid)?, parse(pid)?))
    }
}

/// Locations of the external flashing tools.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolPaths {
    pub dfu_util: PathBuf,
    pub dfu_suffix: PathBuf,
    pub bossac: PathBuf,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            dfu_util: PathBuf::from(DFU_UTIL_BIN),
            dfu_suffix: PathBuf::from(DFU_SUFFIX_BIN),
            bossac: PathBuf::from(BOSSAC_BIN),
        }
    }
}

/// Effective updater settings.
///
/// Every field has a default, so a settings file only needs the keys it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tools: ToolPaths,
    /// Vendor ID of devices whose bootloader can be switched remotely.
    pub vendor_id: u16,
    /// Chip family substring required for the SAM-BA switch.
    pub chip_family: String,
    /// Minimum DFU bootloader revision for the SAM-BA switch.
    pub min_switch_revision: u16,
    /// SAM-BA vendor/product allow-list.
    pub samba_ids: Vec<UsbId>,
    pub rebind_timeout_ms: u64,
    /// Regions unlocked before and locked after writing the bootloader.
    pub bootloader_regions: Vec<u32>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tools: ToolPaths::default(),
            vendor_id: INPUT_CLUB_VID,
            chip_family: SUPPORTED_CHIP_FAMILY.to_string(),
            min_switch_revision: MIN_SAMBA_SWITCH_REVISION,
            samba_ids: SAMBA_IDS.to_vec(),
            rebind_timeout_ms: REBIND_TIMEOUT_MS,
            bootloader_regions: BOOTLOADER_LOCK_REGIONS.to_vec(),
        }
    }
}

impl Config {
    /// Load settings from disk, returning defaults if the file doesn't exist.
    pub fn load(path: &Path) -> UpdaterResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)?;

        // Handle empty file gracefully
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        Ok(serde_json::from_str(&contents)?)
    }

    /// Save settings to disk.
    pub fn save(&self, path: &Path) -> UpdaterResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        fs::write(path, contents)?;
        Ok(())
    }

    pub fn rebind_timeout(&self) -> Duration {
        Duration::from_millis(self.rebind_timeout_ms)
    }

    /// Check if a VID/PID combination is a SAM-BA bootloader.
    pub fn is_samba_id(&self, vendor_id: u16, product_id: u16) -> bool {
        self.samba_ids.contains(&UsbId::new(vendor_id, product_id))
    }
}
