//! Composite serial-number strings reported by the Input Club bootloader.
//!
//! The bootloader packs the MCU serial, chip and firmware revision (and, on
//! wireless boards, the same triple for the radio module) into the USB
//! iSerial string:
//!
//! ```text
//! 5335310050464D4B3530343232333033 - sam4s4b:04E3 - 0A1B2C3D4E5F - nrf52832:0102
//! ^0                               ^1 ^2           ^3 ^4           ^5 ^6
//! ```

use std::fmt;

use serde::Serialize;

use crate::error::{UpdaterError, UpdaterResult};

/// Decoded serial-number string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SerialRecord {
    /// MCU serial number proper.
    pub serial: String,
    /// MCU chip name (e.g. `sam4s4b`).
    pub chip: String,
    /// Firmware revision, present only when the chip token carried `:HEXREV`.
    pub mcu_revision: Option<u32>,
    pub ble_serial: Option<String>,
    pub ble_chip: Option<String>,
    pub ble_revision: Option<u32>,
}

const CHIP_TOKEN: usize = 2;
const BLE_SERIAL_TOKEN: usize = 4;
const BLE_CHIP_TOKEN: usize = 6;
/// A radio segment is present once the string has this many tokens.
const BLE_MIN_TOKENS: usize = 6;

/// Parse a raw serial string as read from dfu-util or sysfs.
pub fn parse_serial(raw: &str) -> UpdaterResult<SerialRecord> {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    let malformed = |reason: String| UpdaterError::MalformedSerial {
        raw: raw.to_string(),
        reason,
    };

    if tokens.len() <= CHIP_TOKEN {
        return Err(malformed(format!(
            "expected at least {} tokens, found {}",
            CHIP_TOKEN + 1,
            tokens.len()
        )));
    }

    let (chip, mcu_revision) = split_chip(tokens[CHIP_TOKEN]).map_err(&malformed)?;

    let (ble_serial, ble_chip, ble_revision) = if tokens.len() >= BLE_MIN_TOKENS {
        let ble_token = tokens
            .get(BLE_CHIP_TOKEN)
            .ok_or_else(|| malformed("radio segment has no chip token".to_string()))?;
        let (ble_chip, ble_revision) = split_chip(ble_token).map_err(&malformed)?;
        let ble_revision = ble_revision
            .ok_or_else(|| malformed(format!("radio chip '{}' has no revision", ble_chip)))?;
        (
            Some(tokens[BLE_SERIAL_TOKEN].to_string()),
            Some(ble_chip),
            Some(ble_revision),
        )
    } else {
        (None, None, None)
    };

    Ok(SerialRecord {
        serial: tokens[0].to_string(),
        chip,
        mcu_revision,
        ble_serial,
        ble_chip,
        ble_revision,
    })
}

/// Split `chip` or `chip:HEXREV`.
fn split_chip(token: &str) -> Result<(String, Option<u32>), String> {
    match token.split_once(':') {
        Some((chip, revision)) => {
            let revision = u32::from_str_radix(revision, 16)
                .map_err(|e| format!("invalid revision '{}' for {}: {}", revision, chip, e))?;
            Ok((chip.to_string(), Some(revision)))
        }
        None => Ok((token.to_string(), None)),
    }
}

impl fmt::Display for SerialRecord {
    /// Formats the record back into the bootloader's serial grammar.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.serial, self.chip)?;
        if let Some(revision) = self.mcu_revision {
            write!(f, ":{:04X}", revision)?;
        }
        if let (Some(serial), Some(chip), Some(revision)) =
            (&self.ble_serial, &self.ble_chip, self.ble_revision)
        {
            write!(f, " - {} - {}:{:04X}", serial, chip, revision)?;
        }
        Ok(())
    }
}
