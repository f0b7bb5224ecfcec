//! `dfu-util --list` interface records.

use std::fmt;

use serde::Serialize;

use super::serial::{parse_serial, SerialRecord};
use crate::error::{UpdaterError, UpdaterResult};

/// Marker that starts every DFU interface line in `dfu-util --list` output.
pub const FOUND_DFU_MARKER: &str = "Found DFU:";

/// One DFU alt-setting of a device in its DFU bootloader personality.
///
/// Several records with the same `physical_path` are alt-settings of one
/// physical device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice of the bootloader, i.e. the bootloader revision.
    pub firmware_version: u16,
    pub device_number: u8,
    pub config: u8,
    pub interface: u8,
    /// USB topological address (`bus-port.port...`).
    pub physical_path: String,
    pub alt_setting: u8,
    pub name: String,
    pub serial: SerialRecord,
}

#[derive(Default)]
struct Fields {
    firmware_version: Option<u16>,
    device_number: Option<u8>,
    config: Option<u8>,
    interface: Option<u8>,
    physical_path: Option<String>,
    alt_setting: Option<u8>,
    name: Option<String>,
    serial: Option<SerialRecord>,
}

/// Parse a single `Found DFU:` line.
///
/// ```text
/// Found DFU: [308f:0013] ver=04e3, devnum=12, cfg=1, intf=0, path="1-2.3", alt=0, name="MCU", serial="..."
/// ```
pub fn parse_interface_line(line: &str) -> UpdaterResult<InterfaceInfo> {
    let malformed = |reason: String| UpdaterError::MalformedInterfaceLine {
        line: line.to_string(),
        reason,
    };

    let open = line
        .find('[')
        .ok_or_else(|| malformed("missing [vid:pid]".to_string()))?;
    let close = line[open..]
        .find(']')
        .map(|offset| open + offset)
        .ok_or_else(|| malformed("unterminated [vid:pid]".to_string()))?;
    let (vendor_id, product_id) = line[open + 1..close]
        .split_once(':')
        .ok_or_else(|| malformed("missing ':' in [vid:pid]".to_string()))?;
    let vendor_id = parse_hex(vendor_id).map_err(&malformed)?;
    let product_id = parse_hex(product_id).map_err(&malformed)?;

    let mut fields = Fields::default();
    for token in split_fields(&line[close + 1..]) {
        let Some((key, value)) = token.split_once('=') else {
            log::warn!("Unknown dfu-util field '{}'", token);
            continue;
        };
        let value = value.trim();
        match key.trim() {
            "ver" => fields.firmware_version = Some(parse_hex(value).map_err(&malformed)?),
            "devnum" => fields.device_number = Some(parse_dec(key, value).map_err(&malformed)?),
            "cfg" => fields.config = Some(parse_dec(key, value).map_err(&malformed)?),
            "intf" => fields.interface = Some(parse_dec(key, value).map_err(&malformed)?),
            "alt" => fields.alt_setting = Some(parse_dec(key, value).map_err(&malformed)?),
            "path" => fields.physical_path = Some(unquote(value).to_string()),
            "name" => fields.name = Some(unquote(value).to_string()),
            "serial" => fields.serial = Some(parse_serial(unquote(value))?),
            other => log::warn!("Unknown dfu-util field '{}' in '{}'", other, line),
        }
    }

    let missing = |key: &str| malformed(format!("missing {}", key));
    Ok(InterfaceInfo {
        vendor_id,
        product_id,
        firmware_version: fields.firmware_version.ok_or_else(|| missing("ver"))?,
        device_number: fields.device_number.ok_or_else(|| missing("devnum"))?,
        config: fields.config.ok_or_else(|| missing("cfg"))?,
        interface: fields.interface.ok_or_else(|| missing("intf"))?,
        physical_path: fields.physical_path.ok_or_else(|| missing("path"))?,
        alt_setting: fields.alt_setting.ok_or_else(|| missing("alt"))?,
        name: fields.name.ok_or_else(|| missing("name"))?,
        serial: fields.serial.ok_or_else(|| missing("serial"))?,
    })
}

/// Parse every `Found DFU:` line of a `dfu-util --list` run.
///
/// Lines that fail to decode are logged and skipped; other devices on the bus
/// may not carry an Input Club serial.
pub fn parse_interface_list(output: &str) -> Vec<InterfaceInfo> {
    output
        .lines()
        .filter(|line| line.contains(FOUND_DFU_MARKER))
        .filter_map(|line| match parse_interface_line(line) {
            Ok(info) => Some(info),
            Err(e) => {
                log::warn!("Skipping DFU interface: {}", e);
                None
            }
        })
        .collect()
}

/// Split on commas that are not inside double quotes.
fn split_fields(text: &str) -> Vec<&str> {
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(text[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    fields.push(text[start..].trim());
    fields.retain(|field| !field.is_empty());
    fields
}

fn unquote(value: &str) -> &str {
    value.trim_matches('"')
}

fn parse_hex(value: &str) -> Result<u16, String> {
    u16::from_str_radix(value.trim(), 16).map_err(|e| format!("invalid hex '{}': {}", value, e))
}

fn parse_dec(key: &str, value: &str) -> Result<u8, String> {
    value
        .parse()
        .map_err(|e| format!("invalid {} '{}': {}", key, value, e))
}

impl fmt::Display for InterfaceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "vid:pid({:04x}:{:04x})", self.vendor_id, self.product_id)?;
        writeln!(f, "ver({:x})", self.firmware_version)?;
        writeln!(f, "devnum({})", self.device_number)?;
        writeln!(f, "cfg({})", self.config)?;
        writeln!(f, "intf({})", self.interface)?;
        writeln!(f, "path({})", self.physical_path)?;
        writeln!(f, "alt({})", self.alt_setting)?;
        writeln!(f, "name({})", self.name)?;
        write!(f, "serial({})", self.serial)
    }
}
