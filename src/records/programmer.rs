//! `bossac --info` records.

use std::fmt;

use serde::Serialize;

/// SAM-BA bootloader and flash description reported by `bossac --info`.
///
/// Fields stay `None` when the corresponding line is absent from the output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgrammerInfo {
    pub device_name: Option<String>,
    pub version: Option<String>,
    pub version_date: Option<String>,
    pub base_address: Option<u32>,
    pub page_count: Option<u32>,
    pub page_size_bytes: Option<u32>,
    pub total_size_bytes: Option<u64>,
    pub plane_count: Option<u32>,
    pub lock_region_count: Option<u32>,
    pub locked: Option<bool>,
    /// Regions listed on the `Locked` line.
    pub locked_regions: Vec<u32>,
    pub security_enabled: Option<bool>,
    pub boot_flash: Option<bool>,
    pub unique_id: Option<String>,
}

/// Parse the labeled lines of `bossac --info`.
///
/// Unknown labels and unparsable values are logged and skipped so newer
/// bossac releases keep working.
pub fn parse_programmer_info(text: &str) -> ProgrammerInfo {
    let mut info = ProgrammerInfo::default();

    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((label, value)) = line.split_once(':') else {
            log::warn!("Unknown bossac line '{}'", line);
            continue;
        };
        let value = value.trim();

        let parsed = match label.trim() {
            "Device" => {
                info.device_name = Some(value.to_string());
                true
            }
            "Version" => {
                let (version, date) = match value.split_once(' ') {
                    Some((version, date)) => (version, Some(date.trim().to_string())),
                    None => (value, None),
                };
                info.version = Some(version.to_string());
                info.version_date = date;
                true
            }
            "Address" => set(&mut info.base_address, parse_hex_u32(value)),
            "Pages" => set(&mut info.page_count, value.parse().ok()),
            "Page Size" => set(&mut info.page_size_bytes, leading_number(value)),
            "Total Size" => set(&mut info.total_size_bytes, parse_size(value)),
            "Planes" => set(&mut info.plane_count, value.parse().ok()),
            "Lock Regions" => set(&mut info.lock_region_count, value.parse().ok()),
            "Locked" => {
                info.locked_regions = parse_regions(value);
                info.locked = Some(!info.locked_regions.is_empty());
                true
            }
            "Security" => set(&mut info.security_enabled, Some(value == "true")),
            "Boot Flash" => set(&mut info.boot_flash, Some(value == "true")),
            "Unique Id" => {
                info.unique_id = Some(value.to_string());
                true
            }
            _ => {
                log::warn!("Unknown bossac line '{}'", line);
                continue;
            }
        };

        if !parsed {
            log::warn!("Could not parse bossac value '{}'", line);
        }
    }

    info
}

fn set<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    let parsed = value.is_some();
    if parsed {
        *slot = value;
    }
    parsed
}

fn parse_hex_u32(value: &str) -> Option<u32> {
    let digits = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    u32::from_str_radix(digits, 16).ok()
}

fn leading_number(value: &str) -> Option<u32> {
    value.split_whitespace().next()?.parse().ok()
}

/// `256KB`, `1MB` or a plain byte count.
fn parse_size(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Some(kb) = value.strip_suffix("KB") {
        kb.trim().parse::<u64>().ok().map(|n| n * 1024)
    } else if let Some(mb) = value.strip_suffix("MB") {
        mb.trim().parse::<u64>().ok().map(|n| n * 1024 * 1024)
    } else {
        value
            .trim_end_matches("bytes")
            .trim()
            .parse::<u64>()
            .ok()
    }
}

fn parse_regions(value: &str) -> Vec<u32> {
    if value.eq_ignore_ascii_case("none") {
        return Vec::new();
    }
    value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter_map(|region| region.parse().ok())
        .collect()
}

fn show<T: fmt::Display>(value: &Option<T>) -> String {
    match value {
        Some(value) => value.to_string(),
        None => "-".to_string(),
    }
}

impl fmt::Display for ProgrammerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "device({})", show(&self.device_name))?;
        writeln!(f, "version({})", show(&self.version))?;
        writeln!(f, "version_date({})", show(&self.version_date))?;
        match self.base_address {
            Some(address) => writeln!(f, "address({:#x})", address)?,
            None => writeln!(f, "address(-)")?,
        }
        writeln!(f, "pages({})", show(&self.page_count))?;
        writeln!(f, "page_size({} bytes)", show(&self.page_size_bytes))?;
        writeln!(f, "total_size({} bytes)", show(&self.total_size_bytes))?;
        writeln!(f, "planes({})", show(&self.plane_count))?;
        writeln!(f, "lock_region({})", show(&self.lock_region_count))?;
        writeln!(f, "locked({})", show(&self.locked))?;
        writeln!(f, "security({})", show(&self.security_enabled))?;
        writeln!(f, "boot_flash({})", show(&self.boot_flash))?;
        write!(f, "unique_id({})", show(&self.unique_id))
    }
}
