//! Device resolution: turning ambient USB state into exactly one device.
//!
//! DFU devices are resolved from `dfu-util --list` output, where several
//! records sharing a physical path are alt-settings of one device. SAM-BA
//! devices are resolved through the observer by their tty node.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{Config, UsbId};
use crate::error::{UpdaterError, UpdaterResult};
use crate::flasher::{DfuFlasher, DfuTarget, ListFilter};
use crate::observer::{DeviceFilter, DeviceObserver};
use crate::records::{parse_interface_list, parse_serial, InterfaceInfo};

/// Optional predicates narrowing DFU resolution, applied in field order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DfuFilter {
    pub physical_path: Option<String>,
    pub usb_id: Option<UsbId>,
    pub serial: Option<String>,
    pub ble_serial: Option<String>,
}

impl DfuFilter {
    pub fn path(physical_path: &str) -> Self {
        Self {
            physical_path: Some(physical_path.to_string()),
            ..Self::default()
        }
    }

    fn matches_serials(&self, serial: &str, ble_serial: Option<&str>) -> bool {
        self.serial.as_deref().map_or(true, |s| s == serial)
            && self.ble_serial.as_deref().map_or(true, |s| Some(s) == ble_serial)
    }
}

impl fmt::Display for DfuFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(path) = &self.physical_path {
            parts.push(format!("path={}", path));
        }
        if let Some(usb_id) = &self.usb_id {
            parts.push(format!("device={}", usb_id));
        }
        if let Some(serial) = &self.serial {
            parts.push(format!("serial={}", serial));
        }
        if let Some(ble_serial) = &self.ble_serial {
            parts.push(format!("ble_serial={}", ble_serial));
        }
        if parts.is_empty() {
            write!(f, "any DFU device")
        } else {
            write!(f, "DFU {}", parts.join(", "))
        }
    }
}

/// Bootloader personality a device currently presents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Personality {
    /// DFU bootloader with its alt-settings.
    Dfu { interfaces: Vec<InterfaceInfo> },
    /// SAM-BA ROM bootloader behind a serial port.
    Samba { port: PathBuf },
}

impl Personality {
    pub fn name(&self) -> &'static str {
        match self {
            Personality::Dfu { .. } => "DFU",
            Personality::Samba { .. } => "SAM-BA",
        }
    }
}

/// A single physical device in a known personality.
///
/// Only valid until the next mode switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDevice {
    pub physical_path: String,
    pub usb_id: UsbId,
    pub personality: Personality,
}

impl ResolvedDevice {
    /// The DFU interface record for `alt`.
    pub fn interface(&self, alt: u8) -> UpdaterResult<&InterfaceInfo> {
        match &self.personality {
            Personality::Dfu { interfaces } => interfaces
                .iter()
                .find(|i| i.alt_setting == alt)
                .ok_or_else(|| UpdaterError::MissingAltSetting {
                    physical_path: self.physical_path.clone(),
                    alt,
                }),
            other => Err(self.unexpected("DFU", other)),
        }
    }

    /// The SAM-BA serial port.
    pub fn samba_port(&self) -> UpdaterResult<&Path> {
        match &self.personality {
            Personality::Samba { port } => Ok(port),
            other => Err(self.unexpected("SAM-BA", other)),
        }
    }

    /// Fail unless the device is in its DFU personality.
    pub fn expect_dfu(&self) -> UpdaterResult<&[InterfaceInfo]> {
        match &self.personality {
            Personality::Dfu { interfaces } => Ok(interfaces),
            other => Err(self.unexpected("DFU", other)),
        }
    }

    pub fn dfu_target(&self, alt: u8) -> DfuTarget {
        DfuTarget {
            usb_id: self.usb_id,
            physical_path: self.physical_path.clone(),
            alt_setting: alt,
        }
    }

    fn unexpected(&self, expected: &'static str, found: &Personality) -> UpdaterError {
        UpdaterError::UnexpectedPersonality {
            physical_path: self.physical_path.clone(),
            expected,
            found: found.name(),
        }
    }
}

/// Resolves devices through the DFU flasher and the device observer.
pub struct Resolver<'a> {
    dfu: &'a dyn DfuFlasher,
    observer: &'a dyn DeviceObserver,
    config: &'a Config,
}

impl<'a> Resolver<'a> {
    pub fn new(dfu: &'a dyn DfuFlasher, observer: &'a dyn DeviceObserver, config: &'a Config) -> Self {
        Self {
            dfu,
            observer,
            config,
        }
    }

    /// Resolve exactly one device in its DFU personality.
    pub fn resolve_dfu(&self, filter: &DfuFilter) -> UpdaterResult<ResolvedDevice> {
        let output = self.dfu.list_interfaces(&ListFilter {
            physical_path: filter.physical_path.clone(),
            usb_id: filter.usb_id,
        })?;

        let interfaces: Vec<InterfaceInfo> = parse_interface_list(&output)
            .into_iter()
            .filter(|i| filter.physical_path.as_deref().map_or(true, |p| p == i.physical_path))
            .filter(|i| {
                filter
                    .usb_id
                    .map_or(true, |id| id == UsbId::new(i.vendor_id, i.product_id))
            })
            .filter(|i| filter.matches_serials(&i.serial.serial, i.serial.ble_serial.as_deref()))
            .collect();

        for interface in &interfaces {
            log::debug!(
                "DFU candidate {} alt {} [{:04x}:{:04x}] {}",
                interface.physical_path,
                interface.alt_setting,
                interface.vendor_id,
                interface.product_id,
                interface.serial
            );
        }

        let physical_path = single_path(interfaces.iter().map(|i| i.physical_path.as_str()), filter)?;
        let first = &interfaces[0];
        Ok(ResolvedDevice {
            usb_id: UsbId::new(first.vendor_id, first.product_id),
            physical_path,
            personality: Personality::Dfu { interfaces },
        })
    }

    /// Physical paths of every DFU device the observer sees that passes
    /// `filter`, sorted.
    pub fn discover_dfu(&self, filter: &DfuFilter) -> UpdaterResult<Vec<String>> {
        let devices = self.observer.list(
            &DeviceFilter::dfu()
                .with_path(filter.physical_path.as_deref())
                .with_usb_id(filter.usb_id),
        )?;

        let mut paths = BTreeSet::new();
        for device in devices {
            let serials = device.serial.as_deref().map(parse_serial);
            let keep = match serials {
                Some(Ok(record)) => filter.matches_serials(&record.serial, record.ble_serial.as_deref()),
                Some(Err(e)) if filter.serial.is_some() || filter.ble_serial.is_some() => {
                    log::warn!("Skipping {}: {}", device.physical_path, e);
                    false
                }
                None if filter.serial.is_some() || filter.ble_serial.is_some() => false,
                _ => true,
            };
            if keep {
                log::info!("DFU device {} [{}]", device.physical_path, device.usb_id());
                paths.insert(device.physical_path);
            }
        }

        if paths.is_empty() {
            return Err(UpdaterError::NoDeviceFound {
                criteria: filter.to_string(),
            });
        }
        Ok(paths.into_iter().collect())
    }

    /// Resolve a SAM-BA device, optionally pinned to `physical_path`.
    ///
    /// With several candidates the lexicographically smallest device node is
    /// chosen.
    pub fn resolve_samba(&self, physical_path: Option<&str>) -> UpdaterResult<ResolvedDevice> {
        let devices = self
            .observer
            .list(&DeviceFilter::usb_ids(&self.config.samba_ids).with_path(physical_path))?;

        let mut candidates: Vec<(PathBuf, String, UsbId)> = devices
            .iter()
            .flat_map(|device| {
                device
                    .device_nodes
                    .iter()
                    .map(move |node| (node.clone(), device.physical_path.clone(), device.usb_id()))
            })
            .collect();
        candidates.sort();

        if candidates.is_empty() {
            return Err(UpdaterError::NoDeviceFound {
                criteria: match physical_path {
                    Some(path) => format!("SAM-BA path={}", path),
                    None => "any SAM-BA device".to_string(),
                },
            });
        }

        log::info!("--- SAM-BA devices found ---");
        for (node, path, usb_id) in &candidates {
            log::info!("{} {} [{}]", node.display(), path, usb_id);
        }

        let ambiguous = candidates.len() > 1;
        let (port, physical_path, usb_id) = candidates.swap_remove(0);
        if ambiguous {
            log::info!("Selected {} ({})", port.display(), physical_path);
        }
        Ok(ResolvedDevice {
            physical_path,
            usb_id,
            personality: Personality::Samba { port },
        })
    }
}

/// The one physical path shared by all records.
fn single_path<'p>(
    paths: impl Iterator<Item = &'p str>,
    filter: &DfuFilter,
) -> UpdaterResult<String> {
    let mut distinct: Vec<String> = Vec::new();
    for path in paths {
        if !distinct.iter().any(|p| p == path) {
            distinct.push(path.to_string());
        }
    }
    match distinct.len() {
        0 => Err(UpdaterError::NoDeviceFound {
            criteria: filter.to_string(),
        }),
        1 => Ok(distinct.remove(0)),
        _ => {
            log::error!("More than one DFU device matched the criteria: {}", distinct.join(", "));
            Err(UpdaterError::AmbiguousDevice { paths: distinct })
        }
    }
}
