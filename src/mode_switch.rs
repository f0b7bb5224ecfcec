//! Moving a device between its DFU and SAM-BA personalities.
//!
//! A switch is always two steps: subscribe with [`ModeSwitch::watch_rebind`],
//! trigger the reset, then [`ModeSwitch::await_reenumeration`]. Subscribing
//! first means a fast rebind cannot slip past the wait.

use std::io::Write;
use std::time::{Duration, Instant};

use tempfile::NamedTempFile;

use crate::config::{Config, MCU_ALT_SETTING, REBIND_SETTLE_INTERVAL};
use crate::error::{UpdaterError, UpdaterResult};
use crate::flasher::DfuFlasher;
use crate::observer::{DeviceAction, DeviceEvent, DeviceFilter, DeviceObserver, EventFeed};
use crate::records::InterfaceInfo;
use crate::resolver::{DfuFilter, Personality, ResolvedDevice, Resolver};

/// Live subscription to rebind events of one physical path.
pub struct RebindWatch {
    physical_path: String,
    feed: Box<dyn EventFeed>,
}

/// Check the SAM-BA switch safety gate and return the interface it applies to.
///
/// Older bootloaders and other chip families do not understand the switch
/// command and may be left unbootable.
pub fn check_switch_supported<'d>(
    device: &'d ResolvedDevice,
    config: &Config,
) -> UpdaterResult<&'d InterfaceInfo> {
    let interfaces = match &device.personality {
        Personality::Dfu { interfaces } => interfaces,
        other => {
            return Err(UpdaterError::UnsupportedDevice {
                vendor_id: device.usb_id.vendor_id,
                product_id: device.usb_id.product_id,
                name: String::new(),
                serial: String::new(),
                reason: format!("device is in {} mode, not DFU", other.name()),
            })
        }
    };
    let interface = interfaces
        .iter()
        .find(|i| i.alt_setting == MCU_ALT_SETTING)
        .ok_or_else(|| UpdaterError::MissingAltSetting {
            physical_path: device.physical_path.clone(),
            alt: MCU_ALT_SETTING,
        })?;

    let unsupported = |reason: String| UpdaterError::UnsupportedDevice {
        vendor_id: interface.vendor_id,
        product_id: interface.product_id,
        name: interface.name.clone(),
        serial: interface.serial.serial.clone(),
        reason,
    };

    if interface.vendor_id != config.vendor_id {
        return Err(unsupported(format!(
            "not an Input Club bootloader (vendor {:04x})",
            interface.vendor_id
        )));
    }
    if !interface.serial.chip.contains(&config.chip_family) {
        return Err(unsupported(format!(
            "switching is not implemented for {}",
            interface.serial.chip
        )));
    }
    if interface.firmware_version < config.min_switch_revision {
        return Err(unsupported(format!(
            "bootloader version is too old, must be updated manually ({} < {})",
            interface.firmware_version, config.min_switch_revision
        )));
    }
    Ok(interface)
}

/// Encode a hex serial number as little-endian 32-bit words.
///
/// The serial is split into 8-digit words; a shorter final word is taken as
/// its numeric value.
pub fn encode_serial_blob(serial: &str) -> UpdaterResult<Vec<u8>> {
    let malformed = |reason: String| UpdaterError::MalformedSerial {
        raw: serial.to_string(),
        reason,
    };
    if serial.is_empty() {
        return Err(malformed("empty serial number".to_string()));
    }

    let mut blob = Vec::with_capacity(serial.len() / 2);
    for chunk in serial.as_bytes().chunks(8) {
        let word = std::str::from_utf8(chunk)
            .ok()
            .and_then(|word| u32::from_str_radix(word, 16).ok())
            .ok_or_else(|| malformed(format!("'{}' is not a hex word", String::from_utf8_lossy(chunk))))?;
        blob.extend_from_slice(&word.to_le_bytes());
    }
    Ok(blob)
}

/// Coordinates personality changes of one device at a time.
pub struct ModeSwitch<'a> {
    dfu: &'a dyn DfuFlasher,
    observer: &'a dyn DeviceObserver,
    config: &'a Config,
}

impl<'a> ModeSwitch<'a> {
    pub fn new(dfu: &'a dyn DfuFlasher, observer: &'a dyn DeviceObserver, config: &'a Config) -> Self {
        Self {
            dfu,
            observer,
            config,
        }
    }

    fn resolver(&self) -> Resolver<'a> {
        Resolver::new(self.dfu, self.observer, self.config)
    }

    /// Send the device its own serial number, which makes a supported DFU
    /// bootloader reset into SAM-BA.
    pub fn switch_to_samba(&self, device: &ResolvedDevice) -> UpdaterResult<()> {
        let interface = check_switch_supported(device, self.config)?;
        let blob = encode_serial_blob(&interface.serial.serial)?;

        let mut file = NamedTempFile::new()?;
        file.write_all(&blob)?;
        file.flush()?;

        log::info!(
            "Switching {} ({}) to SAM-BA",
            device.physical_path,
            interface.serial.serial
        );
        self.dfu.add_suffix(device.usb_id, file.path())?;
        self.dfu.download(&device.dfu_target(MCU_ALT_SETTING), file.path())
    }

    /// Subscribe to rebind events for `physical_path`. Call before the
    /// action that resets the device.
    pub fn watch_rebind(&self, physical_path: &str) -> UpdaterResult<RebindWatch> {
        let feed = self
            .observer
            .watch(&DeviceFilter::default().with_path(Some(physical_path)))?;
        Ok(RebindWatch {
            physical_path: physical_path.to_string(),
            feed,
        })
    }

    /// Block until the watched device binds again, then resolve it in
    /// whatever personality it came back in.
    pub fn await_reenumeration(
        &self,
        watch: RebindWatch,
        timeout: Duration,
    ) -> UpdaterResult<ResolvedDevice> {
        let RebindWatch {
            physical_path,
            mut feed,
        } = watch;
        let deadline = Instant::now() + timeout;
        let timed_out = |physical_path: String| UpdaterError::ReenumerationTimeout {
            physical_path,
            timeout_ms: timeout.as_millis() as u64,
        };
        let mut bound: Option<DeviceEvent> = None;

        loop {
            let wait_until = match bound {
                Some(_) => deadline.min(Instant::now() + REBIND_SETTLE_INTERVAL),
                None => deadline,
            };
            match feed.next_event(wait_until)? {
                Some(event) if event.action == DeviceAction::Bind => {
                    log::debug!("{} bound", event.physical_path);
                    bound = Some(event);
                }
                Some(event) => {
                    log::debug!("{} unbound", event.physical_path);
                    bound = None;
                    continue;
                }
                None if bound.is_none() => return Err(timed_out(physical_path)),
                None => {}
            }

            if let Some(event) = &bound {
                match self.resolve_bound(event) {
                    Ok(device) => {
                        log::info!(
                            "{} re-enumerated as {} [{}]",
                            device.physical_path,
                            device.personality.name(),
                            device.usb_id
                        );
                        return Ok(device);
                    }
                    Err(UpdaterError::NoDeviceFound { criteria }) => {
                        if Instant::now() >= deadline {
                            log::warn!("{} bound but never became ready ({})", physical_path, criteria);
                            return Err(timed_out(physical_path));
                        }
                        log::debug!("{} not ready yet ({})", physical_path, criteria);
                    }
                    Err(e) => return Err(e),
                }
            }
        }
    }

    fn resolve_bound(&self, event: &DeviceEvent) -> UpdaterResult<ResolvedDevice> {
        let usb_id = event.device.as_ref().map(|device| device.usb_id());
        match usb_id {
            Some(id) if self.config.is_samba_id(id.vendor_id, id.product_id) => {
                self.resolver().resolve_samba(Some(&event.physical_path))
            }
            _ => self.resolver().resolve_dfu(&DfuFilter {
                physical_path: Some(event.physical_path.clone()),
                usb_id,
                ..DfuFilter::default()
            }),
        }
    }
}
