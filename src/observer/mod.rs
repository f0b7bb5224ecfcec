//! USB device observation: attribute-filtered listings and a hotplug feed.
//!
//! The resolver and mode switch only see [`DeviceObserver`] and
//! [`EventFeed`]; [`system_observer`] returns the platform backend.

#[cfg(target_os = "linux")]
pub mod usb;

use std::path::PathBuf;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Instant;

use serde::Serialize;

use crate::config::{UsbId, DFU_INTERFACE_CLASS, DFU_INTERFACE_SUBCLASS};
use crate::error::{UpdaterError, UpdaterResult};

/// Class triple of one USB interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceClass {
    pub number: u8,
    pub class: u8,
    pub subclass: u8,
}

/// Snapshot of a USB device as seen by the observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceHandle {
    /// USB topological address, stable across mode switches.
    pub physical_path: String,
    pub vendor_id: u16,
    pub product_id: u16,
    /// bcdDevice.
    pub device_version: u16,
    /// Raw iSerial string.
    pub serial: Option<String>,
    pub interfaces: Vec<InterfaceClass>,
    /// Device nodes of CDC-ACM children (`/dev/ttyACM*`).
    pub device_nodes: Vec<PathBuf>,
}

impl DeviceHandle {
    pub fn usb_id(&self) -> UsbId {
        UsbId::new(self.vendor_id, self.product_id)
    }

    pub fn has_interface_class(&self, class: u8, subclass: u8) -> bool {
        self.interfaces
            .iter()
            .any(|i| i.class == class && i.subclass == subclass)
    }
}

/// Attribute predicates for listing and watching devices. Unset fields match
/// anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub physical_path: Option<String>,
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    /// Any of these vendor/product pairs.
    pub usb_ids: Vec<UsbId>,
    /// Interface (class, subclass) that must be present.
    pub interface_class: Option<(u8, u8)>,
}

impl DeviceFilter {
    /// Devices exposing a DFU interface.
    pub fn dfu() -> Self {
        Self {
            interface_class: Some((DFU_INTERFACE_CLASS, DFU_INTERFACE_SUBCLASS)),
            ..Self::default()
        }
    }

    /// Devices matching one of `usb_ids`.
    pub fn usb_ids(usb_ids: &[UsbId]) -> Self {
        Self {
            usb_ids: usb_ids.to_vec(),
            ..Self::default()
        }
    }

    pub fn with_path(mut self, physical_path: Option<&str>) -> Self {
        self.physical_path = physical_path.map(str::to_string);
        self
    }

    pub fn with_usb_id(mut self, usb_id: Option<UsbId>) -> Self {
        if let Some(usb_id) = usb_id {
            self.vendor_id = Some(usb_id.vendor_id);
            self.product_id = Some(usb_id.product_id);
        }
        self
    }

    pub fn matches(&self, device: &DeviceHandle) -> bool {
        self.matches_path(&device.physical_path)
            && self.vendor_id.map_or(true, |vid| vid == device.vendor_id)
            && self.product_id.map_or(true, |pid| pid == device.product_id)
            && (self.usb_ids.is_empty() || self.usb_ids.contains(&device.usb_id()))
            && self
                .interface_class
                .map_or(true, |(class, subclass)| {
                    device.has_interface_class(class, subclass)
                })
    }

    pub fn matches_path(&self, physical_path: &str) -> bool {
        self.physical_path
            .as_deref()
            .map_or(true, |path| path == physical_path)
    }

    /// Unbind events carry no attributes, so only the path is checked.
    pub fn matches_event(&self, event: &DeviceEvent) -> bool {
        match &event.device {
            Some(device) => self.matches(device),
            None => self.matches_path(&event.physical_path),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceAction {
    Bind,
    Unbind,
}

/// One hotplug notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEvent {
    pub action: DeviceAction,
    pub physical_path: String,
    /// Attributes of the bound device. `None` for unbind.
    pub device: Option<DeviceHandle>,
}

impl DeviceEvent {
    pub fn bind(device: DeviceHandle) -> Self {
        Self {
            action: DeviceAction::Bind,
            physical_path: device.physical_path.clone(),
            device: Some(device),
        }
    }

    pub fn unbind(physical_path: &str) -> Self {
        Self {
            action: DeviceAction::Unbind,
            physical_path: physical_path.to_string(),
            device: None,
        }
    }
}

/// Live sequence of hotplug events.
pub trait EventFeed: Send {
    /// Block until the next event or `deadline`. `Ok(None)` means the deadline
    /// passed.
    fn next_event(&mut self, deadline: Instant) -> UpdaterResult<Option<DeviceEvent>>;
}

/// Enumeration and hotplug capability.
pub trait DeviceObserver: Send + Sync {
    fn list(&self, filter: &DeviceFilter) -> UpdaterResult<Vec<DeviceHandle>>;

    /// Subscribe to events matching `filter`. Events that happen before this
    /// call are not delivered.
    fn watch(&self, filter: &DeviceFilter) -> UpdaterResult<Box<dyn EventFeed>>;
}

/// Feed over a channel filled by a backend thread.
pub struct ChannelFeed {
    events: Receiver<DeviceEvent>,
    filter: DeviceFilter,
}

impl ChannelFeed {
    pub fn new(events: Receiver<DeviceEvent>, filter: DeviceFilter) -> Self {
        Self { events, filter }
    }
}

impl EventFeed for ChannelFeed {
    fn next_event(&mut self, deadline: Instant) -> UpdaterResult<Option<DeviceEvent>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) if self.filter.matches_event(&event) => return Ok(Some(event)),
                Ok(event) => log::trace!("Ignoring {:?} on {}", event.action, event.physical_path),
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(UpdaterError::EventFeedClosed),
            }
        }
    }
}

/// The observer backend for this platform.
pub fn system_observer() -> UpdaterResult<Box<dyn DeviceObserver>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(usb::UsbObserver::new()))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(UpdaterError::UnsupportedPlatform)
    }
}
