use std::os::unix::process::ExitStatusExt;
use std::path::PathBuf;
use std::process::{ExitStatus, Output};

use crate::config::DFU_INTERFACE_CLASS;
use crate::observer::{DeviceHandle, InterfaceClass};
use crate::records::{parse_serial, InterfaceInfo};

/// Completed tool run with the given exit code and stdout.
pub fn tool_output(code: i32, stdout: &str) -> Output {
    Output {
        status: ExitStatus::from_raw(code << 8),
        stdout: stdout.as_bytes().to_vec(),
        stderr: Vec::new(),
    }
}

/// Builder for `dfu-util --list` interface records and lines
pub struct InterfaceInfoBuilder {
    vendor_id: u16,
    product_id: u16,
    firmware_version: u16,
    physical_path: String,
    alt_setting: u8,
    name: String,
    serial: String,
}

impl InterfaceInfoBuilder {
    pub fn new(physical_path: &str) -> Self {
        Self {
            vendor_id: 0x308F,
            product_id: 0x0013,
            firmware_version: 0x04E3,
            physical_path: physical_path.to_string(),
            alt_setting: 0,
            name: "Kiibohd Bootloader - MCU".to_string(),
            serial: "5335310050464D4B3530343232333033 - sam4s4b:04E3".to_string(),
        }
    }

    pub fn usb_id(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.vendor_id = vendor_id;
        self.product_id = product_id;
        self
    }

    /// Bootloader revision (bcdDevice).
    pub fn version(mut self, version: u16) -> Self {
        self.firmware_version = version;
        self
    }

    pub fn alt(mut self, alt: u8) -> Self {
        self.alt_setting = alt;
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn serial(mut self, serial: &str) -> Self {
        self.serial = serial.to_string();
        self
    }

    /// Serial with the given MCU revision and optional radio revision.
    pub fn revisions(self, mcu: u32, ble: Option<u32>) -> Self {
        let serial = match ble {
            Some(ble) => format!(
                "5335310050464D4B3530343232333033 - sam4s4b:{:04X} - 0A1B2C3D4E5F - nrf52832:{:04X}",
                mcu, ble
            ),
            None => format!("5335310050464D4B3530343232333033 - sam4s4b:{:04X}", mcu),
        };
        self.serial(&serial)
    }

    /// The line dfu-util prints for this interface.
    pub fn line(&self) -> String {
        format!(
            "Found DFU: [{:04x}:{:04x}] ver={:04x}, devnum=12, cfg=1, intf=0, path=\"{}\", alt={}, name=\"{}\", serial=\"{}\"",
            self.vendor_id,
            self.product_id,
            self.firmware_version,
            self.physical_path,
            self.alt_setting,
            self.name,
            self.serial
        )
    }

    pub fn build(self) -> InterfaceInfo {
        InterfaceInfo {
            vendor_id: self.vendor_id,
            product_id: self.product_id,
            firmware_version: self.firmware_version,
            device_number: 12,
            config: 1,
            interface: 0,
            physical_path: self.physical_path,
            alt_setting: self.alt_setting,
            name: self.name,
            serial: parse_serial(&self.serial).expect("fixture serial must parse"),
        }
    }
}

/// `dfu-util --list` output with a banner and the given interface lines.
pub fn dfu_list_output(interfaces: &[InterfaceInfoBuilder]) -> String {
    let mut output = String::from("dfu-util 0.11\n\nCopyright 2005-2009 Weston Schmidt, Harald Welte and OpenMoko Inc.\n\n");
    for interface in interfaces {
        output.push_str(&interface.line());
        output.push('\n');
    }
    output
}

/// Builder for observer device snapshots
pub struct DeviceHandleBuilder {
    handle: DeviceHandle,
}

impl DeviceHandleBuilder {
    /// Device in its DFU personality.
    pub fn dfu(physical_path: &str) -> Self {
        Self {
            handle: DeviceHandle {
                physical_path: physical_path.to_string(),
                vendor_id: 0x308F,
                product_id: 0x0013,
                device_version: 0x04E3,
                serial: Some("5335310050464D4B3530343232333033 - sam4s4b:04E3".to_string()),
                interfaces: vec![InterfaceClass {
                    number: 0,
                    class: DFU_INTERFACE_CLASS,
                    subclass: 0x01,
                }],
                device_nodes: Vec::new(),
            },
        }
    }

    /// Device in the SAM-BA ROM bootloader with a bound tty node.
    pub fn samba(physical_path: &str, node: &str) -> Self {
        Self {
            handle: DeviceHandle {
                physical_path: physical_path.to_string(),
                vendor_id: 0x03EB,
                product_id: 0x6124,
                device_version: 0x0110,
                serial: None,
                interfaces: vec![
                    InterfaceClass {
                        number: 0,
                        class: 0x02,
                        subclass: 0x02,
                    },
                    InterfaceClass {
                        number: 1,
                        class: 0x0A,
                        subclass: 0x00,
                    },
                ],
                device_nodes: vec![PathBuf::from(node)],
            },
        }
    }

    pub fn usb_id(mut self, vendor_id: u16, product_id: u16) -> Self {
        self.handle.vendor_id = vendor_id;
        self.handle.product_id = product_id;
        self
    }

    pub fn serial(mut self, serial: Option<&str>) -> Self {
        self.handle.serial = serial.map(str::to_string);
        self
    }

    pub fn nodes(mut self, nodes: &[&str]) -> Self {
        self.handle.device_nodes = nodes.iter().map(PathBuf::from).collect();
        self
    }

    pub fn build(self) -> DeviceHandle {
        self.handle
    }
}
