//! Firmware reconciliation for Input Club keyboards.
//!
//! A keyboard presents one of two bootloader personalities over USB:
//!
//! - **DFU** (`dfu-util`): MCU firmware on alt-setting 0, radio firmware on
//!   alt-setting 1. The bootloader revision is the device's bcdDevice and the
//!   firmware revisions are packed into the serial-number string.
//! - **SAM-BA** (`bossac`): the Atmel ROM bootloader, used to rewrite the DFU
//!   bootloader itself.
//!
//! The USB physical path (`bus-port.port`) is the only identity that survives
//! a switch between the two, so every stage correlates on it.
//!
//! [`orchestrator::Updater`] compares the on-device revisions with those in
//! each image's `buildvars.h` and flashes only what differs.

pub mod config;
pub mod error;
pub mod flasher;
pub mod metadata;
pub mod mode_switch;
pub mod observer;
pub mod orchestrator;
pub mod records;
pub mod resolver;
pub mod traits;

#[cfg(test)]
mod test_helpers;

pub use config::{Config, UsbId};
pub use error::{UpdaterError, UpdaterResult};
pub use orchestrator::{UpdatePlan, UpdateReport, UpdateStage, Updater};
pub use resolver::{DfuFilter, ResolvedDevice, Resolver};
