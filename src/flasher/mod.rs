//! Clients for the external flashing tools.
//!
//! The resolver and orchestrator talk to [`DfuFlasher`] and [`SambaFlasher`];
//! [`DfuUtil`] and [`Bossac`] implement them by running `dfu-util`,
//! `dfu-suffix` and `bossac` through a [`CommandExecutor`].

mod bossac;
mod dfu_util;

use std::path::{Path, PathBuf};
use std::process::Output;

#[cfg(test)]
use mockall::automock;

pub use bossac::Bossac;
pub use dfu_util::DfuUtil;

use crate::config::UsbId;
use crate::error::{UpdaterError, UpdaterResult};
use crate::traits::CommandExecutor;

/// Filters forwarded to `dfu-util --list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    pub physical_path: Option<String>,
    pub usb_id: Option<UsbId>,
}

/// One DFU alt-setting on one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DfuTarget {
    pub usb_id: UsbId,
    pub physical_path: String,
    pub alt_setting: u8,
}

/// DFU-class flasher capability.
#[cfg_attr(test, automock)]
pub trait DfuFlasher: Send + Sync {
    /// Raw `--list` output for the devices matching `filter`.
    fn list_interfaces(&self, filter: &ListFilter) -> UpdaterResult<String>;

    /// Download `file` from host to device.
    fn download(&self, target: &DfuTarget, file: &Path) -> UpdaterResult<()>;

    /// Upload device flash into `file`, the whole flash unless `size` is given.
    fn upload(&self, target: &DfuTarget, file: &Path, size: Option<u32>) -> UpdaterResult<()>;

    /// Detach the interface. On alt-setting 0 this boots the firmware.
    fn detach(&self, target: &DfuTarget) -> UpdaterResult<()>;

    /// Append a DFU suffix carrying `usb_id` to `file`.
    fn add_suffix(&self, usb_id: UsbId, file: &Path) -> UpdaterResult<()>;
}

/// Options for a single bossac run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SambaOptions {
    /// File to flash.
    pub file: Option<PathBuf>,
    /// `None` erases automatically when writing a file.
    pub erase: Option<bool>,
    pub write: bool,
    /// Boot from flash afterwards (otherwise boot to ROM).
    pub boot_flash: bool,
    /// Regions locked after flashing.
    pub lock_regions: Vec<u32>,
    /// Regions unlocked before flashing, in a separate invocation.
    pub unlock_regions: Vec<u32>,
    pub verify: bool,
    pub reset: bool,
}

impl SambaOptions {
    /// Write the bootloader image with lock bracketing, verification and reset.
    pub fn bootloader(file: &Path, regions: &[u32]) -> Self {
        Self {
            file: Some(file.to_path_buf()),
            erase: None,
            write: true,
            boot_flash: true,
            lock_regions: regions.to_vec(),
            unlock_regions: regions.to_vec(),
            verify: true,
            reset: true,
        }
    }
}

/// SAM-BA-class flasher capability.
#[cfg_attr(test, automock)]
pub trait SambaFlasher: Send + Sync {
    /// Raw `--info` output for the SAM-BA device on `port`.
    fn info(&self, port: &Path) -> UpdaterResult<String>;

    /// Run bossac against `port`.
    fn run(&self, port: &Path, options: &SambaOptions) -> UpdaterResult<()>;
}

/// Run a tool to completion, treating a non-zero exit as fatal.
fn run_checked(
    executor: &dyn CommandExecutor,
    tool: &Path,
    args: Vec<String>,
) -> UpdaterResult<Output> {
    let tool = tool.to_string_lossy().into_owned();
    log::info!("Running: {} {}", tool, args.join(" "));

    let output = executor
        .execute(&tool, args.clone())
        .map_err(|source| UpdaterError::ToolSpawn {
            tool: tool.clone(),
            source,
        })?;

    if !output.stdout.is_empty() {
        log::debug!("{} stdout:\n{}", tool, String::from_utf8_lossy(&output.stdout));
    }

    if !output.status.success() {
        return Err(UpdaterError::ToolInvocationFailed {
            tool,
            args,
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(output)
}
