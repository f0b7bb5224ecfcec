//! Bootloader reflash command implementation

use std::path::Path;

use mcu_updater::error::UpdaterResult;
use mcu_updater::resolver::DfuFilter;

use super::{print_progress, Session};

/// Switch each matching DFU device to SAM-BA and rewrite its bootloader
pub fn run_reflash_bootloader(session: &Session, file: &Path, physical_path: Option<&str>) -> UpdaterResult<()> {
    let filter = DfuFilter {
        physical_path: physical_path.map(str::to_string),
        ..DfuFilter::default()
    };
    for path in session.resolver().discover_dfu(&filter)? {
        println!("{}:", path);
        let device = session
            .updater()
            .reflash_bootloader(&path, file, print_progress)?;
        println!("{} is back in DFU mode [{}]", device.physical_path, device.usb_id);
    }
    Ok(())
}
