//! Upload command implementation

use std::path::Path;

use mcu_updater::error::UpdaterResult;
use mcu_updater::flasher::DfuFlasher;
use mcu_updater::metadata::image_digest;
use mcu_updater::resolver::DfuFilter;

use super::Session;

/// Read flash from one DFU device into `file`
pub fn run_upload(
    session: &Session,
    file: &Path,
    filter: &DfuFilter,
    alt: u8,
    size: Option<u32>,
) -> UpdaterResult<()> {
    let device = session.resolver().resolve_dfu(filter)?;
    device.interface(alt)?;

    session.dfu().upload(&device.dfu_target(alt), file, size)?;
    println!(
        "Read {} alt {} into {} (sha256 {})",
        device.physical_path,
        alt,
        file.display(),
        image_digest(file)?
    );
    Ok(())
}
